use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Body, header, Method, StatusCode};
use juniper::http::{graphiql::graphiql_source, GraphQLBatchRequest};
use std::{fmt, time::Instant};

use crate::{api, prelude::*};
use super::{
    Context,
    Request,
    Response,
    log,
    response::{bad_request, internal_server_error, method_not_allowed, not_found},
};


/// This is the main HTTP entry point, called for each incoming request.
pub(super) async fn handle<B>(req: Request<B>, ctx: &Context) -> Response
where
    B: Body<Data = Bytes> + Send,
    B::Error: fmt::Display,
{
    log::req::log(&req);
    if ctx.log_headers {
        log::headers::log(&req);
    }

    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_owned();

    match path.as_str() {
        // The GraphQL endpoint. This is the only path for which POST is
        // allowed.
        "/graphql" if method == Method::POST => handle_api(req, ctx).await,

        // The interactive GraphQL API explorer/IDE. It does not expose any
        // information that isn't already exposed by the API itself.
        "/graphiql" if method == Method::GET || method == Method::HEAD => {
            hyper::Response::builder()
                .header(header::CONTENT_TYPE, "text/html; charset=UTF-8")
                .body(Full::new(graphiql_source("/graphql", None).into()))
                .unwrap()
        }

        "/graphql" | "/graphiql" => method_not_allowed(),

        _ => not_found(&method, &path),
    }
}

/// Handles a request to `/graphql`. The body is a single GraphQL request or a
/// batch of them, encoded as JSON.
async fn handle_api<B>(req: Request<B>, ctx: &Context) -> Response
where
    B: Body<Data = Bytes> + Send,
    B::Error: fmt::Display,
{
    let before = Instant::now();

    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => {
            warn!("Failed to read body of API request: {e}");
            return bad_request("failed to read request body");
        }
    };
    let request = match serde_json::from_slice::<GraphQLBatchRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Received malformed GraphQL request: {e}");
            return bad_request(format!("malformed GraphQL request: {e}"));
        }
    };

    // A fresh context per request. It does not hold a ledger connection, only
    // the resolvers that need one open it.
    let context = api::Context { ledger: ctx.ledger.clone() };
    let response = request.execute(&ctx.api_root, &context).await;
    let status = if response.is_ok() { StatusCode::OK } else { StatusCode::BAD_REQUEST };

    let out = match serde_json::to_vec(&response) {
        Ok(out) => out,
        Err(e) => {
            error!("Failed to serialize GraphQL response: {e}");
            return internal_server_error();
        }
    };
    debug!("Executed API request in {:.2?}", before.elapsed());

    hyper::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(out.into()))
        .unwrap()
}
