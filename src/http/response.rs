use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Method, StatusCode};

use crate::prelude::*;
use super::Response;


fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response {
    hyper::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=UTF-8")
        .body(Full::new(body.into()))
        .unwrap()
}

pub(crate) fn bad_request(msg: impl Into<String>) -> Response {
    plain(StatusCode::BAD_REQUEST, msg.into())
}

pub(crate) fn method_not_allowed() -> Response {
    plain(StatusCode::METHOD_NOT_ALLOWED, "405 Method not allowed")
}

pub(crate) fn not_found(method: &Method, path: &str) -> Response {
    debug!("Responding with 404 to {:?} '{}'", method, path);
    plain(StatusCode::NOT_FOUND, "404 Not found")
}

pub(crate) fn internal_server_error() -> Response {
    plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
