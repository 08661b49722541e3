//! HTTP server exposing the GraphQL API.
//!
//! Only listener setup and panic handling live here, routing is done in
//! `handlers.rs`.

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use std::{
    convert::Infallible,
    fs,
    future::Future,
    net::{IpAddr, SocketAddr},
    os::unix::fs::PermissionsExt,
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::Arc,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, UnixListener},
};

use crate::{api, ledger::Ledger, prelude::*};
use self::{
    handlers::handle,
    response::internal_server_error,
};


mod handlers;
mod log;
mod response;


/// HTTP server configuration.
#[derive(Debug, Clone, confique::Config)]
pub(crate) struct HttpConfig {
    /// The TCP port the HTTP server should listen on.
    #[config(default = 3080)]
    pub(crate) port: u16,

    /// The bind address to listen on.
    #[config(default = "127.0.0.1")]
    pub(crate) address: IpAddr,

    /// Unix domain socket to listen on. Specifying this will overwrite
    /// the TCP configuration. Example: "/tmp/bank-ledger.socket".
    pub(crate) unix_socket: Option<PathBuf>,

    /// Unix domain socket file permissions.
    #[config(default = 0o755)]
    pub(crate) unix_socket_permissions: u32,
}


// All our responses have their body fully in memory.
type Response = hyper::Response<Full<Bytes>>;
type Request<B> = hyper::Request<B>;


/// Context that the request handler has access to.
struct Context {
    api_root: api::RootNode,
    ledger: Arc<dyn Ledger>,
    log_headers: bool,
}


/// Starts the HTTP server and runs it until Ctrl-C is received.
pub(crate) async fn serve(
    config: &HttpConfig,
    log_headers: bool,
    api_root: api::RootNode,
    ledger: Arc<dyn Ledger>,
) -> Result<()> {
    let ctx = Arc::new(Context { api_root, ledger, log_headers });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // TCP and Unix listeners have no common trait, so the accept loop is
    // written once as macro.
    macro_rules! accept_loop {
        ($listener:expr) => {
            loop {
                let stream = tokio::select! {
                    res = $listener.accept() => match res {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    },
                    _ = &mut shutdown => {
                        info!("Received Ctrl-C: shutting down HTTP server");
                        break;
                    }
                };

                serve_connection(stream, Arc::clone(&ctx));
            }
        };
    }

    if let Some(unix_socket) = &config.unix_socket {
        // Bind to Unix domain socket.
        if unix_socket.exists() {
            fs::remove_file(unix_socket)
                .context(format!("failed to remove old socket '{}'", unix_socket.display()))?;
        }
        let listener = UnixListener::bind(unix_socket)
            .context(format!("failed to bind to '{}'", unix_socket.display()))?;
        let permissions = fs::Permissions::from_mode(config.unix_socket_permissions);
        fs::set_permissions(unix_socket, permissions)?;
        info!("Listening on unix://{}", unix_socket.display());
        accept_loop!(listener);
    } else {
        // Bind to TCP socket.
        let addr = SocketAddr::new(config.address, config.port);
        let listener = TcpListener::bind(addr).await
            .context(format!("failed to bind to {addr}"))?;
        info!("Listening on http://{}", listener.local_addr()?);
        accept_loop!(listener);
    }

    Ok(())
}

/// Serves HTTP/1 and HTTP/2 on the given connection in a new task.
fn serve_connection<S>(stream: S, ctx: Arc<Context>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            handle_internal_errors(async move { handle(req, &ctx).await })
        });

        let result = auto::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service)
            .await;
        if let Err(e) = result {
            debug!("Error while serving HTTP connection: {e}");
        }
    });
}

/// Polls `future` to completion and turns a panic into a `500` response, so
/// that the connection is answered instead of dropped.
async fn handle_internal_errors(
    future: impl Future<Output = Response>,
) -> Result<Response, Infallible> {
    // Requests only share the immutable root node and the ledger handle, so
    // a panic cannot leave shared state half-updated.
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(response) => Ok(response),
        Err(panic) => {
            // `panic!` payloads are `&str` or `String` in practice.
            let msg = panic.downcast_ref::<String>()
                .map(|s| s.as_str())
                .or(panic.downcast_ref::<&str>().copied());

            match msg {
                Some(msg) => error!("HTTP handler panicked, answering with 500: '{msg}'"),
                None => error!("HTTP handler panicked, answering with 500"),
            }

            Ok(internal_server_error())
        }
    }
}


#[cfg(test)]
mod tests {
    use hyper::StatusCode;
    use super::*;

    fn explode() -> Response {
        panic!("boom");
    }

    #[tokio::test]
    async fn panic_becomes_500() {
        let response = handle_internal_errors(async { explode() }).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
