//! Async TCP server that hosts one composed pipeline.
//!
//! Every accepted connection runs in its own Tokio task and every request on
//! it is wrapped in a fresh [`Context`] and sent through the same shared
//! handler, typically a [`Pipeline`](crate::Pipeline). HTTP/1.1 keep-alive is
//! supported.
//!
//! The server is the one place where a pipeline failure becomes a response:
//! an `Err` coming out of the handler is logged and answered with
//! `500 Internal Server Error`.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::{
    context::Context,
    handler::RequestHandler,
    http::{
        StatusCode,
        request::{Request, RequestError},
        response::Response,
    },
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// HTTP/1.1 server dispatching into a [`RequestHandler<Context, Response>`].
///
/// # Examples
///
/// ```rust,no_run
/// use onionskin::{Context, Pipeline, Response, StatusCode, handler_fn};
/// use onionskin::middleware::LoggerMiddleware;
/// use onionskin::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = Pipeline::builder()
///         .layer(LoggerMiddleware)
///         .build(handler_fn(|_ctx: Context| async {
///             Ok(Response::new(StatusCode::Ok).body("Hello!"))
///         }))?;
///
///     Server::bind("127.0.0.1:8080").await?.run(pipeline).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches each request to `handler`.
    ///
    /// The handler is shared by all connection tasks; it is never mutated.
    /// Runs until the process ends or the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H>(self, handler: H) -> Result<(), ServerError>
    where
        H: RequestHandler<Context, Response> + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "onionskin listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// One step of splitting the connection buffer into requests.
#[derive(Debug)]
enum Frame {
    /// A complete request occupying the first `len` bytes of the buffer.
    Ready { request: Request, len: usize },
    Incomplete,
    TooLarge,
    Malformed(RequestError),
}

/// Finds the complete request at the start of `buf`, if there is one.
///
/// `buf` is not modified; the caller drops the first `len` bytes once served.
///
/// Bytes after the request's body belong to the next pipelined request and
/// are left for the following call.
fn frame(buf: &[u8]) -> Frame {
    let (request, body_offset) = match Request::parse(buf) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) => return Frame::Incomplete,
        Err(e) => return Frame::Malformed(e),
    };

    let len = match body_offset.checked_add(request.content_length().unwrap_or(0)) {
        Some(len) if len <= MAX_REQUEST_SIZE => len,
        _ => return Frame::TooLarge,
    };
    if buf.len() < len {
        return Frame::Incomplete;
    }

    let request = request.with_body(buf[body_offset..len].to_vec());
    Frame::Ready { request, len }
}

/// Serves requests on one connection until the peer closes it or asks for
/// `Connection: close`.
///
/// Requests already sitting in the buffer are answered in order before the
/// socket is read again.
async fn handle_connection<H>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: RequestHandler<Context, Response> + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        match frame(&buf) {
            Frame::Ready { request, len } => {
                let _ = buf.split_to(len);
                let keep_alive = request.is_keep_alive();
                debug!(
                    peer = %peer_addr,
                    method = %request.method(),
                    path = %request.path(),
                    "dispatching request"
                );

                let response = match handler.handle(Context::new(request)).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(peer = %peer_addr, error = %e, "pipeline failed, sending 500");
                        Response::new(StatusCode::InternalServerError).body("Internal Server Error")
                    }
                };
                stream
                    .write_all(&response.keep_alive(keep_alive).into_bytes())
                    .await?;
                stream.flush().await?;

                if !keep_alive {
                    debug!(peer = %peer_addr, "Connection: close — shutting down");
                    break;
                }
                continue;
            }
            Frame::Incomplete => {}
            Frame::TooLarge => {
                warn!(peer = %peer_addr, "request too large — sending 413");
                write_too_large(&mut stream).await?;
                break;
            }
            Frame::Malformed(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        }

        let bytes_read = stream.read_buf(&mut buf).await?;
        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large — sending 413");
            write_too_large(&mut stream).await?;
            break;
        }
    }

    Ok(())
}

async fn write_too_large(stream: &mut TcpStream) -> Result<(), std::io::Error> {
    let response = Response::new(StatusCode::PayloadTooLarge)
        .body("Request entity too large")
        .keep_alive(false);
    stream.write_all(&response.into_bytes()).await
}
