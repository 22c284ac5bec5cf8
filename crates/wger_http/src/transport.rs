//! The network seam of the resilient client.

use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::error::Error as StdError;
use std::io;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request. Non-2xx statuses are responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(Some("ETIMEDOUT"), format!("request timed out: {}", err));
    }
    let code = io_error_code(&err);
    if err.is_connect() || err.is_request() || err.is_body() || code.is_some() {
        return TransportError::new(
            code,
            format!("No response received from server: {}", err),
        );
    }
    TransportError::new(None, err.to_string())
}

/// Walk the source chain for an `io::Error` and name it the way sockets do.
fn io_error_code(err: &reqwest::Error) -> Option<&'static str> {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
                io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
                io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
                io::ErrorKind::BrokenPipe => Some("EPIPE"),
                io::ErrorKind::AddrNotAvailable => Some("EHOSTUNREACH"),
                _ => None,
            };
        }
        source = current.source();
    }
    None
}
