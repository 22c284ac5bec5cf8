pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod request;
pub mod retry;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use client::{with_resilience, ResilientClient, ResilientClientBuilder};
pub use error::{ApiError, ResponseBody, TransportError};
pub use request::{HttpRequest, HttpResponse, RequestSpec};
pub use retry::RetryPolicy;
pub use transport::{ReqwestTransport, Transport};
pub use tokio_util::sync::CancellationToken;
