//! Retry + circuit breaker composition around a single upstream.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::ApiError;
use crate::request::{HttpRequest, HttpResponse, RequestSpec};
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wger_core::{Clock, RandomSource, WgerConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Run `operation` under the given policies.
///
/// The breaker is consulted before every attempt, so a circuit that opens
/// halfway through a retry sequence stops it. `operation` receives the 1-based
/// attempt number. Cancellation drops the in-flight attempt or backoff wait.
pub async fn with_resilience<T, F, Fut>(
    retry: Option<&RetryPolicy>,
    breaker: Option<&CircuitBreaker>,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt: u32 = 1;

    loop {
        if let Some(breaker) = breaker {
            if !breaker.can_execute() {
                tracing::warn!("{} rejected: circuit breaker is open", label);
                return Err(breaker.open_error());
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Aborted),
            outcome = operation(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => {
                if let Some(breaker) = breaker {
                    breaker.on_success();
                }
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(ApiError::Aborted) => return Err(ApiError::Aborted),
            Err(error) => error,
        };

        if let Some(breaker) = breaker {
            breaker.on_failure();
        }

        let Some(policy) = retry.filter(|p| p.should_retry(&error, attempt)) else {
            if attempt > 1 {
                tracing::warn!("{} failed after {} attempts: {}", label, attempt, error);
            }
            return Err(error);
        };

        tracing::warn!(
            "{} failed on attempt {}/{}: {}",
            label,
            attempt,
            policy.max_attempts(),
            error
        );

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Aborted),
            waited = policy.delay(attempt) => waited,
        };
        tracing::debug!("{} retrying after {}ms", label, waited.as_millis());

        attempt += 1;
    }
}

/// HTTP client for one configured base URL. Owns its circuit breaker, so two
/// clients never share breaker state.
pub struct ResilientClient {
    base_url: Url,
    transport: Arc<dyn Transport>,
    retry: Option<RetryPolicy>,
    breaker: Option<CircuitBreaker>,
    timeout: Duration,
    headers: HeaderMap,
}

impl ResilientClient {
    pub fn builder(base_url: Url, transport: Arc<dyn Transport>) -> ResilientClientBuilder {
        ResilientClientBuilder {
            base_url,
            transport,
            retry: None,
            breaker: None,
            timeout: DEFAULT_TIMEOUT,
            headers: HeaderMap::new(),
        }
    }

    /// Build from the `[api]`, `[retry]` and `[circuit_breaker]` sections.
    /// `base_url` is expected to have passed URL validation already.
    pub fn from_config(
        config: &WgerConfig,
        base_url: Url,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, ApiError> {
        let mut builder = Self::builder(base_url, transport)
            .timeout(Duration::from_millis(config.api.timeout_ms));
        if let Some(retry) = &config.retry {
            builder = builder.retry(RetryPolicy::new(retry, clock.clone(), random));
        }
        if let Some(breaker) = &config.circuit_breaker {
            builder = builder.circuit_breaker(CircuitBreaker::new(breaker, clock));
        }
        if let Some(token) = &config.api.token {
            builder = builder.token(token)?;
        }
        Ok(builder.build())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub async fn execute(&self, spec: &RequestSpec) -> Result<HttpResponse, ApiError> {
        self.execute_with_cancel(spec, &CancellationToken::new())
            .await
    }

    /// Execute `spec`; firing `cancel` aborts whichever attempt or wait is in progress.
    pub async fn execute_with_cancel(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ApiError> {
        let request = self.build_request(spec)?;
        let label = format!("{} {}", spec.method, spec.path);

        with_resilience(
            self.retry.as_ref(),
            self.breaker.as_ref(),
            cancel,
            &label,
            |_| self.attempt(request.clone()),
        )
        .await
    }

    async fn attempt(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let timeout_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Err(_) => Err(ApiError::Timeout {
                timeout_ms,
                message: format!("timeout of {}ms exceeded", timeout_ms),
            }),
            Ok(Err(err)) => Err(err.normalize(timeout_ms)),
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(response.into_error()),
        }
    }

    fn build_request(&self, spec: &RequestSpec) -> Result<HttpRequest, ApiError> {
        let mut url = self.endpoint_url(&spec.path)?;
        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(spec.query.iter());
        }

        let mut headers = self.headers.clone();
        let body = match &spec.body {
            Some(value) => {
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| ApiError::InvalidRequest(format!("body encoding: {}", e)))?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(Bytes::from(encoded))
            }
            None => None,
        };

        Ok(HttpRequest {
            method: spec.method.clone(),
            url,
            headers,
            body,
        })
    }

    /// Resolve `path` below the base URL, keeping any path prefix the base has.
    fn endpoint_url(&self, path: &str) -> Result<Url, ApiError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest(format!("bad path '{}': {}", path, e)))
    }
}

pub struct ResilientClientBuilder {
    base_url: Url,
    transport: Arc<dyn Transport>,
    retry: Option<RetryPolicy>,
    breaker: Option<CircuitBreaker>,
    timeout: Duration,
    headers: HeaderMap,
}

impl ResilientClientBuilder {
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// `Authorization: Token <key>`, the wger API key scheme.
    pub fn token(self, token: &str) -> Result<Self, ApiError> {
        let mut value = HeaderValue::from_str(&format!("Token {}", token))
            .map_err(|_| ApiError::InvalidRequest("API token is not a valid header value".into()))?;
        value.set_sensitive(true);
        Ok(self.header(AUTHORIZATION, value))
    }

    pub fn build(mut self) -> ResilientClient {
        self.headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        ResilientClient {
            base_url: self.base_url,
            transport: self.transport,
            retry: self.retry,
            breaker: self.breaker,
            timeout: self.timeout,
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and replies from a fixed script.
    struct ScriptedTransport {
        replies: Mutex<Vec<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(mut replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
        }
    }

    fn client(base: &str, transport: Arc<ScriptedTransport>) -> ResilientClient {
        ResilientClient::builder(Url::parse(base).unwrap(), transport).build()
    }

    #[tokio::test]
    async fn test_builds_url_query_and_body() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client("https://wger.example.com/sub", transport.clone());

        let spec = RequestSpec::new(reqwest::Method::POST, "/api/v2/workout/")
            .query("limit", 10)
            .json(serde_json::json!({"name": "Push day"}));
        client.execute(&spec).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(
            req.url.as_str(),
            "https://wger.example.com/sub/api/v2/workout/?limit=10"
        );
        assert_eq!(req.headers[CONTENT_TYPE], "application/json");
        assert_eq!(req.headers[ACCEPT], "application/json");
        assert_eq!(
            req.body.as_deref(),
            Some(br#"{"name":"Push day"}"#.as_slice())
        );
    }

    #[tokio::test]
    async fn test_token_header_is_sensitive() {
        let transport = ScriptedTransport::new(vec![]);
        let client = ResilientClient::builder(
            Url::parse("https://wger.de").unwrap(),
            transport.clone(),
        )
        .token("s3cret")
        .unwrap()
        .build();
        client.execute(&RequestSpec::get("/api/v2/")).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let auth = &seen[0].headers[AUTHORIZATION];
        assert_eq!(auth, "Token s3cret");
        assert!(auth.is_sensitive());
    }

    #[tokio::test]
    async fn test_non_success_becomes_http_error() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(403, "denied"))]);
        let client = client("https://wger.de", transport);
        let err = client
            .execute(&RequestSpec::get("/api/v2/workout/"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_transport_error_is_normalized() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::new(
            Some("ECONNRESET"),
            "socket hang up",
        ))]);
        let client = client("https://wger.de", transport);
        let err = client
            .execute(&RequestSpec::get("/api/v2/workout/"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("ECONNRESET"));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let transport = ScriptedTransport::new(vec![]);
        let result = ResilientClient::builder(Url::parse("https://wger.de").unwrap(), transport)
            .token("line\nbreak");
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }
}
