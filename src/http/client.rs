//! Remote call façade.
//!
//! # Responsibilities
//! - Annotate each call with trace context and a request ID
//! - Drive the transport through the retry loop and circuit breaker
//! - Read and decode the response envelope
//! - Report the outcome to metrics and close the span last
//!
//! # Design Decisions
//! - One breaker per downstream target, owned through `Arc` so clients can share it
//! - Body read and decode failures are terminal; only the send is retried
//! - Envelope error codes never reach the breaker

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn, Instrument};
use url::Url;

use crate::config::{ClientConfig, RetryConfig};
use crate::http::error::RemoteError;
use crate::http::request::{CallContext, OutboundRequest};
use crate::http::response::{Reply, ResponseEnvelope};
use crate::http::transport::{HttpTransport, Transport, TransportError};
use crate::observability::{metrics, SpanRecorder, TracePropagator};
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_LOGGED_BODY: usize = 512;

/// Resilient client for one downstream target.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy<TransportError>,
    propagator: TracePropagator,
    timeout: Duration,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    pub fn builder() -> RemoteClientBuilder {
        RemoteClientBuilder::default()
    }

    /// Build a client from loaded configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, RemoteError> {
        let mut builder = Self::builder()
            .timeout(config.timeouts.request())
            .breaker(CircuitBreakerConfig::from(&config.breaker))
            .retry(&config.retries);
        if let Some(proxy) = &config.proxy.url {
            builder = builder.proxy(proxy);
        }
        builder.build()
    }

    /// Replace this client's breaker with one shared by other clients of the same target.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform one logical call and return the decoded envelope.
    pub async fn call(&self, ctx: &CallContext, mut request: OutboundRequest) -> Result<ResponseEnvelope, RemoteError> {
        let start = Instant::now();
        let span = self.propagator.annotate(&mut request, ctx.trace());
        let request_id = request.ensure_request_id();

        let result = self
            .execute(ctx, &request)
            .instrument(span.tracing_span())
            .await;

        let outcome = match &result {
            Ok(envelope) if envelope.is_success() => "success",
            Ok(_) => "declined",
            Err(e) => e.kind(),
        };
        if let Err(e) = &result {
            span.tracing_span().in_scope(|| {
                error!(
                    target_name = %self.breaker.name(),
                    request_id = %request_id,
                    method = %request.method,
                    url = %request.url,
                    error = %e,
                    "remote call failed"
                )
            });
        }
        metrics::record_call(self.breaker.name(), outcome, start);

        span.finish();
        result
    }

    /// Perform a call and decode the payload of a successful envelope.
    pub async fn fetch<T>(&self, ctx: &CallContext, request: OutboundRequest) -> Result<Reply<T>, RemoteError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.call(ctx, request).await?.into_reply()
    }

    async fn execute(&self, ctx: &CallContext, request: &OutboundRequest) -> Result<ResponseEnvelope, RemoteError> {
        let transport = &self.transport;
        let timeout = self.timeout;

        let response = self
            .retry
            .run(&self.breaker, ctx.cancellation(), move |attempt| {
                debug!(attempt, method = %request.method, url = %request.url, "Sending request");
                with_deadline(timeout, transport.send(request))
            })
            .await?;

        debug!(status = %response.status, "Response received");

        let body = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => return Err(RemoteError::Cancelled),
            body = with_deadline(timeout, response.read_body()) => body.map_err(RemoteError::BodyRead)?,
        };

        debug!(
            body_len = body.len(),
            body = %String::from_utf8_lossy(&body[..body.len().min(MAX_LOGGED_BODY)]),
            "Response body read"
        );

        ResponseEnvelope::from_slice(&body)
    }
}

/// Builder for [`RemoteClient`].
pub struct RemoteClientBuilder {
    timeout: Duration,
    proxy: Option<Url>,
    breaker: CircuitBreakerConfig,
    retry: RetryPolicy<TransportError>,
    recorder: Option<Arc<dyn SpanRecorder>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for RemoteClientBuilder {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
            breaker: CircuitBreakerConfig::default(),
            retry: transport_policy(&RetryConfig::default()),
            recorder: None,
            transport: None,
        }
    }
}

impl RemoteClientBuilder {
    /// Per-attempt deadline. A zero duration is ignored.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("Ignoring zero request timeout");
        } else {
            self.timeout = timeout;
        }
        self
    }

    /// Route requests through a forward proxy. An unparseable URL is ignored.
    pub fn proxy(mut self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(url) => self.proxy = Some(url),
            Err(e) => warn!(proxy = %url, error = %e, "Ignoring invalid proxy URL"),
        }
        self
    }

    pub fn breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn retry(mut self, config: &RetryConfig) -> Self {
        self.retry = transport_policy(config);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn SpanRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Use a custom transport instead of the `reqwest` one. The proxy option is then unused.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<RemoteClient, RemoteError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(self.proxy.as_ref())
                    .map_err(|e| RemoteError::InvalidRequest(format!("could not build transport: {e}")))?,
            ),
        };
        let propagator = match self.recorder {
            Some(recorder) => TracePropagator::new(recorder),
            None => TracePropagator::default(),
        };

        Ok(RemoteClient {
            transport,
            breaker: Arc::new(CircuitBreaker::new(self.breaker)),
            retry: self.retry,
            propagator,
            timeout: self.timeout,
        })
    }
}

fn transport_policy(config: &RetryConfig) -> RetryPolicy<TransportError> {
    RetryPolicy::from(config).with_classifier(TransportError::is_retryable)
}
