//! Endpoint-level instrumentation: one span, one log record and two metrics
//! per call.

use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use courier_core::{Call, EndpointError, EndpointFuture, Middleware};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

/// Counter of completed calls, labelled by `endpoint` and `outcome`.
pub const CALLS_TOTAL: &str = "courier_endpoint_calls_total";

/// Histogram of call durations in seconds, labelled by `endpoint`.
pub const DURATION_SECONDS: &str = "courier_endpoint_duration_seconds";

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments an endpoint with timing and outcome.
#[derive(Debug, Clone, Copy)]
pub struct LoggingLayer {
    endpoint: &'static str,
}

impl LoggingLayer {
    /// `endpoint` names the wrapped endpoint in spans and metric labels.
    #[must_use]
    pub fn new(endpoint: &'static str) -> Self {
        Self { endpoint }
    }

    /// Returns this layer as a named, chainable middleware.
    #[must_use]
    pub fn middleware<Req, Resp>(self) -> Middleware<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Middleware::from_layer("logging", self)
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            endpoint: self.endpoint,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    endpoint: &'static str,
}

impl<S, Req> Service<Call<Req>> for LoggingService<S>
where
    S: Service<Call<Req>, Error = EndpointError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = EndpointError;
    type Future = EndpointFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let endpoint = self.endpoint;
        let request_id = call
            .ctx
            .request_id()
            .map_or_else(|| "-".to_string(), |id| id.to_string());

        let span = info_span!(
            "endpoint",
            endpoint,
            request_id = %request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) if err.is_auth() => "rejected",
                    Err(_) => "error",
                };

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!(CALLS_TOTAL, "endpoint" => endpoint, "outcome" => outcome)
                    .increment(1);
                metrics::histogram!(DURATION_SECONDS, "endpoint" => endpoint)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::info!(duration_ms, outcome, "endpoint call complete"),
                    Err(err) => {
                        tracing::warn!(duration_ms, outcome, error = %err, "endpoint call failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{endpoint_fn, AuthError, Context, RequestId};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn passes_response_through() {
        let svc = LoggingLayer::new("echo")
            .layer(endpoint_fn(|_ctx: Context, n: u32| async move { Ok::<_, EndpointError>(n) }));
        let ctx = Context::new().with_request_id(RequestId::new());
        assert_eq!(svc.oneshot(Call::new(ctx, 3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn passes_errors_through() {
        let svc = LoggingLayer::new("guarded")
            .middleware::<u32, u32>()
            .apply(endpoint_fn(|_ctx: Context, _n: u32| async {
                Err::<u32, _>(EndpointError::from(AuthError::TokenMissing))
            }));
        let err = svc.oneshot(Call::new(Context::new(), 3)).await.unwrap_err();
        assert_eq!(err.auth_error(), Some(AuthError::TokenMissing));
    }
}
