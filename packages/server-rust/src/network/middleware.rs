//! Host-level Tower layers applied to every HTTP route.
//!
//! Ordering is outer-to-inner: the first layer listed sees the request first
//! and the response last.

use axum::http::StatusCode;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;

/// The composed layer produced by [`build_http_layers`].
pub type HttpLayers = Stack<
    TimeoutLayer,
    Stack<RequestBodyLimitLayer, Stack<TraceLayer<SharedClassifier<ServerErrorsAsFailures>>, Identity>>,
>;

/// Builds the host layers:
/// 1. `Trace`: one span per request
/// 2. `RequestBodyLimit`: rejects oversized bodies before any handler runs
/// 3. `Timeout`: host deadline, answered with 408
///
/// The body limit sits outside the timeout: `Timeout` needs a `Default`
/// response body, which the limit's wrapped body is not.
///
/// Endpoint-level concerns (auth, retry, logging) are endpoint middleware,
/// not layers here.
#[must_use]
pub fn build_http_layers(config: &HttpConfig) -> HttpLayers {
    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.body_limit))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
        .into_inner()
}
