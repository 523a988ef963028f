//! Transport adapters driving endpoints from HTTP requests, gRPC calls and
//! bus messages, plus the hooks shared between them.

pub mod grpc;
pub mod http;
pub mod logging;
pub mod message;
pub mod request_id;

use courier_core::{Context, EndpointError};

/// Observes every pipeline failure before the error is encoded.
///
/// Handlers must not alter the outcome; they exist for logging and metrics.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &Context, err: &EndpointError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&Context, &EndpointError) + Send + Sync + 'static,
{
    fn handle(&self, ctx: &Context, err: &EndpointError) {
        self(ctx, err);
    }
}

/// Default [`ErrorHandler`]: one `error` record per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, ctx: &Context, err: &EndpointError) {
        tracing::error!(
            request_id = %logging::request_id(ctx),
            error = %err,
            "request failed"
        );
    }
}
