//! Endpoint-to-gRPC adapter.

use std::fmt;
use std::sync::Arc;

use courier_core::{boxed, BoxEndpoint, Call, Context, EndpointError};
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tower::{Service, ServiceExt};

use super::codec::{DecodeRequest, EncodeResponse};
use super::{default_code, status_from_error, AfterHook, AnyMessage, BeforeHook, FinalizerHook};
use super::{GrpcReply, GrpcRequest};
use crate::transport::{ErrorHandler, LogErrorHandler};

type CodeMapping = dyn Fn(&EndpointError) -> Code + Send + Sync;

/// Serves one endpoint as a unary gRPC method.
///
/// Same pipeline as the HTTP server: fresh [`Context`] → before hooks →
/// decode → endpoint → after hooks → encode, failures to the error handler
/// and then to a [`Status`]. Finalizers run exactly once per call; a call
/// whose future is dropped is reported as [`EndpointError::Cancelled`].
pub struct GrpcServer<Req, Resp> {
    shared: Arc<Shared<Req, Resp>>,
}

struct Shared<Req, Resp> {
    endpoint: BoxEndpoint<Req, Resp>,
    decoder: Box<dyn DecodeRequest<Req>>,
    encoder: Box<dyn EncodeResponse<Resp>>,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
    finalizers: Vec<FinalizerHook>,
    error_handler: Arc<dyn ErrorHandler>,
    code_for: Arc<CodeMapping>,
}

impl<Req, Resp> Clone for GrpcServer<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, Resp> fmt::Debug for GrpcServer<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcServer")
            .field("before", &self.shared.before.len())
            .field("after", &self.shared.after.len())
            .field("finalizers", &self.shared.finalizers.len())
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> GrpcServer<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Starts building a server for `endpoint` with the given codecs.
    pub fn builder<E, D, C>(endpoint: E, decoder: D, encoder: C) -> GrpcServerBuilder<Req, Resp>
    where
        E: Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
        E::Future: Send + 'static,
        D: DecodeRequest<Req>,
        C: EncodeResponse<Resp>,
    {
        GrpcServerBuilder {
            shared: Shared {
                endpoint: boxed(endpoint),
                decoder: Box::new(decoder),
                encoder: Box::new(encoder),
                before: Vec::new(),
                after: Vec::new(),
                finalizers: Vec::new(),
                error_handler: Arc::new(LogErrorHandler),
                code_for: Arc::new(default_code),
            },
        }
    }

    /// Handles one unary call.
    ///
    /// # Errors
    ///
    /// Returns the [`Status`] rendered from the first failed stage.
    pub async fn serve(&self, request: GrpcRequest) -> Result<GrpcReply, Status> {
        let shared = &*self.shared;
        let GrpcRequest {
            metadata,
            peer,
            message,
        } = request;

        let mut ctx = Context::new();
        if let Some(peer) = peer {
            ctx = ctx.with_peer_addr(peer);
        }

        let mut finalize = Finalize {
            hooks: &shared.finalizers,
            ctx,
            metadata,
            error: Some(EndpointError::Cancelled),
        };

        for hook in &shared.before {
            finalize.ctx = hook(std::mem::take(&mut finalize.ctx), &finalize.metadata);
        }

        match shared.run(&mut finalize.ctx, message).await {
            Ok(reply) => {
                finalize.error = None;
                Ok(reply)
            }
            Err(err) => {
                shared.error_handler.handle(&finalize.ctx, &err);
                let status = status_from_error(&err, &*shared.code_for);
                finalize.error = Some(err);
                Err(status)
            }
        }
    }
}

impl<Req, Resp> Shared<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn run(&self, ctx: &mut Context, message: AnyMessage) -> Result<GrpcReply, EndpointError> {
        let request = self.decoder.decode(ctx, message)?;
        let response = self
            .endpoint
            .clone()
            .oneshot(Call::new(ctx.clone(), request))
            .await?;

        let mut metadata = MetadataMap::new();
        for hook in &self.after {
            *ctx = hook(std::mem::take(ctx), &mut metadata);
        }

        let message = self.encoder.encode(ctx, response)?;
        Ok(GrpcReply { metadata, message })
    }
}

/// Runs the finalizers when dropped, on every exit path of a call.
struct Finalize<'a> {
    hooks: &'a [FinalizerHook],
    ctx: Context,
    metadata: MetadataMap,
    error: Option<EndpointError>,
}

impl Drop for Finalize<'_> {
    fn drop(&mut self) {
        for hook in self.hooks {
            hook(&self.ctx, &self.metadata, self.error.as_ref());
        }
        self.ctx.cancel();
    }
}

// ---------------------------------------------------------------------------
// GrpcServerBuilder
// ---------------------------------------------------------------------------

/// Configures hooks and error handling of a [`GrpcServer`].
pub struct GrpcServerBuilder<Req, Resp> {
    shared: Shared<Req, Resp>,
}

impl<Req, Resp> GrpcServerBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    #[must_use]
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &MetadataMap) -> Context + Send + Sync + 'static,
    {
        self.shared.before.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &mut MetadataMap) -> Context + Send + Sync + 'static,
    {
        self.shared.after.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn finalizer<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &MetadataMap, Option<&EndpointError>) + Send + Sync + 'static,
    {
        self.shared.finalizers.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.shared.error_handler = Arc::new(handler);
        self
    }

    /// Replaces the error-to-code mapping.
    #[must_use]
    pub fn code_mapping<F>(mut self, code_for: F) -> Self
    where
        F: Fn(&EndpointError) -> Code + Send + Sync + 'static,
    {
        self.shared.code_for = Arc::new(code_for);
        self
    }

    #[must_use]
    pub fn build(self) -> GrpcServer<Req, Resp> {
        GrpcServer {
            shared: Arc::new(self.shared),
        }
    }
}
