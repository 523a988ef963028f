//! Endpoint-to-message adapter.

use std::fmt;
use std::sync::Arc;

use courier_core::{boxed, BoxEndpoint, Call, Context, EndpointError, Message};
use tower::{Service, ServiceExt};

use super::codec::{DecodeRequest, EncodeResponse};
use super::{AfterHook, BeforeHook, Disposition, ErrorEncoder, FinalizerHook};
use crate::transport::{ErrorHandler, LogErrorHandler};

/// Handles consumed messages with one endpoint.
///
/// Per message: fresh [`Context`] → before hooks → decode → endpoint → after
/// hooks → encode. A failure at any stage goes to the error handler, then to
/// the error encoder if one is set, and is returned so the bus client can
/// nack. Finalizers run exactly once per message, with the context the hooks
/// produced, and the context is cancelled afterwards.
///
/// Context metadata carried by the message itself is not inherited; use
/// before hooks such as
/// [`correlation_id_to_context`](crate::transport::request_id::correlation_id_to_context)
/// to lift what is needed.
pub struct Subscriber<Req, Resp> {
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
    error_encoder: Option<ErrorEncoder>,
}

impl<Req, Resp> Clone for Subscriber<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, Resp> fmt::Debug for Subscriber<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("before", &self.shared.before.len())
            .field("after", &self.shared.after.len())
            .field("finalizers", &self.shared.finalizers.len())
            .field("error_encoder", &self.shared.error_encoder.is_some())
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> Subscriber<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn builder<E, D, C>(endpoint: E, decoder: D, encoder: C) -> SubscriberBuilder<Req, Resp>
    where
        E: Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
        E::Future: Send + 'static,
        D: DecodeRequest<Req>,
        C: EncodeResponse<Resp>,
    {
        SubscriberBuilder {
            shared: Shared {
                endpoint: boxed(endpoint),
                decoder: Box::new(decoder),
                encoder: Box::new(encoder),
                before: Vec::new(),
                after: Vec::new(),
                finalizers: Vec::new(),
                error_handler: Arc::new(LogErrorHandler),
                error_encoder: None,
            },
        }
    }

    /// Handles one message.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed stage; the caller should nack.
    pub async fn handle(&self, msg: &Message) -> Result<(), EndpointError> {
        let shared = &*self.shared;
        let mut finalize = Finalize {
            hooks: &shared.finalizers,
            ctx: Context::new(),
            msg,
            done: false,
        };

        for hook in &shared.before {
            finalize.ctx = hook(std::mem::take(&mut finalize.ctx), msg);
        }

        match shared.run(&mut finalize.ctx, msg).await {
            Ok(()) => {
                finalize.finish(Disposition::Acked);
                Ok(())
            }
            Err(err) => {
                shared.error_handler.handle(&finalize.ctx, &err);
                if let Some(encode_error) = &shared.error_encoder {
                    encode_error(&finalize.ctx, &err, msg);
                }
                finalize.finish(Disposition::Failed(&err));
                Err(err)
            }
        }
    }
}

impl<Req, Resp> Shared<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn run(&self, ctx: &mut Context, msg: &Message) -> Result<(), EndpointError> {
        let request = self.decoder.decode(ctx, msg)?;
        let response = self
            .endpoint
            .clone()
            .oneshot(Call::new(ctx.clone(), request))
            .await?;

        for hook in &self.after {
            *ctx = hook(std::mem::take(ctx));
        }

        self.encoder.encode(ctx, msg, response)
    }
}

/// Runs the finalizers exactly once: through [`Finalize::finish`], or on
/// drop as [`Disposition::Aborted`].
struct Finalize<'a> {
    hooks: &'a [FinalizerHook],
    ctx: Context,
    msg: &'a Message,
    done: bool,
}

impl Finalize<'_> {
    fn finish(mut self, disposition: Disposition<'_>) {
        self.run(disposition);
    }

    fn run(&mut self, disposition: Disposition<'_>) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        for hook in self.hooks {
            hook(&self.ctx, self.msg, disposition);
        }
        self.ctx.cancel();
    }
}

impl Drop for Finalize<'_> {
    fn drop(&mut self) {
        self.run(Disposition::Aborted);
    }
}

// ---------------------------------------------------------------------------
// SubscriberBuilder
// ---------------------------------------------------------------------------

/// Configures hooks and error handling of a [`Subscriber`].
pub struct SubscriberBuilder<Req, Resp> {
    shared: Shared<Req, Resp>,
}

impl<Req, Resp> SubscriberBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Adds a hook run before decoding, in registration order.
    #[must_use]
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &Message) -> Context + Send + Sync + 'static,
    {
        self.shared.before.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context) -> Context + Send + Sync + 'static,
    {
        self.shared.after.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn finalizer<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &Message, Disposition<'_>) + Send + Sync + 'static,
    {
        self.shared.finalizers.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.shared.error_handler = Arc::new(handler);
        self
    }

    /// Sets a hook that sees every failure with its message, e.g. to publish
    /// it to a dead-letter topic.
    #[must_use]
    pub fn error_encoder<F>(mut self, encoder: F) -> Self
    where
        F: Fn(&Context, &EndpointError, &Message) + Send + Sync + 'static,
    {
        self.shared.error_encoder = Some(Arc::new(encoder));
        self
    }

    #[must_use]
    pub fn build(self) -> Subscriber<Req, Resp> {
        Subscriber {
            shared: Arc::new(self.shared),
        }
    }
}
