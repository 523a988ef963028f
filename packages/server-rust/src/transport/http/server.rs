//! Endpoint-to-HTTP adapter.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::Response;
use courier_core::{boxed, BoxEndpoint, Call, Context, EndpointError};
use http::request::Parts;
use http::{HeaderMap, Request, StatusCode};
use tower::{Service, ServiceExt};

use super::codec::{DecodeRequest, EncodeResponse, ErrorEncoder};
use super::{AfterHook, BeforeHook, FinalizerHook};
use crate::transport::{ErrorHandler, LogErrorHandler};

/// Default cap on collected request bodies.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Serves one endpoint over HTTP.
///
/// Per request: fresh [`Context`] → before hooks → collect and decode body →
/// endpoint → after hooks → encode. Any failure goes to the error handler and
/// then the [`ErrorEncoder`]. Finalizers run exactly once per request with
/// the final status, including when the request future is dropped (reported
/// as 500). The context is cancelled once the finalizers have run.
///
/// `HttpServer` is a tower service; mount it with
/// [`axum::Router::route_service`] or the `*_service` method routers.
pub struct HttpServer<Req, Resp> {
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
    error_encoder: ErrorEncoder,
    body_limit: usize,
}

impl<Req, Resp> Clone for HttpServer<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, Resp> fmt::Debug for HttpServer<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("before", &self.shared.before.len())
            .field("after", &self.shared.after.len())
            .field("finalizers", &self.shared.finalizers.len())
            .field("body_limit", &self.shared.body_limit)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> HttpServer<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Starts building a server for `endpoint` with the given codecs.
    pub fn builder<E, D, C>(endpoint: E, decoder: D, encoder: C) -> HttpServerBuilder<Req, Resp>
    where
        E: Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
        E::Future: Send + 'static,
        D: DecodeRequest<Req>,
        C: EncodeResponse<Resp>,
    {
        HttpServerBuilder {
            shared: Shared {
                endpoint: boxed(endpoint),
                decoder: Box::new(decoder),
                encoder: Box::new(encoder),
                before: Vec::new(),
                after: Vec::new(),
                finalizers: Vec::new(),
                error_handler: Arc::new(LogErrorHandler),
                error_encoder: ErrorEncoder::default(),
                body_limit: DEFAULT_BODY_LIMIT,
            },
        }
    }

    async fn handle(&self, req: Request<Body>) -> Response {
        let shared = &*self.shared;
        let (parts, body) = req.into_parts();

        let mut ctx = Context::new();
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            ctx = ctx.with_peer_addr(*addr);
        }

        let mut finalize = Finalize {
            hooks: &shared.finalizers,
            ctx,
            parts,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        };

        for hook in &shared.before {
            finalize.ctx = hook(std::mem::take(&mut finalize.ctx), &finalize.parts);
        }

        let response = match shared.run(&mut finalize.ctx, &finalize.parts, body).await {
            Ok(response) => response,
            Err(err) => {
                shared.error_handler.handle(&finalize.ctx, &err);
                shared.error_encoder.encode(&err)
            }
        };

        finalize.status = response.status();
        response
    }
}

impl<Req, Resp> Shared<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn run(
        &self,
        ctx: &mut Context,
        parts: &Parts,
        body: Body,
    ) -> Result<Response, EndpointError> {
        let body = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(EndpointError::decode)?;
        let request = self.decoder.decode(ctx, parts, body)?;

        let response = self
            .endpoint
            .clone()
            .oneshot(Call::new(ctx.clone(), request))
            .await?;

        let mut headers = HeaderMap::new();
        for hook in &self.after {
            *ctx = hook(std::mem::take(ctx), &mut headers);
        }

        let mut encoded = self.encoder.encode(ctx, response)?;
        encoded.headers_mut().extend(headers);
        Ok(encoded)
    }
}

/// Runs the finalizers when dropped, on every exit path of a request.
struct Finalize<'a> {
    hooks: &'a [FinalizerHook],
    ctx: Context,
    parts: Parts,
    status: StatusCode,
}

impl Drop for Finalize<'_> {
    fn drop(&mut self) {
        for hook in self.hooks {
            hook(&self.ctx, self.status, &self.parts);
        }
        self.ctx.cancel();
    }
}

impl<Req, Resp> Service<Request<Body>> for HttpServer<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move { Ok(server.handle(req).await) })
    }
}

// ---------------------------------------------------------------------------
// HttpServerBuilder
// ---------------------------------------------------------------------------

/// Configures hooks and error handling of an [`HttpServer`].
pub struct HttpServerBuilder<Req, Resp> {
    shared: Shared<Req, Resp>,
}

impl<Req, Resp> HttpServerBuilder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Adds a hook run before decoding, in registration order.
    #[must_use]
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &Parts) -> Context + Send + Sync + 'static,
    {
        self.shared.before.push(Arc::new(hook));
        self
    }

    /// Adds a hook run after the endpoint and before encoding, in
    /// registration order. Headers it inserts are added to the response.
    #[must_use]
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(Context, &mut HeaderMap) -> Context + Send + Sync + 'static,
    {
        self.shared.after.push(Arc::new(hook));
        self
    }

    /// Adds a hook run once the response status is known.
    #[must_use]
    pub fn finalizer<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, StatusCode, &Parts) + Send + Sync + 'static,
    {
        self.shared.finalizers.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.shared.error_handler = Arc::new(handler);
        self
    }

    #[must_use]
    pub fn error_encoder(mut self, encoder: ErrorEncoder) -> Self {
        self.shared.error_encoder = encoder;
        self
    }

    /// Caps the collected request body; larger bodies fail to decode.
    #[must_use]
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.shared.body_limit = limit;
        self
    }

    #[must_use]
    pub fn build(self) -> HttpServer<Req, Resp> {
        HttpServer {
            shared: Arc::new(self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::endpoint_fn;
    use parking_lot::Mutex;

    use super::*;
    use crate::transport::http::codec::{decode_no_body, JsonEncoder};

    type Seen = Arc<Mutex<Vec<StatusCode>>>;

    fn server(seen: &Seen) -> HttpServer<(), ()> {
        let seen = Arc::clone(seen);
        HttpServer::builder(
            endpoint_fn(|_ctx: Context, (): ()| async { Ok::<_, EndpointError>(()) }),
            decode_no_body,
            JsonEncoder,
        )
        .finalizer(move |_ctx: &Context, status: StatusCode, _parts: &Parts| {
            seen.lock().push(status);
        })
        .build()
    }

    #[tokio::test]
    async fn finalizer_sees_final_status() {
        let seen: Seen = Arc::default();
        let resp = server(&seen)
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*seen.lock(), vec![StatusCode::OK]);
    }

    #[tokio::test]
    async fn abandoned_request_still_finalizes() {
        let seen_slow: Seen = Arc::default();
        let recorded = Arc::clone(&seen_slow);
        let slow = HttpServer::builder(
            endpoint_fn(|_ctx: Context, (): ()| async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok::<_, EndpointError>(())
            }),
            decode_no_body,
            JsonEncoder,
        )
        .finalizer(move |_ctx: &Context, status: StatusCode, _parts: &Parts| {
            recorded.lock().push(status);
        })
        .build();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            slow.oneshot(Request::new(Body::empty())),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(*seen_slow.lock(), vec![StatusCode::INTERNAL_SERVER_ERROR]);
    }
}
