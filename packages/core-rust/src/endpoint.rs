//! Endpoint contract and middleware composition.
//!
//! An endpoint is any `tower::Service<Call<Req>>` whose error type is
//! [`EndpointError`]. A [`Middleware`] transforms one endpoint into another.
//! Composition order is part of the API: [`chain`] applied to `[m1, m2, m3]`
//! yields `m1(m2(m3(e)))`, so `m1` sees the call first and the result last.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use crate::context::Context;
use crate::error::EndpointError;

/// Boxed future returned by the type-erased endpoints and the middleware in
/// this workspace.
pub type EndpointFuture<Resp> = Pin<Box<dyn Future<Output = Result<Resp, EndpointError>> + Send>>;

/// Type-erased endpoint: `Clone + Send + Sync`, shareable across calls.
pub type BoxEndpoint<Req, Resp> = BoxCloneSyncService<Call<Req>, Resp, EndpointError>;

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// A decoded request travelling through the middleware chain together with
/// its execution context.
#[derive(Debug, Clone)]
pub struct Call<Req> {
    pub ctx: Context,
    pub request: Req,
}

impl<Req> Call<Req> {
    /// Pairs a request with its context.
    pub fn new(ctx: Context, request: Req) -> Self {
        Self { ctx, request }
    }

    /// Replaces the context, keeping the request.
    #[must_use]
    pub fn with_ctx(self, ctx: Context) -> Self {
        Self {
            ctx,
            request: self.request,
        }
    }

    /// Splits the call into its context and request.
    pub fn into_parts(self) -> (Context, Req) {
        (self.ctx, self.request)
    }
}

/// Erases the concrete type of an endpoint.
pub fn boxed<S, Req, Resp>(endpoint: S) -> BoxEndpoint<Req, Resp>
where
    S: Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(endpoint)
}

// ---------------------------------------------------------------------------
// FnEndpoint
// ---------------------------------------------------------------------------

/// Endpoint backed by an async function of `(Context, Request)`.
#[derive(Clone)]
pub struct FnEndpoint<F> {
    f: F,
}

/// Lifts business logic written as `async fn(Context, Req) -> Result<Resp, EndpointError>`
/// into an endpoint.
pub fn endpoint_fn<F>(f: F) -> FnEndpoint<F> {
    FnEndpoint { f }
}

impl<F> fmt::Debug for FnEndpoint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEndpoint").finish_non_exhaustive()
    }
}

impl<F, Fut, Req, Resp> Service<Call<Req>> for FnEndpoint<F>
where
    F: Fn(Context, Req) -> Fut,
    Fut: Future<Output = Result<Resp, EndpointError>>,
{
    type Response = Resp;
    type Error = EndpointError;
    type Future = Fut;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        (self.f)(call.ctx, call.request)
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

type ApplyFn<Req, Resp> = dyn Fn(BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> + Send + Sync;

/// An `Endpoint -> Endpoint` transform.
///
/// Middleware is usable both dynamically (collected into a `Vec` and
/// composed with [`chain`]) and statically as a tower [`Layer`].
pub struct Middleware<Req, Resp> {
    name: &'static str,
    apply: Arc<ApplyFn<Req, Resp>>,
}

impl<Req, Resp> Clone for Middleware<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<Req, Resp> fmt::Debug for Middleware<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").field("name", &self.name).finish()
    }
}

impl<Req, Resp> Middleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Creates a middleware from a function over boxed endpoints.
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(BoxEndpoint<Req, Resp>) -> BoxEndpoint<Req, Resp> + Send + Sync + 'static,
    {
        Self {
            name,
            apply: Arc::new(f),
        }
    }

    /// Adapts any tower layer producing a compatible endpoint.
    pub fn from_layer<L>(name: &'static str, layer: L) -> Self
    where
        L: Layer<BoxEndpoint<Req, Resp>> + Send + Sync + 'static,
        L::Service:
            Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
        <L::Service as Service<Call<Req>>>::Future: Send + 'static,
    {
        Self::new(name, move |inner| boxed(layer.layer(inner)))
    }

    /// Creates a middleware from an async function receiving the call and
    /// the next endpoint.
    ///
    /// Code before `next` is awaited is pre-processing; code after is
    /// post-processing. Not calling `next` short-circuits the chain.
    pub fn around<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn(Call<Req>, BoxEndpoint<Req, Resp>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, EndpointError>> + Send + 'static,
    {
        Self::new(name, move |next| {
            let f = f.clone();
            boxed(endpoint_fn(move |ctx, request| {
                f(Call::new(ctx, request), next.clone())
            }))
        })
    }

    /// Name used in logs and `Debug` output.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wraps `endpoint` with this middleware.
    pub fn apply<S>(&self, endpoint: S) -> BoxEndpoint<Req, Resp>
    where
        S: Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        (self.apply)(boxed(endpoint))
    }
}

impl<S, Req, Resp> Layer<S> for Middleware<Req, Resp>
where
    S: Service<Call<Req>, Response = Resp, Error = EndpointError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Service = BoxEndpoint<Req, Resp>;

    fn layer(&self, inner: S) -> Self::Service {
        self.apply(inner)
    }
}

/// Composes middlewares outer-to-inner: `chain([m1, m2, m3])` applied to `e`
/// is `m1(m2(m3(e)))`.
pub fn chain<Req, Resp, I>(middlewares: I) -> Middleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    I: IntoIterator<Item = Middleware<Req, Resp>>,
{
    let stack: Vec<Middleware<Req, Resp>> = middlewares.into_iter().collect();
    Middleware::new("chain", move |endpoint| {
        stack
            .iter()
            .rev()
            .fold(endpoint, |inner, middleware| (middleware.apply)(inner))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
