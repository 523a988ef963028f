//! Retry with round-robin load balancing over a fixed endpoint pool.
//!
//! Every inner error except an authentication failure is retried, up to
//! `max_attempts` sequential attempts and within one overall deadline. Retry
//! cannot tell idempotent operations from non-idempotent ones: only put
//! endpoints behind it whose side effects are safe to repeat.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use courier_core::{Call, EndpointError, EndpointFuture, Middleware};
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

use crate::config::RetryConfig;

// ---------------------------------------------------------------------------
// RoundRobin
// ---------------------------------------------------------------------------

/// Rotates over an immutable pool of interchangeable endpoints.
///
/// The pool is fixed at construction and shared read-only by all clones.
#[derive(Debug)]
pub struct RoundRobin<S> {
    pool: Arc<[S]>,
    cursor: Arc<AtomicUsize>,
}

impl<S> Clone for RoundRobin<S> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            cursor: Arc::clone(&self.cursor),
        }
    }
}

impl<S: Clone> RoundRobin<S> {
    pub fn new(pool: impl IntoIterator<Item = S>) -> Self {
        Self {
            pool: pool.into_iter().collect(),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of endpoints in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Returns the next endpoint in rotation.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::NoEndpoints`] if the pool is empty.
    pub fn next_endpoint(&self) -> Result<S, EndpointError> {
        if self.pool.is_empty() {
            return Err(EndpointError::NoEndpoints);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        Ok(self.pool[index].clone())
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Endpoint that retries failed calls against the next pool member.
#[derive(Debug)]
pub struct Retry<S> {
    balancer: RoundRobin<S>,
    max_attempts: usize,
    timeout: Duration,
}

impl<S> Clone for Retry<S> {
    fn clone(&self) -> Self {
        Self {
            balancer: self.balancer.clone(),
            max_attempts: self.max_attempts,
            timeout: self.timeout,
        }
    }
}

impl<S: Clone> Retry<S> {
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(pool: impl IntoIterator<Item = S>, max_attempts: usize, timeout: Duration) -> Self {
        Self {
            balancer: RoundRobin::new(pool),
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl<S, Req> Service<Call<Req>> for Retry<S>
where
    S: Service<Call<Req>, Error = EndpointError> + Clone + Send + Sync + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    Req: Clone + Send + 'static,
{
    type Response = S::Response;
    type Error = EndpointError;
    type Future = EndpointFuture<S::Response>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is checked per attempt on the selected pool member.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let balancer = self.balancer.clone();
        let max_attempts = self.max_attempts;
        let timeout = self.timeout;

        Box::pin(async move {
            let (ctx, request) = call.into_parts();
            let deadline = Instant::now() + timeout;
            let mut last_err = None;

            for attempt in 1..=max_attempts {
                let endpoint = balancer.next_endpoint()?;
                let attempt_ctx = ctx.child();
                let pending = endpoint.oneshot(Call::new(attempt_ctx.clone(), request.clone()));

                let result = tokio::select! {
                    biased;
                    () = ctx.cancellation().cancelled() => {
                        return Err(EndpointError::Cancelled);
                    }
                    result = tokio::time::timeout_at(deadline, pending) => result,
                };

                match result {
                    Ok(Ok(response)) => return Ok(response),
                    Ok(Err(err)) if err.is_auth() => return Err(err),
                    Ok(Err(err)) => {
                        attempt_ctx.cancel();
                        tracing::debug!(
                            attempt,
                            max_attempts,
                            error = %err,
                            "endpoint attempt failed"
                        );
                        last_err = Some(err);
                    }
                    Err(_elapsed) => {
                        attempt_ctx.cancel();
                        tracing::warn!(attempt, max_attempts, "retry deadline exceeded");
                        return Err(EndpointError::Timeout {
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                }
            }

            Err(last_err.unwrap_or(EndpointError::NoEndpoints))
        })
    }
}

// ---------------------------------------------------------------------------
// RetryLayer
// ---------------------------------------------------------------------------

/// Wraps a single endpoint in [`Retry`] with a one-member pool.
#[derive(Debug, Clone, Copy)]
pub struct RetryLayer {
    max_attempts: usize,
    timeout: Duration,
}

impl RetryLayer {
    #[must_use]
    pub fn new(max_attempts: usize, timeout: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.timeout())
    }

    /// Returns this layer as a named, chainable middleware.
    #[must_use]
    pub fn middleware<Req, Resp>(self) -> Middleware<Req, Resp>
    where
        Req: Clone + Send + 'static,
        Resp: Send + 'static,
    {
        Middleware::from_layer("retry", self)
    }
}

impl<S: Clone> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry::new([inner], self.max_attempts, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use courier_core::{endpoint_fn, AuthError, Context};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("instance {0} down")]
    struct Down(usize);

    type Hits = Arc<Mutex<Vec<usize>>>;

    #[derive(Clone)]
    struct Instance {
        id: usize,
        healthy: bool,
        hits: Hits,
    }

    impl Service<Call<u32>> for Instance {
        type Response = (usize, u32);
        type Error = EndpointError;
        type Future = EndpointFuture<(usize, u32)>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call<u32>) -> Self::Future {
            self.hits.lock().push(self.id);
            let (id, healthy) = (self.id, self.healthy);
            Box::pin(async move {
                if healthy {
                    Ok((id, call.request))
                } else {
                    Err(EndpointError::failed(Down(id)))
                }
            })
        }
    }

    fn pool(health: &[bool], hits: &Hits) -> Vec<Instance> {
        health
            .iter()
            .enumerate()
            .map(|(id, &healthy)| Instance {
                id,
                healthy,
                hits: Arc::clone(hits),
            })
            .collect()
    }

    #[tokio::test]
    async fn third_instance_answers_exactly_once() {
        let hits: Hits = Arc::default();
        let retry = Retry::new(pool(&[false, false, true], &hits), 3, Duration::from_secs(1));

        let resp = retry.oneshot(Call::new(Context::new(), 7)).await.unwrap();
        assert_eq!(resp, (2, 7));
        assert_eq!(*hits.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let hits: Hits = Arc::default();
        let retry = Retry::new(pool(&[false, false, false], &hits), 2, Duration::from_secs(1));

        let err = retry.oneshot(Call::new(Context::new(), 1)).await.unwrap_err();
        assert_eq!(hits.lock().len(), 2);
        assert_eq!(err.business_error::<Down>().map(|d| d.0), Some(1));
    }

    #[tokio::test]
    async fn rotation_continues_across_calls() {
        let hits: Hits = Arc::default();
        let retry = Retry::new(pool(&[true, true, true], &hits), 1, Duration::from_secs(1));

        for _ in 0..4 {
            retry.clone().oneshot(Call::new(Context::new(), 0)).await.unwrap();
        }
        assert_eq!(*hits.lock(), vec![0, 1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_the_running_attempt() {
        let seen: Arc<Mutex<Option<Context>>> = Arc::default();
        let slot = Arc::clone(&seen);
        let slow = endpoint_fn(move |ctx: Context, n: u32| {
            *slot.lock() = Some(ctx);
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, EndpointError>(n)
            }
        });

        let parent = Context::new();
        let err = RetryLayer::new(3, Duration::from_millis(100))
            .layer(slow)
            .oneshot(Call::new(parent.clone(), 1))
            .await
            .unwrap_err();

        assert!(matches!(err, EndpointError::Timeout { timeout_ms: 100 }));
        assert!(seen.lock().as_ref().unwrap().is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_failures_stay_within_the_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let flaky = endpoint_fn(move |_ctx: Context, _n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Err::<u32, _>(EndpointError::failed(Down(0)))
            }
        });

        let started = Instant::now();
        let err = RetryLayer::new(2, Duration::from_millis(100))
            .layer(flaky)
            .oneshot(Call::new(Context::new(), 1))
            .await
            .unwrap_err();

        assert!(matches!(err, EndpointError::Timeout { timeout_ms: 100 }));
        assert!(calls.load(Ordering::SeqCst) <= 2);
        assert!(started.elapsed() <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let endpoint = endpoint_fn(move |_ctx: Context, _n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(EndpointError::from(AuthError::TokenExpired)) }
        });

        let err = RetryLayer::new(5, Duration::from_secs(1))
            .layer(endpoint)
            .oneshot(Call::new(Context::new(), 1))
            .await
            .unwrap_err();
        assert_eq!(err.auth_error(), Some(AuthError::TokenExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_pool_and_zero_attempts() {
        let empty: Retry<Instance> = Retry::new(Vec::new(), 3, Duration::from_secs(1));
        let err = empty.oneshot(Call::new(Context::new(), 1)).await.unwrap_err();
        assert!(matches!(err, EndpointError::NoEndpoints));

        let hits: Hits = Arc::default();
        let clamped = Retry::new(pool(&[true], &hits), 0, Duration::from_secs(1));
        assert_eq!(clamped.max_attempts(), 1);
        assert!(clamped.oneshot(Call::new(Context::new(), 1)).await.is_ok());
    }

    #[tokio::test]
    async fn works_as_chain_middleware() {
        let endpoint = endpoint_fn(|_ctx: Context, n: u32| async move { Ok::<_, EndpointError>(n + 1) });
        let wrapped = RetryLayer::from_config(&RetryConfig::default())
            .middleware::<u32, u32>()
            .apply(endpoint);
        assert_eq!(wrapped.oneshot(Call::new(Context::new(), 1)).await.unwrap(), 2);
    }
}
