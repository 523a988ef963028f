//! Serving lifecycle shared by the HTTP module and the bus consumer.
//!
//! Health state lives in an `ArcSwap` so probes read it without locking.
//! In-flight work is counted by RAII guards; the last guard to drop wakes
//! anyone waiting for the drain.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};
use tracing::info;

/// Lifecycle of a serving process: `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    /// Shutdown was requested; new work is refused, in-flight work finishes.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Coordinates readiness, the shutdown signal and in-flight draining.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::default(),
            state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    /// Moves `Starting` to `Ready`; later states are kept.
    pub fn set_ready(&self) {
        self.state.rcu(|state| match **state {
            HealthState::Starting => Arc::new(HealthState::Ready),
            _ => Arc::clone(state),
        });
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// Whether new requests or deliveries should be taken on.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.health_state() == HealthState::Ready
    }

    /// Moves to `Draining` and wakes every [`shutdown_signal`](Self::shutdown_signal).
    ///
    /// Idempotent; a controller that already stopped stays stopped.
    pub fn trigger_shutdown(&self) {
        let previous = self.state.rcu(|state| match **state {
            HealthState::Stopped => Arc::clone(state),
            _ => Arc::new(HealthState::Draining),
        });
        if matches!(*previous, HealthState::Starting | HealthState::Ready) {
            info!(in_flight = self.in_flight_count(), "shutdown requested");
        }
        self.signal.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once shutdown has been triggered, including before the call.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.signal.subscribe();
        async move {
            // Err only once the controller is gone.
            let _ = rx.wait_for(|stopping| *stopping).await;
        }
    }

    /// Counts one unit of in-flight work until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no work is in flight, up to `timeout`.
    ///
    /// On success the state moves to `Stopped` and `true` is returned; on
    /// timeout the state is left as is.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.in_flight.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(timeout, drained).await.is_ok() {
            self.state.store(Arc::new(HealthState::Stopped));
            true
        } else {
            false
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
pub async fn os_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
