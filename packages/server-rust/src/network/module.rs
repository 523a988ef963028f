//! HTTP serving lifecycle with deferred startup.
//!
//! `new()` takes the application router, `start()` binds the listener, and
//! `serve()` accepts connections until shutdown, then drains. Splitting
//! `start()` from `serve()` lets callers learn the bound port (port 0) and
//! wire the [`ShutdownController`] into other components, such as a bus
//! [`Consumer`](crate::transport::message::Consumer), before traffic flows.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::config::HttpConfig;

/// Owns the HTTP listener and the process-wide [`ShutdownController`].
pub struct HttpModule {
    config: HttpConfig,
    app: Router,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl HttpModule {
    /// Wraps `app` without binding any port.
    ///
    /// `app` typically mounts [`HttpServer`](crate::transport::http::HttpServer)
    /// instances with `route_service`.
    #[must_use]
    pub fn new(config: HttpConfig, app: Router) -> Self {
        Self {
            config,
            app,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the served router:
    /// - `GET /health/live`: 200 while the process runs
    /// - `GET /health/ready`: 200 when ready, 503 otherwise
    /// - everything in `app`, refused with 503 unless ready and counted as
    ///   in-flight while it runs
    ///
    /// Host layers from [`build_http_layers`] wrap all of it.
    pub fn build_router(&self) -> Router {
        let probes = Router::new()
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(Arc::clone(&self.shutdown));

        let app = self
            .app
            .clone()
            .layer(from_fn_with_state(Arc::clone(&self.shutdown), track_in_flight));

        probes.merge(app).layer(build_http_layers(&self.config))
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "HTTP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `signal` resolves or the controller is told to shut
    /// down, then drains in-flight work for up to the configured drain
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or on a fatal
    /// I/O error while serving.
    pub async fn serve(self, signal: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let shutdown = self.shutdown;

        let triggered = shutdown.shutdown_signal();
        let ctrl = Arc::clone(&shutdown);
        let stop = async move {
            tokio::select! {
                () = signal => {}
                () = triggered => {}
            }
            ctrl.trigger_shutdown();
        };

        shutdown.set_ready();
        info!("serving HTTP");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stop)
        .await?;

        shutdown.trigger_shutdown();
        if shutdown.wait_for_drain(self.config.drain_timeout()).await {
            info!("drained");
        } else {
            warn!(
                in_flight = shutdown.in_flight_count(),
                "drain timeout expired with work in flight"
            );
        }
        Ok(())
    }
}

async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    req: Request,
    next: Next,
) -> Response {
    if !shutdown.is_accepting() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let _guard = shutdown.in_flight_guard();
    next.run(req).await
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(State(shutdown): State<Arc<ShutdownController>>) -> StatusCode {
    if shutdown.is_accepting() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
