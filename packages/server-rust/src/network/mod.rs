//! Serving lifecycle: HTTP listener, host layers and graceful shutdown.

pub mod middleware;
pub mod module;
pub mod shutdown;

pub use middleware::{build_http_layers, HttpLayers};
pub use module::HttpModule;
pub use shutdown::{os_signal, HealthState, InFlightGuard, ShutdownController};
