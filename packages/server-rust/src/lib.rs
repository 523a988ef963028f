//! Courier server: endpoint middleware, HTTP/gRPC/message-bus transports,
//! configuration, telemetry and the serving lifecycle.

pub mod config;
pub mod middleware;
pub mod network;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigError, LogFormat, ServiceConfig};
pub use middleware::{JwtLayer, JwtVerifier, LoggingLayer, Retry, RetryLayer, RoundRobin};
pub use network::{HttpModule, ShutdownController};
pub use telemetry::init_tracing;
pub use transport::{ErrorHandler, LogErrorHandler};
