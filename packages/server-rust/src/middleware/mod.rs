//! Endpoint middleware: authentication, retry/load-balancing and
//! instrumentation. Each is a tower layer and converts into a
//! [`courier_core::Middleware`] for use with [`courier_core::chain`].

pub mod auth;
pub mod logging;
pub mod retry;

pub use auth::{JwtLayer, JwtVerifier, KeyResolver, KeyRing, StaticSecret};
pub use logging::LoggingLayer;
pub use retry::{Retry, RetryLayer, RoundRobin};
