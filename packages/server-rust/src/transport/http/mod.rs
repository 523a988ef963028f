//! HTTP transport on axum.

pub mod codec;
pub mod server;

use std::sync::Arc;

use courier_core::Context;
use http::request::Parts;
use http::{HeaderMap, StatusCode};

pub use codec::{
    decode_json_request, decode_no_body, default_status_code, DecodeRequest, EncodeResponse,
    ErrorEncoder, JsonEncoder,
};
pub use server::{HttpServer, HttpServerBuilder};

/// Runs before decoding; may enrich the context from the request head.
pub type BeforeHook = Arc<dyn Fn(Context, &Parts) -> Context + Send + Sync>;

/// Runs after the endpoint; may add response headers.
pub type AfterHook = Arc<dyn Fn(Context, &mut HeaderMap) -> Context + Send + Sync>;

/// Runs once per request with the final status code.
pub type FinalizerHook = Arc<dyn Fn(&Context, StatusCode, &Parts) + Send + Sync>;
