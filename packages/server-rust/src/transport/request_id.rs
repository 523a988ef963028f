//! Before-hooks that attach call identifiers to a fresh [`Context`].
//!
//! Register the request-id hook first so the logging hooks of every transport
//! see the identifier.

use courier_core::message::{CORRELATION_ID_KEY, PARTITION_KEY};
use courier_core::{Context, Message, RequestId};
use http::request::Parts;
use tonic::metadata::MetadataMap;

/// Attaches a new request id to an HTTP call.
pub fn http_to_context(ctx: Context, _parts: &Parts) -> Context {
    ctx.with_request_id(RequestId::new())
}

/// Attaches a new request id to a gRPC call.
pub fn grpc_to_context(ctx: Context, _metadata: &MetadataMap) -> Context {
    ctx.with_request_id(RequestId::new())
}

/// Attaches a new request id to a bus message.
pub fn message_to_context(ctx: Context, _msg: &Message) -> Context {
    ctx.with_request_id(RequestId::new())
}

/// Copies the `correlation_id` metadata entry, when present.
pub fn correlation_id_to_context(ctx: Context, msg: &Message) -> Context {
    match msg.metadata(CORRELATION_ID_KEY) {
        Some(id) => ctx.with_correlation_id(id),
        None => ctx,
    }
}

/// Copies the `key` metadata entry as the partition key, when present.
pub fn partition_key_to_context(ctx: Context, msg: &Message) -> Context {
    match msg.metadata(PARTITION_KEY) {
        Some(key) => ctx.with_partition_key(key),
        None => ctx,
    }
}
