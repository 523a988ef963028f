//! Paired before/finalizer logging hooks, one pair per transport.
//!
//! The before-hook emits the incoming record, the finalizer the outgoing
//! one. Both read the request id from the context, so register the matching
//! [`request_id`](super::request_id) hook ahead of the before-hook.

use std::net::SocketAddr;

use courier_core::{Context, EndpointError, Message};
use http::header::{CONTENT_LENGTH, USER_AGENT};
use http::request::Parts;
use http::{HeaderMap, StatusCode};
use tonic::metadata::MetadataMap;

use super::message::Disposition;

/// Renders the request id of `ctx`, or `-` when none is attached.
#[must_use]
pub fn request_id(ctx: &Context) -> String {
    ctx.request_id()
        .map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn client_ip(ctx: &Context) -> String {
    ctx.peer_addr()
        .as_ref()
        .map_or_else(|| "-".to_string(), SocketAddr::to_string)
}

fn user_agent(headers: &HeaderMap) -> String {
    let agents: Vec<&str> = headers
        .get_all(USER_AGENT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    agents.join(";")
}

fn grpc_user_agent(metadata: &MetadataMap) -> String {
    let agents: Vec<&str> = metadata
        .get_all("user-agent")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    agents.join(";")
}

/// `-1` when the request declares no length.
fn content_length(headers: &HeaderMap) -> i64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(-1)
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub fn http_before(ctx: Context, parts: &Parts) -> Context {
    tracing::info!(
        request_id = %request_id(&ctx),
        method = %parts.method,
        path = parts.uri.path(),
        client_ip = %client_ip(&ctx),
        user_agent = %user_agent(&parts.headers),
        content_length = content_length(&parts.headers),
        "Incoming request"
    );
    ctx
}

pub fn http_finalizer(ctx: &Context, status: StatusCode, parts: &Parts) {
    tracing::info!(
        request_id = %request_id(ctx),
        method = %parts.method,
        path = parts.uri.path(),
        client_ip = %client_ip(ctx),
        user_agent = %user_agent(&parts.headers),
        status_code = status.as_u16(),
        "Outgoing response"
    );
}

// ---------------------------------------------------------------------------
// gRPC
// ---------------------------------------------------------------------------

pub fn grpc_before(ctx: Context, metadata: &MetadataMap) -> Context {
    tracing::info!(
        request_id = %request_id(&ctx),
        client_ip = %client_ip(&ctx),
        user_agent = %grpc_user_agent(metadata),
        "Incoming request"
    );
    ctx
}

pub fn grpc_finalizer(ctx: &Context, metadata: &MetadataMap, err: Option<&EndpointError>) {
    match err {
        None => tracing::info!(
            request_id = %request_id(ctx),
            client_ip = %client_ip(ctx),
            user_agent = %grpc_user_agent(metadata),
            "Outgoing response"
        ),
        Some(err) => tracing::info!(
            request_id = %request_id(ctx),
            client_ip = %client_ip(ctx),
            user_agent = %grpc_user_agent(metadata),
            error = %err,
            "Outgoing response"
        ),
    }
}

// ---------------------------------------------------------------------------
// Message bus
// ---------------------------------------------------------------------------

pub fn message_before(ctx: Context, msg: &Message) -> Context {
    tracing::info!(
        request_id = %request_id(&ctx),
        message_uuid = %msg.uuid,
        topic = msg.topic.as_deref().unwrap_or("-"),
        correlation_id = ctx.correlation_id().unwrap_or("-"),
        partition_key = ctx.partition_key().unwrap_or("-"),
        payload_len = msg.payload.len(),
        "Incoming message"
    );
    ctx
}

pub fn message_finalizer(ctx: &Context, msg: &Message, disposition: Disposition<'_>) {
    match disposition {
        Disposition::Failed(err) => tracing::info!(
            request_id = %request_id(ctx),
            message_uuid = %msg.uuid,
            topic = msg.topic.as_deref().unwrap_or("-"),
            outcome = disposition.as_str(),
            error = %err,
            "Message processed"
        ),
        Disposition::Acked | Disposition::Aborted => tracing::info!(
            request_id = %request_id(ctx),
            message_uuid = %msg.uuid,
            topic = msg.topic.as_deref().unwrap_or("-"),
            outcome = disposition.as_str(),
            "Message processed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use courier_core::RequestId;
    use http::HeaderValue;

    use super::*;

    #[test]
    fn header_helpers() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), -1);
        assert_eq!(user_agent(&headers), "");

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.append(USER_AGENT, HeaderValue::from_static("curl/8"));
        headers.append(USER_AGENT, HeaderValue::from_static("grpc-go/1.6"));
        assert_eq!(content_length(&headers), 42);
        assert_eq!(user_agent(&headers), "curl/8;grpc-go/1.6");
    }

    #[test]
    fn grpc_user_agents_are_joined() {
        let mut metadata = MetadataMap::new();
        assert_eq!(grpc_user_agent(&metadata), "");

        metadata.append("user-agent", "grpc-go/1.6".parse().unwrap());
        metadata.append("user-agent", "tonic/0.12".parse().unwrap());
        assert_eq!(grpc_user_agent(&metadata), "grpc-go/1.6;tonic/0.12");
    }

    #[test]
    fn request_id_placeholder() {
        assert_eq!(request_id(&Context::new()), "-");
        let id = RequestId::new();
        assert_eq!(request_id(&Context::new().with_request_id(id)), id.to_string());
    }

    #[test]
    fn hooks_pass_context_through() {
        let id = RequestId::new();
        let ctx = Context::new().with_request_id(id);
        let msg = Message::new(&b"{}"[..]);
        let ctx = message_before(ctx, &msg);
        message_finalizer(&ctx, &msg, Disposition::Acked);
        assert_eq!(ctx.request_id(), Some(id));
    }
}
