//! HTTP request decoders, response encoders and the error encoder.

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use courier_core::{Context, EndpointError, ErrorBody, Failer, Headerer, StatusCoder};
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::{HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// ---------------------------------------------------------------------------
// Codec contracts
// ---------------------------------------------------------------------------

/// Turns the head and collected body of a request into a typed request.
pub trait DecodeRequest<Req>: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an [`EndpointError`] when the payload cannot be decoded.
    fn decode(&self, ctx: &Context, parts: &Parts, body: Bytes) -> Result<Req, EndpointError>;
}

impl<F, Req> DecodeRequest<Req> for F
where
    F: Fn(&Context, &Parts, Bytes) -> Result<Req, EndpointError> + Send + Sync + 'static,
{
    fn decode(&self, ctx: &Context, parts: &Parts, body: Bytes) -> Result<Req, EndpointError> {
        self(ctx, parts, body)
    }
}

/// Turns a typed response into an HTTP response.
pub trait EncodeResponse<Resp>: Send + Sync + 'static {
    /// # Errors
    ///
    /// An error here is rendered by the server's [`ErrorEncoder`].
    fn encode(&self, ctx: &Context, response: Resp) -> Result<Response, EndpointError>;
}

impl<F, Resp> EncodeResponse<Resp> for F
where
    F: Fn(&Context, Resp) -> Result<Response, EndpointError> + Send + Sync + 'static,
{
    fn encode(&self, ctx: &Context, response: Resp) -> Result<Response, EndpointError> {
        self(ctx, response)
    }
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

/// Decodes the body as JSON into `T`.
///
/// # Errors
///
/// Returns [`EndpointError::Decode`] for an empty or malformed body.
pub fn decode_json_request<T: DeserializeOwned>(
    _ctx: &Context,
    _parts: &Parts,
    body: Bytes,
) -> Result<T, EndpointError> {
    serde_json::from_slice(&body).map_err(EndpointError::decode)
}

/// Decoder for endpoints that take no request payload.
///
/// # Errors
///
/// Never fails.
pub fn decode_no_body(_ctx: &Context, _parts: &Parts, _body: Bytes) -> Result<(), EndpointError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// JsonEncoder
// ---------------------------------------------------------------------------

/// Serializes responses as JSON, honoring the response capabilities.
///
/// - a [`Failer`] error is returned as [`EndpointError::Failed`], so it is
///   rendered by the error encoder and never with a 2xx status;
/// - [`Headerer`] headers are appended;
/// - [`StatusCoder`] picks the status, 200 by default;
/// - a 204 status is written without a body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl<Resp> EncodeResponse<Resp> for JsonEncoder
where
    Resp: Serialize + Failer + StatusCoder + Headerer + Send + 'static,
{
    fn encode(&self, _ctx: &Context, response: Resp) -> Result<Response, EndpointError> {
        if let Some(err) = response.failed() {
            return Err(EndpointError::Failed(err));
        }

        let status = response.status_code().unwrap_or(StatusCode::OK);
        let body = if status == StatusCode::NO_CONTENT {
            Body::empty()
        } else {
            Body::from(serde_json::to_vec(&response).map_err(EndpointError::encode)?)
        };

        let mut resp = Response::new(body);
        *resp.status_mut() = status;
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        for (name, value) in &response.headers() {
            resp.headers_mut().append(name.clone(), value.clone());
        }
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// ErrorEncoder
// ---------------------------------------------------------------------------

type StatusMapping = dyn Fn(&EndpointError) -> StatusCode + Send + Sync;

/// Renders any failure as `{"error": "<message>"}` with a mapped status.
///
/// A mapping that yields a non-error status is coerced to 500.
#[derive(Clone)]
pub struct ErrorEncoder {
    status_for: Arc<StatusMapping>,
}

impl ErrorEncoder {
    pub fn new<F>(status_for: F) -> Self
    where
        F: Fn(&EndpointError) -> StatusCode + Send + Sync + 'static,
    {
        Self {
            status_for: Arc::new(status_for),
        }
    }

    /// Builds the error response for `err`.
    #[must_use]
    pub fn encode(&self, err: &EndpointError) -> Response {
        let mut status = (self.status_for)(err);
        if !(status.is_client_error() || status.is_server_error()) {
            tracing::warn!(%status, error = %err, "error mapped to non-error status, using 500");
            status = StatusCode::INTERNAL_SERVER_ERROR;
        }

        let mut resp = Response::new(Body::from(ErrorBody::from_error(err).to_json()));
        *resp.status_mut() = status;
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        resp
    }
}

impl Default for ErrorEncoder {
    fn default() -> Self {
        Self::new(default_status_code)
    }
}

impl fmt::Debug for ErrorEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorEncoder").finish_non_exhaustive()
    }
}

/// Status used for each error class when no custom mapping is injected.
///
/// Business failures map to 500; services map their own error types by
/// inspecting [`EndpointError::business_error`] in a custom mapping.
#[must_use]
pub fn default_status_code(err: &EndpointError) -> StatusCode {
    match err {
        EndpointError::Auth(_) | EndpointError::ClaimsUnparseable | EndpointError::Unauthorized => {
            StatusCode::UNAUTHORIZED
        }
        EndpointError::CastRequest | EndpointError::Decode(_) => StatusCode::BAD_REQUEST,
        EndpointError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EndpointError::NoEndpoints | EndpointError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        EndpointError::CastResponse
        | EndpointError::Encode(_)
        | EndpointError::Failed(_)
        | EndpointError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
