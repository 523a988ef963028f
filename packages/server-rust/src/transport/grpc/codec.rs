//! Value-to-value codecs between protobuf messages and endpoint types.

use courier_core::{Context, EndpointError, Failer};

use super::AnyMessage;

/// Turns an inbound message into a typed request.
pub trait DecodeRequest<Req>: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`EndpointError::CastRequest`] or a decode error.
    fn decode(&self, ctx: &Context, message: AnyMessage) -> Result<Req, EndpointError>;
}

impl<F, Req> DecodeRequest<Req> for F
where
    F: Fn(&Context, AnyMessage) -> Result<Req, EndpointError> + Send + Sync + 'static,
{
    fn decode(&self, ctx: &Context, message: AnyMessage) -> Result<Req, EndpointError> {
        self(ctx, message)
    }
}

/// Turns a typed response into an outbound message.
pub trait EncodeResponse<Resp>: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns the business failure of the response or an encode error.
    fn encode(&self, ctx: &Context, response: Resp) -> Result<AnyMessage, EndpointError>;
}

impl<F, Resp> EncodeResponse<Resp> for F
where
    F: Fn(&Context, Resp) -> Result<AnyMessage, EndpointError> + Send + Sync + 'static,
{
    fn encode(&self, ctx: &Context, response: Resp) -> Result<AnyMessage, EndpointError> {
        self(ctx, response)
    }
}

/// Unboxes the message as `T`.
///
/// # Errors
///
/// Returns [`EndpointError::CastRequest`] if the message is not a `T`.
pub fn decode_to_object<T: 'static>(_ctx: &Context, message: AnyMessage) -> Result<T, EndpointError> {
    message
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| EndpointError::CastRequest)
}

/// Decoder for calls whose request carries nothing the endpoint needs.
///
/// # Errors
///
/// Never fails.
pub fn decode_no_body(_ctx: &Context, _message: AnyMessage) -> Result<(), EndpointError> {
    Ok(())
}

/// Boxes the response as the reply, surfacing a [`Failer`] error instead.
///
/// # Errors
///
/// Returns [`EndpointError::Failed`] when the response reports a business failure.
pub fn encode_object<Resp>(_ctx: &Context, response: Resp) -> Result<AnyMessage, EndpointError>
where
    Resp: Failer + Send + 'static,
{
    match response.failed() {
        Some(err) => Err(EndpointError::Failed(err)),
        None => Ok(Box::new(response)),
    }
}

/// Client side: unboxes a reply as `T`.
///
/// # Errors
///
/// Returns [`EndpointError::CastResponse`] if the reply is not a `T`.
pub fn cast_response<T: 'static>(message: AnyMessage) -> Result<T, EndpointError> {
    message
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| EndpointError::CastResponse)
}
