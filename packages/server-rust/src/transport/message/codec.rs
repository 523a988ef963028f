//! Message codecs.

use courier_core::{Context, EndpointError, Failer, Message};
use serde::de::DeserializeOwned;

/// Turns a consumed message into a typed request.
pub trait DecodeRequest<Req>: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`EndpointError::Decode`] when the payload is not a `Req`.
    fn decode(&self, ctx: &Context, msg: &Message) -> Result<Req, EndpointError>;
}

impl<F, Req> DecodeRequest<Req> for F
where
    F: Fn(&Context, &Message) -> Result<Req, EndpointError> + Send + Sync + 'static,
{
    fn decode(&self, ctx: &Context, msg: &Message) -> Result<Req, EndpointError> {
        self(ctx, msg)
    }
}

/// Consumes the endpoint response. A subscriber has no reply channel, so
/// encoding decides only whether the message counts as handled.
pub trait EncodeResponse<Resp>: Send + Sync + 'static {
    /// # Errors
    ///
    /// The returned error fails the message.
    fn encode(&self, ctx: &Context, msg: &Message, response: Resp) -> Result<(), EndpointError>;
}

impl<F, Resp> EncodeResponse<Resp> for F
where
    F: Fn(&Context, &Message, Resp) -> Result<(), EndpointError> + Send + Sync + 'static,
{
    fn encode(&self, ctx: &Context, msg: &Message, response: Resp) -> Result<(), EndpointError> {
        self(ctx, msg, response)
    }
}

/// Decodes the payload as JSON into `T`.
///
/// # Errors
///
/// Returns [`EndpointError::Decode`] for a malformed payload.
pub fn decode_json_message<T: DeserializeOwned>(
    _ctx: &Context,
    msg: &Message,
) -> Result<T, EndpointError> {
    serde_json::from_slice(&msg.payload).map_err(EndpointError::decode)
}

/// Fails the message with the business error carried by the response.
///
/// # Errors
///
/// Returns [`EndpointError::Failed`] when the response reports a failure.
pub fn encode_response<Resp: Failer>(
    _ctx: &Context,
    _msg: &Message,
    response: Resp,
) -> Result<(), EndpointError> {
    match response.failed() {
        Some(err) => Err(EndpointError::Failed(err)),
        None => Ok(()),
    }
}

/// Acks regardless of the response.
///
/// # Errors
///
/// Never fails.
pub fn encode_ack<Resp>(_ctx: &Context, _msg: &Message, _response: Resp) -> Result<(), EndpointError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use courier_core::Outcome;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct PetCreated {
        id: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("pet not found")]
    struct NotFound;

    #[test]
    fn decodes_json_payload() {
        let ctx = Context::new();
        let msg = Message::new(&br#"{"id":"42"}"#[..]);
        let event: PetCreated = decode_json_message(&ctx, &msg).unwrap();
        assert_eq!(event, PetCreated { id: "42".into() });

        let bad = Message::new(&b"not json"[..]);
        let err = decode_json_message::<PetCreated>(&ctx, &bad).unwrap_err();
        assert!(matches!(err, EndpointError::Decode(_)));
    }

    #[test]
    fn response_failure_fails_the_message() {
        let ctx = Context::new();
        let msg = Message::new(&b"{}"[..]);
        assert!(encode_response(&ctx, &msg, Outcome::ok()).is_ok());

        let err = encode_response(&ctx, &msg, Outcome::failed(NotFound)).unwrap_err();
        assert!(err.business_error::<NotFound>().is_some());

        assert!(encode_ack(&ctx, &msg, Outcome::failed(NotFound)).is_ok());
    }
}
