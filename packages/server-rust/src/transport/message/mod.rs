//! Message-bus transport: a [`Subscriber`] drives one endpoint per
//! consumed [`Message`], and a [`Consumer`] feeds it deliveries from a bus
//! client and acks or nacks each one.

pub mod codec;
pub mod consume;
pub mod subscriber;

use std::sync::Arc;

use courier_core::{Context, EndpointError, Message};

pub use codec::{decode_json_message, encode_ack, encode_response};
pub use consume::{Ack, Consumer, Delivery};
pub use subscriber::{Subscriber, SubscriberBuilder};

/// Runs before decoding; may enrich the context from the message.
pub type BeforeHook = Arc<dyn Fn(Context, &Message) -> Context + Send + Sync>;

/// Runs after the endpoint, before the response is encoded.
pub type AfterHook = Arc<dyn Fn(Context) -> Context + Send + Sync>;

/// Runs once per message with how its handling ended.
pub type FinalizerHook = Arc<dyn Fn(&Context, &Message, Disposition<'_>) + Send + Sync>;

/// Sees the pipeline error together with the message that caused it.
pub type ErrorEncoder = Arc<dyn Fn(&Context, &EndpointError, &Message) + Send + Sync>;

/// How the handling of one message ended.
#[derive(Debug, Clone, Copy)]
pub enum Disposition<'a> {
    /// Every stage succeeded; the bus client acks.
    Acked,
    /// A stage failed; the error goes back to the bus client.
    Failed(&'a EndpointError),
    /// The handling future was dropped or unwound before finishing.
    Aborted,
}

impl Disposition<'_> {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Failed(_) => "failed",
            Self::Aborted => "aborted",
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&EndpointError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Acked | Self::Aborted => None,
        }
    }
}
