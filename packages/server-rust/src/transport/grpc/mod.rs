//! gRPC transport adapter.
//!
//! The adapter sits between tonic-generated service stubs and an endpoint:
//! the stub converts its [`tonic::Request`] into a [`GrpcRequest`] (call
//! metadata, peer address, the decoded protobuf message as an
//! [`AnyMessage`]) and turns the returned [`GrpcReply`] or [`Status`] back
//! into its response.

pub mod codec;
pub mod server;

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use courier_core::{Context, EndpointError, ErrorBody};
use tonic::metadata::MetadataMap;

pub use codec::{cast_response, decode_no_body, decode_to_object, encode_object};
pub use server::{GrpcServer, GrpcServerBuilder};
pub use tonic::{Code, Status};

/// A protobuf message with its concrete type erased.
pub type AnyMessage = Box<dyn Any + Send>;

/// Runs before decoding; may enrich the context from call metadata.
pub type BeforeHook = Arc<dyn Fn(Context, &MetadataMap) -> Context + Send + Sync>;

/// Runs after the endpoint; may add response metadata.
pub type AfterHook = Arc<dyn Fn(Context, &mut MetadataMap) -> Context + Send + Sync>;

/// Runs once per call with the terminal error, if any.
pub type FinalizerHook = Arc<dyn Fn(&Context, &MetadataMap, Option<&EndpointError>) + Send + Sync>;

/// An inbound unary call.
pub struct GrpcRequest {
    pub metadata: MetadataMap,
    pub peer: Option<SocketAddr>,
    pub message: AnyMessage,
}

impl GrpcRequest {
    pub fn new<M: Any + Send>(message: M) -> Self {
        Self {
            metadata: MetadataMap::new(),
            peer: None,
            message: Box::new(message),
        }
    }

    /// Takes metadata, peer address and message out of a tonic request.
    pub fn from_tonic<M: Any + Send>(mut request: tonic::Request<M>) -> Self {
        let peer = request.remote_addr();
        let metadata = std::mem::replace(request.metadata_mut(), MetadataMap::new());
        Self {
            metadata,
            peer,
            message: Box::new(request.into_inner()),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

impl fmt::Debug for GrpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcRequest")
            .field("metadata", &self.metadata)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// A successful unary reply.
pub struct GrpcReply {
    pub metadata: MetadataMap,
    pub message: AnyMessage,
}

impl GrpcReply {
    /// Converts into the tonic response a generated stub returns.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` status when the message is not an `M`.
    pub fn into_tonic<M: Any>(self) -> Result<tonic::Response<M>, Status> {
        let message = cast_response::<M>(self.message)
            .map_err(|err| status_from_error(&err, &default_code))?;
        let mut response = tonic::Response::new(message);
        *response.metadata_mut() = self.metadata;
        Ok(response)
    }
}

impl fmt::Debug for GrpcReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcReply")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Renders `err` as a status with a `{"error": "..."}` message and the code
/// chosen by `code_for`.
///
/// A mapping that yields [`Code::Ok`] is coerced to [`Code::Unknown`].
pub fn status_from_error(err: &EndpointError, code_for: &dyn Fn(&EndpointError) -> Code) -> Status {
    let code = match code_for(err) {
        Code::Ok => Code::Unknown,
        code => code,
    };
    Status::new(
        code,
        String::from_utf8_lossy(&ErrorBody::from_error(err).to_json()).into_owned(),
    )
}

/// Code used for each error class when no custom mapping is injected.
#[must_use]
pub fn default_code(err: &EndpointError) -> Code {
    match err {
        EndpointError::Auth(_) | EndpointError::ClaimsUnparseable | EndpointError::Unauthorized => {
            Code::Unauthenticated
        }
        EndpointError::CastRequest | EndpointError::Decode(_) => Code::InvalidArgument,
        EndpointError::Timeout { .. } => Code::DeadlineExceeded,
        EndpointError::NoEndpoints => Code::Unavailable,
        EndpointError::Cancelled => Code::Cancelled,
        EndpointError::Failed(_) => Code::Unknown,
        EndpointError::CastResponse | EndpointError::Encode(_) | EndpointError::Internal(_) => {
            Code::Internal
        }
    }
}
