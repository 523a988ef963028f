//! Courier core: the endpoint contract and middleware composition, plus the
//! typed context, response capabilities and shared error taxonomy.

pub mod capability;
pub mod claims;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod message;

pub use capability::{Failer, Headerer, Outcome, StatusCoder};
pub use claims::{standard_claims, user_id, Audience, RegisteredClaims};
pub use context::{Context, RequestId};
pub use endpoint::{
    boxed, chain, endpoint_fn, BoxEndpoint, Call, EndpointFuture, FnEndpoint, Middleware,
};
pub use error::{AuthError, BoxError, EndpointError, ErrorBody, SharedError};
pub use message::Message;

