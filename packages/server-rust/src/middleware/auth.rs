//! Bearer-token authentication middleware.
//!
//! Per call: `TokenLookup -> Parse -> ValidateSignature -> ValidateClaims ->
//! Inject`. A rejected call never reaches the inner endpoint.
//!
//! The raw token is placed into the [`Context`] by one of the transport hooks
//! in this module ([`http_to_context`], [`grpc_to_context`],
//! [`message_to_context`]) before the middleware runs.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use courier_core::message::AUTHORIZATION_KEY;
use courier_core::{AuthError, Call, Context, EndpointError, EndpointFuture, Message, Middleware};
use http::header::AUTHORIZATION;
use http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tonic::metadata::MetadataMap;
use tower::{Layer, Service};

// ---------------------------------------------------------------------------
// Key resolution
// ---------------------------------------------------------------------------

/// Resolves the verification key for a token from its (untrusted) header.
pub trait KeyResolver: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an [`AuthError`] when no key is known for the token.
    fn resolve(&self, header: &Header) -> Result<DecodingKey, AuthError>;
}

impl<F> KeyResolver for F
where
    F: Fn(&Header) -> Result<DecodingKey, AuthError> + Send + Sync + 'static,
{
    fn resolve(&self, header: &Header) -> Result<DecodingKey, AuthError> {
        self(header)
    }
}

/// A single shared HMAC secret.
#[derive(Clone)]
pub struct StaticSecret(DecodingKey);

impl StaticSecret {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self(DecodingKey::from_secret(secret))
    }
}

impl KeyResolver for StaticSecret {
    fn resolve(&self, _header: &Header) -> Result<DecodingKey, AuthError> {
        Ok(self.0.clone())
    }
}

impl fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticSecret(***)")
    }
}

/// Keys selected by the token's `kid` header, with an optional fallback for
/// tokens that carry none.
#[derive(Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, DecodingKey>,
    fallback: Option<DecodingKey>,
}

impl KeyRing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key(mut self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, key: DecodingKey) -> Self {
        self.fallback = Some(key);
        self
    }
}

impl KeyResolver for KeyRing {
    fn resolve(&self, header: &Header) -> Result<DecodingKey, AuthError> {
        let key = match header.kid.as_deref() {
            Some(kid) => self.keys.get(kid),
            None => self.fallback.as_ref(),
        };
        key.cloned().ok_or(AuthError::TokenInvalid)
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JwtVerifier
// ---------------------------------------------------------------------------

/// Verifies bearer tokens signed with one fixed algorithm and decodes their
/// claims into `C`.
///
/// `exp` is optional but enforced when present; `nbf` is enforced when
/// present. No clock leeway is applied.
pub struct JwtVerifier<C> {
    resolver: Arc<dyn KeyResolver>,
    algorithm: Algorithm,
    validation: Arc<Validation>,
    _claims: PhantomData<fn() -> C>,
}

impl<C> Clone for JwtVerifier<C> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            algorithm: self.algorithm,
            validation: Arc::clone(&self.validation),
            _claims: PhantomData,
        }
    }
}

impl<C> fmt::Debug for JwtVerifier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &self.algorithm)
            .field("claims", &std::any::type_name::<C>())
            .finish_non_exhaustive()
    }
}

impl<C> JwtVerifier<C>
where
    C: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(resolver: impl KeyResolver, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            resolver: Arc::new(resolver),
            algorithm,
            validation: Arc::new(validation),
            _claims: PhantomData,
        }
    }

    /// Parses and validates `token`, returning its claims.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] classifying the first failed check.
    pub fn verify(&self, token: &str) -> Result<C, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| self.unparsed_header(token))?;

        // Checked before any key is resolved.
        if header.alg != self.algorithm {
            return Err(AuthError::UnexpectedSigningMethod);
        }

        let key = self.resolver.resolve(&header)?;
        jsonwebtoken::decode::<C>(token, &key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| classify(err.kind()))
    }

    /// Classifies a header `jsonwebtoken` rejected. A readable header naming
    /// another algorithm (`none` included) is a signing-method mismatch.
    fn unparsed_header(&self, token: &str) -> AuthError {
        #[derive(Deserialize)]
        struct RawHeader {
            alg: String,
        }

        let raw = token
            .split('.')
            .next()
            .and_then(|segment| URL_SAFE_NO_PAD.decode(segment).ok())
            .and_then(|bytes| serde_json::from_slice::<RawHeader>(&bytes).ok());

        match raw {
            Some(raw) if raw.alg.parse::<Algorithm>().ok() != Some(self.algorithm) => {
                AuthError::UnexpectedSigningMethod
            }
            _ => AuthError::TokenMalformed,
        }
    }

    /// Returns a tower layer enforcing this verifier.
    #[must_use]
    pub fn layer(&self) -> JwtLayer<C> {
        JwtLayer {
            verifier: self.clone(),
        }
    }

    /// Returns this verifier as a named, chainable middleware.
    #[must_use]
    pub fn middleware<Req, Resp>(&self) -> Middleware<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Middleware::from_layer("jwt", self.layer())
    }
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetActive,
        ErrorKind::InvalidAlgorithm => AuthError::UnexpectedSigningMethod,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::MissingRequiredClaim(_) => AuthError::TokenMalformed,
        _ => AuthError::TokenInvalid,
    }
}

// ---------------------------------------------------------------------------
// JwtLayer / JwtService
// ---------------------------------------------------------------------------

/// Tower layer that authenticates every call before the inner endpoint.
pub struct JwtLayer<C> {
    verifier: JwtVerifier<C>,
}

impl<C> Clone for JwtLayer<C> {
    fn clone(&self) -> Self {
        Self {
            verifier: self.verifier.clone(),
        }
    }
}

impl<C> fmt::Debug for JwtLayer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtLayer")
            .field("verifier", &self.verifier)
            .finish()
    }
}

impl<S, C> Layer<S> for JwtLayer<C> {
    type Service = JwtService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtService {
            inner,
            verifier: self.verifier.clone(),
        }
    }
}

/// Service produced by [`JwtLayer`].
pub struct JwtService<S, C> {
    inner: S,
    verifier: JwtVerifier<C>,
}

impl<S: Clone, C> Clone for JwtService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            verifier: self.verifier.clone(),
        }
    }
}

impl<S, C, Req> Service<Call<Req>> for JwtService<S, C>
where
    S: Service<Call<Req>, Error = EndpointError>,
    S::Future: Send + 'static,
    C: DeserializeOwned + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = EndpointError;
    type Future = EndpointFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let Some(token) = call.ctx.token() else {
            return Box::pin(async { Err(AuthError::TokenMissing.into()) });
        };

        match self.verifier.verify(token) {
            Ok(claims) => {
                let (ctx, request) = call.into_parts();
                Box::pin(self.inner.call(Call::new(ctx.with_claims(claims), request)))
            }
            Err(err) => {
                tracing::debug!(
                    request_id = %request_id(&call.ctx),
                    error = %err,
                    "bearer token rejected"
                );
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

fn request_id(ctx: &Context) -> String {
    ctx.request_id()
        .map_or_else(|| "-".to_string(), |id| id.to_string())
}

// ---------------------------------------------------------------------------
// Token-to-context hooks
// ---------------------------------------------------------------------------

/// Extracts the token from an `Authorization: Bearer <token>` value.
/// The scheme is matched case-insensitively.
#[must_use]
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn token_from(ctx: Context, value: Option<&str>) -> Context {
    match value.and_then(bearer_token) {
        Some(token) => ctx.with_token(token),
        None => ctx,
    }
}

/// HTTP before-hook: copies the bearer token of the request into the context.
pub fn http_to_context(ctx: Context, parts: &Parts) -> Context {
    let value = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    token_from(ctx, value)
}

/// gRPC before-hook: copies the bearer token of the call metadata into the context.
pub fn grpc_to_context(ctx: Context, metadata: &MetadataMap) -> Context {
    let value = metadata
        .get(AUTHORIZATION.as_str())
        .and_then(|value| value.to_str().ok());
    token_from(ctx, value)
}

/// Message before-hook: copies the bearer token of the `authorization`
/// metadata entry into the context.
pub fn message_to_context(ctx: Context, msg: &Message) -> Context {
    token_from(ctx, msg.metadata(AUTHORIZATION_KEY))
}
