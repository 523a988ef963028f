//! Registered token claims and typed accessors over the [`Context`].

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::EndpointError;

/// Registered claim names of RFC 7519, section 4.1.
///
/// Custom claim shapes embed this struct with `#[serde(flatten)]`:
///
/// ```
/// use courier_core::RegisteredClaims;
///
/// #[derive(serde::Deserialize)]
/// struct PetClaims {
///     #[serde(flatten)]
///     registered: RegisteredClaims,
///     clinic_id: String,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// The `aud` claim: a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// Whether `name` is one of the intended audiences.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::One(aud) => aud == name,
            Self::Many(auds) => auds.iter().any(|aud| aud == name),
        }
    }
}

/// Returns the registered claims injected by the authentication middleware.
///
/// # Errors
///
/// Returns [`EndpointError::ClaimsUnparseable`] when no claims are attached or
/// they were attached with a different type.
pub fn standard_claims(ctx: &Context) -> Result<&RegisteredClaims, EndpointError> {
    ctx.claims::<RegisteredClaims>()
        .ok_or(EndpointError::ClaimsUnparseable)
}

/// Returns the subject of the registered claims.
///
/// # Errors
///
/// [`EndpointError::ClaimsUnparseable`] if claims are missing,
/// [`EndpointError::Unauthorized`] if the token carried no subject.
pub fn user_id(ctx: &Context) -> Result<String, EndpointError> {
    standard_claims(ctx)?
        .sub
        .clone()
        .ok_or(EndpointError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_reads_subject() {
        let ctx = Context::new().with_claims(RegisteredClaims {
            sub: Some("user-1".to_string()),
            ..RegisteredClaims::default()
        });
        assert_eq!(user_id(&ctx).unwrap(), "user-1");
    }

    #[test]
    fn missing_claims_are_unparseable() {
        let err = standard_claims(&Context::new()).unwrap_err();
        assert!(matches!(err, EndpointError::ClaimsUnparseable));
    }

    #[test]
    fn foreign_claims_type_is_unparseable() {
        let ctx = Context::new().with_claims("not registered claims".to_string());
        assert!(matches!(user_id(&ctx), Err(EndpointError::ClaimsUnparseable)));
    }

    #[test]
    fn missing_subject_is_unauthorized() {
        let ctx = Context::new().with_claims(RegisteredClaims::default());
        assert!(matches!(user_id(&ctx), Err(EndpointError::Unauthorized)));
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let one: RegisteredClaims = serde_json::from_str(r#"{"aud":"pets"}"#).unwrap();
        assert!(one.aud.unwrap().contains("pets"));

        let many: RegisteredClaims = serde_json::from_str(r#"{"aud":["a","pets"]}"#).unwrap();
        assert!(many.aud.unwrap().contains("pets"));
    }
}
