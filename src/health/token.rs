//! Credential claims decoding.
//!
//! Signed credentials are three dot-separated base64url segments. Only the payload is
//! decoded; the signature is the backend's business. Anything that does not decode is
//! an opaque key and yields `None`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// The claims the health monitor cares about
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CredentialClaims {
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub role: Option<String>,
}

impl CredentialClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp
            .filter(|exp| exp.is_finite())
            .and_then(|exp| DateTime::from_timestamp(exp.trunc() as i64, 0))
    }
}

/// Outcome of checking a credential's expiry against a safety buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAssessment {
    /// Not a decodable token
    Opaque,
    /// Decodable, but without an `exp` claim
    NoExpiry,
    Valid { expires_at: DateTime<Utc> },
    /// Expired, or expiring within the buffer
    Expired { expires_at: DateTime<Utc> },
}

/// Decode the payload segment of a `header.payload.signature` credential
pub fn parse_credential_claims(credential: &str) -> Option<CredentialClaims> {
    let mut segments = credential.trim().split('.');
    let (header, payload, signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() || header.is_empty() || payload.is_empty() || signature.is_empty()
    {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn assess_expiry(credential: &str, now: DateTime<Utc>, buffer: Duration) -> ExpiryAssessment {
    let Some(claims) = parse_credential_claims(credential) else {
        return ExpiryAssessment::Opaque;
    };
    let Some(expires_at) = claims.expires_at() else {
        return ExpiryAssessment::NoExpiry;
    };

    let buffer = chrono::Duration::from_std(buffer).unwrap_or_else(|_| chrono::Duration::zero());
    if expires_at - now < buffer {
        ExpiryAssessment::Expired { expires_at }
    } else {
        ExpiryAssessment::Valid { expires_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_parse_claims() {
        let token = token_with_payload(r#"{"exp": 1900000000, "role": "anon"}"#);
        let claims = parse_credential_claims(&token).unwrap();
        assert_eq!(claims.exp, Some(1_900_000_000.0));
        assert_eq!(claims.role.as_deref(), Some("anon"));
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_malformed_credentials_are_opaque() {
        assert!(parse_credential_claims("sb_publishable_abc123").is_none());
        assert!(parse_credential_claims("a.b").is_none());
        assert!(parse_credential_claims("a.b.c.d").is_none());
        assert!(parse_credential_claims("header.!!!.sig").is_none());
        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(parse_credential_claims(&not_json).is_none());
    }

    #[test]
    fn test_assess_expiry_buffer() {
        let now = Utc::now();
        let buffer = Duration::from_secs(300);

        let expired = token_with_payload(&format!(r#"{{"exp": {}}}"#, now.timestamp() - 10));
        assert!(matches!(
            assess_expiry(&expired, now, buffer),
            ExpiryAssessment::Expired { .. }
        ));

        // Inside the buffer counts as expired
        let soon = token_with_payload(&format!(r#"{{"exp": {}}}"#, now.timestamp() + 120));
        assert!(matches!(
            assess_expiry(&soon, now, buffer),
            ExpiryAssessment::Expired { .. }
        ));

        let later = token_with_payload(&format!(r#"{{"exp": {}}}"#, now.timestamp() + 3600));
        assert!(matches!(
            assess_expiry(&later, now, buffer),
            ExpiryAssessment::Valid { .. }
        ));

        let no_exp = token_with_payload(r#"{"role": "service"}"#);
        assert_eq!(assess_expiry(&no_exp, now, buffer), ExpiryAssessment::NoExpiry);
        assert_eq!(
            assess_expiry("opaque-key", now, buffer),
            ExpiryAssessment::Opaque
        );
    }
}
