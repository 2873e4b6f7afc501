//! Authenticator (C17, SPEC_FULL §4.17): bearer-token validation for
//! `/api/*`, consumed as a trait so the core engines never special-case a
//! JWT library. The shipped implementation validates HS256 signatures with
//! `JWT_SECRET` and optional `iss`/`aud` checks, reusing the `sha2`
//! dependency already pulled in for other purposes rather than adding a
//! dedicated JWT crate.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingBearer,
    #[error("malformed JWT")]
    Malformed,
    #[error("unsupported JWT algorithm (only HS256 is accepted)")]
    UnsupportedAlgorithm,
    #[error("signature verification failed")]
    BadSignature,
    #[error("token issuer mismatch")]
    IssuerMismatch,
    #[error("token audience mismatch")]
    AudienceMismatch,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub iss: Option<String>,
    pub aud: Option<String>,
    pub exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer: &str) -> Result<Claims, AuthError>;
}

pub struct JwtAuthenticator {
    secret: Vec<u8>,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtAuthenticator {
    pub fn new(secret: Vec<u8>, issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            secret,
            issuer,
            audience,
        }
    }

    /// Extracts the bearer token from an `Authorization: Bearer <token>`
    /// header value.
    pub fn extract_bearer(header_value: &[u8]) -> Result<&str, AuthError> {
        let s = std::str::from_utf8(header_value).map_err(|_| AuthError::MissingBearer)?;
        s.strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingBearer)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(AuthError::Malformed)?;
        let payload_b64 = parts.next().ok_or(AuthError::Malformed)?;
        let sig_b64 = parts.next().ok_or(AuthError::Malformed)?;
        if parts.next().is_some() {
            return Err(AuthError::Malformed);
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| AuthError::Malformed)?;
        let header: Header = serde_json::from_slice(&header_bytes).map_err(|_| AuthError::Malformed)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;

        let signing_input = format!("{header_b64}.{payload_b64}");
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature).map_err(|_| AuthError::BadSignature)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::Malformed)?;

        if let (Some(expected), Some(actual)) = (&self.issuer, &claims.iss) {
            if expected != actual {
                return Err(AuthError::IssuerMismatch);
            }
        }
        if let (Some(expected), Some(actual)) = (&self.audience, &claims.aud) {
            if expected != actual {
                return Err(AuthError::AudienceMismatch);
            }
        }
        if let Some(exp) = claims.exp {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            if now >= exp {
                return Err(AuthError::Expired);
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(data: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(data)
    }

    fn sign(secret: &[u8], header_b64: &str, payload_b64: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(format!("{header_b64}.{payload_b64}").as_bytes());
        b64(&mac.finalize().into_bytes())
    }

    fn make_token(secret: &[u8], payload_json: &str) -> String {
        let header_b64 = b64(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload_b64 = b64(payload_json.as_bytes());
        let sig_b64 = sign(secret, &header_b64, &payload_b64);
        format!("{header_b64}.{payload_b64}.{sig_b64}")
    }

    #[test]
    fn accepts_correctly_signed_token() {
        let secret = b"top-secret".to_vec();
        let auth = JwtAuthenticator::new(secret.clone(), None, None);
        let token = make_token(&secret, r#"{"sub":"alice"}"#);
        let claims = auth.authenticate(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("alice"));
    }

    #[test]
    fn rejects_tampered_signature() {
        let secret = b"top-secret".to_vec();
        let auth = JwtAuthenticator::new(secret.clone(), None, None);
        let mut token = make_token(&secret, r#"{"sub":"alice"}"#);
        token.push('x');
        assert!(matches!(auth.authenticate(&token), Err(AuthError::BadSignature) | Err(AuthError::Malformed)));
    }

    #[test]
    fn rejects_issuer_mismatch() {
        let secret = b"top-secret".to_vec();
        let auth = JwtAuthenticator::new(secret.clone(), Some("expected-issuer".into()), None);
        let token = make_token(&secret, r#"{"iss":"someone-else"}"#);
        assert!(matches!(auth.authenticate(&token), Err(AuthError::IssuerMismatch)));
    }

    #[test]
    fn rejects_expired_token() {
        let secret = b"top-secret".to_vec();
        let auth = JwtAuthenticator::new(secret.clone(), None, None);
        let token = make_token(&secret, r#"{"exp":1}"#);
        assert!(matches!(auth.authenticate(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn extract_bearer_requires_prefix() {
        assert!(JwtAuthenticator::extract_bearer(b"Bearer abc.def.ghi").is_ok());
        assert!(JwtAuthenticator::extract_bearer(b"Basic abc").is_err());
    }
}
