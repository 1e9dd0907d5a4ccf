//! Caller identity
//!
//! Callers present `Authorization: Bearer <userId>.<signature>` where the
//! signature is the hex HMAC-SHA256 of the user id under the server's
//! `auth_secret`. A valid token only says who the caller is; what they may
//! touch is decided elsewhere.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Mints and verifies caller tokens
pub struct CallerAuth {
    keyed: HmacSha256,
}

impl CallerAuth {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    fn mac(&self) -> HmacSha256 {
        self.keyed.clone()
    }

    /// Token for a user id
    pub fn mint(&self, user_id: &str) -> String {
        let mut mac = self.mac();
        mac.update(user_id.as_bytes());
        format!("{}.{}", user_id, hex::encode(mac.finalize().into_bytes()))
    }

    /// The user id a token was minted for, if the signature checks out
    pub fn verify(&self, token: &str) -> Option<String> {
        let (user_id, signature) = token.trim().rsplit_once('.')?;
        if user_id.is_empty() {
            return None;
        }
        let signature = hex::decode(signature).ok()?;

        let mut mac = self.mac();
        mac.update(user_id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(user_id.to_string())
    }
}

/// The authenticated caller of a request
#[derive(Debug, Clone, PartialEq)]
pub struct Caller(pub String);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("missing caller identity"))?;

        state
            .auth
            .verify(token)
            .map(Caller)
            .ok_or_else(|| ApiError::unauthorized("invalid caller identity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_verify() {
        let auth = CallerAuth::new("s3cret").unwrap();
        let token = auth.mint("user-42");
        assert!(token.starts_with("user-42."));
        assert_eq!(auth.verify(&token).as_deref(), Some("user-42"));
    }

    #[test]
    fn test_user_ids_with_dots() {
        let auth = CallerAuth::new("s3cret").unwrap();
        let token = auth.mint("jane.doe@example.com");
        assert_eq!(auth.verify(&token).as_deref(), Some("jane.doe@example.com"));
    }

    #[test]
    fn test_rejects_tampering() {
        let auth = CallerAuth::new("s3cret").unwrap();
        let token = auth.mint("user-42");
        let forged = token.replacen("user-42", "user-43", 1);
        assert_eq!(auth.verify(&forged), None);
        assert_eq!(CallerAuth::new("other").unwrap().verify(&token), None);
        assert_eq!(auth.verify("user-42"), None);
        assert_eq!(auth.verify("user-42.zz"), None);
        assert_eq!(auth.verify(""), None);
    }
}
