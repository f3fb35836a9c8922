use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identity at the boundary. Sessions and credentials are issued elsewhere;
/// this service only turns a bearer token into a (user id, username) pair.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    exp: u64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
}

pub struct AuthService {
    decoding_key: Option<DecodingKey>,
    dev_mode: bool,
}

impl AuthService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: Some(DecodingKey::from_secret(secret.as_bytes())),
            dev_mode: false,
        }
    }

    /// Dev mode accepts unsigned `"<uuid>:<username>"` tokens for local runs
    /// and tests.
    pub fn new_dev_mode() -> Self {
        Self {
            decoding_key: None,
            dev_mode: true,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthedUser, AuthError> {
        if self.dev_mode {
            return Self::validate_dev_token(token);
        }

        let key = self.decoding_key.as_ref().ok_or(AuthError::InvalidToken)?;
        let data =
            decode::<Claims>(token, key, &Validation::new(Algorithm::HS256)).map_err(|e| {
                tracing::warn!("JWT validation failed: {:?}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken,
                }
            })?;

        let id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthedUser {
            id,
            username: clamp_username(&data.claims.username),
        })
    }

    fn validate_dev_token(token: &str) -> Result<AuthedUser, AuthError> {
        let (id, username) = token.split_once(':').ok_or(AuthError::InvalidToken)?;
        let id = Uuid::parse_str(id).map_err(|_| AuthError::InvalidToken)?;
        if username.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(AuthedUser {
            id,
            username: clamp_username(username),
        })
    }
}

/// Usernames ride in presence and broadcast payloads, which cap them at 24
/// characters; clamp at the door so our own broadcasts always validate.
fn clamp_username(raw: &str) -> String {
    raw.chars()
        .take(race_core::sync::MAX_USERNAME_CHARS)
        .collect()
}
