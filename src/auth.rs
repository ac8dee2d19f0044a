//! Bearer access-token verification.
//!
//! Tokens are minted by the login service; this crate only checks them.

use std::sync::Arc;

use axum::extract::{FromRef, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::config::Token;
use crate::{AppState, ServerError};

const BEARER: &str = "Bearer ";

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Account ID.
    pub sub: String,
    /// Identifies the expiration time, in seconds.
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("`token` needs either `secret` or `public_key_pem`")]
    MissingKey,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Verify access tokens.
#[derive(Clone)]
pub struct AccessTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl AccessTokenVerifier {
    /// Create a new [`AccessTokenVerifier`] from the `token` section.
    pub fn new(config: &Token) -> Result<Self, AuthError> {
        let (algorithm, key) = match (&config.secret, &config.public_key_pem) {
            (Some(secret), _) => (Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes())),
            (None, Some(pem)) => (Algorithm::ES256, DecodingKey::from_ec_pem(pem.as_bytes())?),
            (None, None) => return Err(AuthError::MissingKey),
        };

        let mut validation = Validation::new(algorithm);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self { key, validation })
    }

    /// Decode and check a token, returning its subject.
    pub fn verify(&self, token: &str) -> Result<AccountId, ServerError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| {
                tracing::debug!(error = %err, "access token rejected");
                ServerError::Unauthorized
            })?
            .claims;

        claims.sub.parse().map_err(|_| ServerError::Unauthorized)
    }
}

impl FromRef<AppState> for Arc<AccessTokenVerifier> {
    fn from_ref(state: &AppState) -> Arc<AccessTokenVerifier> {
        Arc::clone(&state.auth)
    }
}

/// Custom middleware for authentification.
///
/// Inserts the caller's [`AccountId`] into request extensions.
pub async fn authenticate(
    State(verifier): State<Arc<AccessTokenVerifier>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER))
        .ok_or(ServerError::Unauthorized)?;

    let id = verifier.verify(token.trim())?;

    tracing::trace!(account_id = %id, "request authenticated");

    req.extensions_mut().insert::<AccountId>(id);
    Ok(next.run(req).await)
}

/// Sign an HS256 token, as the login service would.
#[cfg(test)]
pub fn sign(secret: &str, sub: &str, ttl: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: sub.to_owned(),
        exp: (now + ttl).max(0) as u64,
        iat: now as u64,
        aud: None,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("cannot create JWT")
}
