use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AuthConfig, AuthMode};
use crate::storage::Storage;

/// Role claim value that grants administrator access
pub const ADMIN_ROLE: &str = "ADMIN";

/// User id attached to requests when authentication is disabled
pub const ANONYMOUS_USER: &str = "anonymous";

/// The authenticated caller, inserted as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub is_admin: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing session token")]
    MissingToken,
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token mode requires AUTH_TOKEN_SECRET")]
    MissingSecret,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::MissingToken => "Missing session token",
            AuthError::InvalidToken(_) => "Invalid or expired session token",
            AuthError::MissingSecret => "Authentication is misconfigured",
        };
        let status = match self {
            AuthError::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    #[serde(alias = "_id")]
    sub: String,
    #[serde(default)]
    role: Option<String>,
}

pub struct AuthService {
    mode: AuthMode,
    key: Option<DecodingKey>,
    cookie_name: String,
    storage: Arc<dyn Storage>,
}

impl AuthService {
    pub fn new(config: &AuthConfig, storage: Arc<dyn Storage>) -> Result<Self, AuthError> {
        let key = match config.mode {
            AuthMode::None => None,
            AuthMode::Token => {
                let secret = config
                    .token_secret
                    .as_deref()
                    .ok_or(AuthError::MissingSecret)?;
                Some(DecodingKey::from_secret(secret.as_bytes()))
            }
        };

        Ok(Self {
            mode: config.mode.clone(),
            key,
            cookie_name: config.cookie_name.clone(),
            storage,
        })
    }

    /// Pull the session token from a bearer header or the session cookie
    fn token_from_headers<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if bearer.is_some() {
            return bearer;
        }

        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)
            .filter(|t| !t.is_empty())
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        let key = match (&self.mode, &self.key) {
            (AuthMode::None, _) => {
                return Ok(AuthUser {
                    user_id: ANONYMOUS_USER.to_string(),
                    is_admin: true,
                })
            }
            (AuthMode::Token, Some(key)) => key,
            (AuthMode::Token, None) => return Err(AuthError::MissingSecret),
        };

        let token = self
            .token_from_headers(headers)
            .ok_or(AuthError::MissingToken)?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Sessions may be issued without an expiry
        validation.required_spec_claims.clear();
        let claims = decode::<SessionClaims>(token, key, &validation)?.claims;

        let role_admin = claims.role.as_deref() == Some(ADMIN_ROLE);
        let is_admin = role_admin
            || self.storage.is_admin(&claims.sub).await.unwrap_or_else(|e| {
                warn!("admin lookup failed for {}: {}", claims.sub, e);
                false
            });

        Ok(AuthUser {
            user_id: claims.sub,
            is_admin,
        })
    }
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_service.authenticate(&headers).await {
        Ok(user) => {
            debug!(user_id = %user.user_id, is_admin = user.is_admin, "authenticated request");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            debug!("rejected request: {}", e);
            e.into_response()
        }
    }
}
