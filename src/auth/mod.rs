pub mod jwt;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::db::queries;
use crate::error::AppError;
use crate::state::AppState;

pub use jwt::JwtIdentityProvider;
pub use remote::RemoteIdentityProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("identity provider unavailable: {0}")]
    Upstream(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;

    /// Verifies a token without leaving the process. Providers that need a
    /// network round trip return `None`.
    fn verify_offline(&self, _token: &str) -> Option<Uuid> {
        None
    }
}

/// Profile fields both token claims and the auth server's user object carry.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserMetadata {
    full_name: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
}

impl UserMetadata {
    pub(crate) fn into_user(
        self,
        id: &str,
        email: Option<String>,
    ) -> Result<AuthenticatedUser, AuthError> {
        let id = Uuid::parse_str(id).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthenticatedUser {
            id,
            email,
            display_name: self.full_name.or(self.name),
            photo_url: self.avatar_url,
        })
    }
}

/// A local JWT secret takes precedence over the remote auth server.
pub fn provider_from_config(
    config: &IdentityConfig,
) -> anyhow::Result<Option<Arc<dyn IdentityProvider>>> {
    if let Some(secret) = config.jwt_secret() {
        let audience = config
            .jwt_audience
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        return Ok(Some(Arc::new(JwtIdentityProvider::new(secret, audience))));
    }

    if let Some((auth_url, api_key)) = config.remote() {
        return Ok(Some(Arc::new(RemoteIdentityProvider::new(
            auth_url, api_key,
        )?)));
    }

    Ok(None)
}

/// The caller's verified identity; the user row is upserted on extraction.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

impl AuthUser {
    pub fn id(&self) -> String {
        self.0.id.to_string()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provider = state.identity.as_ref().ok_or_else(|| {
            AppError::Configuration("identity provider is not configured".to_string())
        })?;

        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let user = provider
            .authenticate(token)
            .await
            .map_err(rejected_token)?;

        queries::upsert_user(&state.db, &user).await?;
        Ok(Self(user))
    }
}

/// Like [`AuthUser`] but never rejects: a missing or bad token is `None`.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let (Some(provider), Some(token)) = (state.identity.as_ref(), bearer_token(&parts.headers))
        else {
            return Ok(Self(None));
        };

        match provider.authenticate(token).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(error) => {
                log_rejection(&error);
                Ok(Self(None))
            }
        }
    }
}

fn rejected_token(error: AuthError) -> AppError {
    log_rejection(&error);
    AppError::Unauthorized
}

fn log_rejection(error: &AuthError) {
    match error {
        AuthError::Upstream(message) => {
            tracing::warn!(error = %message, "identity provider request failed");
        }
        AuthError::InvalidToken | AuthError::Expired => {
            tracing::debug!(error = %error, "bearer token rejected");
        }
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token)
}

pub(crate) fn parse_bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    if token.is_empty() {
        return None;
    }

    Some(token)
}

#[cfg(test)]
mod tests {
    use crate::config::IdentityConfig;

    use super::{parse_bearer_token, provider_from_config};

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(parse_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(parse_bearer_token("Bearer "), None);
        assert_eq!(parse_bearer_token("Basic abc"), None);
        assert_eq!(parse_bearer_token("abc"), None);
    }

    #[test]
    fn no_identity_settings_means_no_provider() {
        let provider = provider_from_config(&IdentityConfig::default())
            .expect("empty config should not fail");
        assert!(provider.is_none());

        let provider = provider_from_config(&IdentityConfig {
            auth_url: Some("https://auth.example.com".to_string()),
            auth_api_key: Some("anon-key".to_string()),
            ..IdentityConfig::default()
        })
        .expect("remote provider should build");
        assert!(provider.is_some());
    }
}
