use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::auth::{AuthError, AuthenticatedUser, IdentityProvider, UserMetadata};

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    email: Option<String>,
    user_metadata: Option<UserMetadata>,
}

/// Asks the auth server who a token belongs to.
pub struct RemoteIdentityProvider {
    client: reqwest::Client,
    user_url: String,
    api_key: String,
}

impl RemoteIdentityProvider {
    pub fn new(auth_url: &str, api_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build auth client")?;

        Ok(Self {
            client,
            user_url: user_endpoint(auth_url),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let response = self
            .client
            .get(&self.user_url)
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|error| AuthError::Upstream(error.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidToken);
            }
            status => {
                return Err(AuthError::Upstream(format!(
                    "auth server returned status {status}"
                )));
            }
        }

        let user: RemoteUser = response
            .json()
            .await
            .map_err(|error| AuthError::Upstream(format!("invalid user payload: {error}")))?;

        user.user_metadata
            .unwrap_or_default()
            .into_user(&user.id, user.email)
    }
}

fn user_endpoint(auth_url: &str) -> String {
    format!("{}/auth/v1/user", auth_url.trim_end_matches('/'))
}
