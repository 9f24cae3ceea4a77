use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{AuthError, AuthenticatedUser, IdentityProvider, UserMetadata};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    user_metadata: Option<UserMetadata>,
}

/// Verifies HS256 access tokens signed with the auth service's shared secret.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|error| match error.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })?;

        claims
            .user_metadata
            .unwrap_or_default()
            .into_user(&claims.sub, claims.email)
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        self.verify(token)
    }

    fn verify_offline(&self, token: &str) -> Option<Uuid> {
        self.verify(token).ok().map(|user| user.id)
    }
}
