pub mod comments;
pub mod problems;
pub mod votes;


use axum::Json;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(problems::router())
        .merge(votes::router())
        .merge(comments::router())
}

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// Public profile shown next to problems, comments and replies.
#[derive(Debug, Serialize)]
pub struct AuthorResponse {
    pub id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    /// Only the problem detail view loads the author's reputation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation: Option<i64>,
}

/// Decodes a request body, answering malformed JSON with a 400.
///
/// Handlers take the raw body so ownership checks can run before parsing.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|error| AppError::BadRequest(format!("Invalid JSON body: {error}")))
}
