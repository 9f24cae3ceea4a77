use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::state::AppState;

pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Underlying error text of a 500, kept off the body until
/// [`expose_internal_details`] decides the environment may see it.
#[derive(Debug, Clone)]
struct InternalDetail(String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal server error")]
    Internal(Option<String>),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error, details) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message, None),
            Self::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                "validation_failed",
                "Validation failed".to_string(),
                serde_json::to_value(fields).ok(),
            ),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
                None,
            ),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, "forbidden", message, None),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message, None),
            Self::Conflict(message) => (StatusCode::CONFLICT, "conflict", message, None),
            Self::Configuration(message) => {
                tracing::error!(%message, "request rejected by configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration",
                    "Server configuration error".to_string(),
                    None,
                )
            }
            Self::Internal(detail) => {
                let mut response = internal_response(None);
                if let Some(detail) = detail {
                    response.extensions_mut().insert(InternalDetail(detail));
                }
                return response;
            }
        };

        let body = Json(ErrorBody {
            error,
            code,
            details,
        });

        (status, body).into_response()
    }
}

fn internal_response(details: Option<Value>) -> Response {
    let body = Json(ErrorBody {
        error: INTERNAL_MESSAGE.to_string(),
        code: "internal",
        details,
    });
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}

/// Rewrites 500 bodies to carry the underlying error text when running with
/// `--environment development`.
pub async fn expose_internal_details(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let Some(InternalDetail(detail)) = response.extensions_mut().remove::<InternalDetail>() else {
        return response;
    };

    if state.config.environment.is_development() {
        internal_response(Some(Value::String(detail)))
    } else {
        response
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound("record not found".to_string()),
            sqlx::Error::Database(db_error) => {
                let message = db_error.message().to_string();
                if db_error.is_unique_violation() {
                    Self::Conflict(message)
                } else if db_error.is_foreign_key_violation() {
                    Self::BadRequest("referenced record not found".to_string())
                } else if db_error.is_check_violation() {
                    Self::BadRequest("data validation failed".to_string())
                } else {
                    tracing::error!(?db_error, "database error");
                    Self::Internal(Some(message))
                }
            }
            other => {
                tracing::error!(error = ?other, "sqlx error");
                Self::Internal(Some(other.to_string()))
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "unexpected error");
        Self::Internal(Some(format!("{error:#}")))
    }
}
