use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::{parse_json, AuthorResponse, SuccessResponse};
use crate::auth::AuthUser;
use crate::db::models::{CommentRecord, CommentThread, ReplyRecord};
use crate::db::queries;
use crate::error::AppResult;
use crate::state::AppState;
use crate::validation::{parse_id, validate_comment_text, validate_reply_text};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/problems/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route("/comments/{id}/replies", post(create_reply))
        .route("/comments/{id}", delete(delete_comment))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct CommentResponse {
    id: String,
    problem_id: String,
    user_id: String,
    text: String,
    created_at: String,
    author: AuthorResponse,
    replies: Vec<ReplyResponse>,
}

#[derive(Debug, Serialize)]
struct ReplyResponse {
    id: String,
    comment_id: String,
    problem_id: String,
    user_id: String,
    text: String,
    created_at: String,
    author: AuthorResponse,
}

#[derive(Debug, Serialize)]
struct CommentListResponse {
    comments: Vec<CommentResponse>,
}

#[derive(Debug, Serialize)]
struct CommentEnvelope {
    comment: CommentResponse,
}

#[derive(Debug, Serialize)]
struct ReplyEnvelope {
    reply: ReplyResponse,
}

async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<CommentListResponse>> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let threads = queries::list_comment_threads(&state.db, &problem_id).await?;

    Ok(Json(CommentListResponse {
        comments: threads.into_iter().map(map_thread).collect(),
    }))
}

async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<CommentEnvelope>)> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let request: TextRequest = parse_json(&body)?;
    let text = state.sanitizer.clean(&request.text);
    validate_comment_text(&text)?;

    let comment = queries::create_comment(&state.db, &problem_id, &user.id(), &text).await?;
    tracing::info!(comment_id = %comment.id, problem_id = %problem_id, "comment created");

    Ok((
        StatusCode::CREATED,
        Json(CommentEnvelope {
            comment: map_comment(comment, Vec::new()),
        }),
    ))
}

async fn create_reply(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ReplyEnvelope>)> {
    let comment_id = parse_id(&id, "comment")?.to_string();
    let request: TextRequest = parse_json(&body)?;
    let text = state.sanitizer.clean(&request.text);
    validate_reply_text(&text)?;

    let reply = queries::create_reply(&state.db, &comment_id, &user.id(), &text).await?;

    Ok((
        StatusCode::CREATED,
        Json(ReplyEnvelope {
            reply: map_reply(reply),
        }),
    ))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    let comment_id = parse_id(&id, "comment")?.to_string();
    queries::delete_comment(&state.db, &comment_id, &user.id()).await?;
    tracing::info!(comment_id = %comment_id, "comment deleted");

    Ok(SuccessResponse::ok())
}

fn map_thread(thread: CommentThread) -> CommentResponse {
    let replies = thread.replies.into_iter().map(map_reply).collect();
    map_comment(thread.comment, replies)
}

fn map_comment(record: CommentRecord, replies: Vec<ReplyResponse>) -> CommentResponse {
    CommentResponse {
        author: AuthorResponse {
            id: record.user_id.clone(),
            display_name: record.author_display_name,
            photo_url: record.author_photo_url,
            reputation: None,
        },
        id: record.id,
        problem_id: record.problem_id,
        user_id: record.user_id,
        text: record.text,
        created_at: record.created_at,
        replies,
    }
}

fn map_reply(record: ReplyRecord) -> ReplyResponse {
    ReplyResponse {
        author: AuthorResponse {
            id: record.user_id.clone(),
            display_name: record.author_display_name,
            photo_url: record.author_photo_url,
            reputation: None,
        },
        id: record.id,
        comment_id: record.comment_id,
        problem_id: record.problem_id,
        user_id: record.user_id,
        text: record.text,
        created_at: record.created_at,
    }
}
