use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::{parse_json, AuthorResponse, SuccessResponse};
use crate::auth::AuthUser;
use crate::db::models::{ProblemRecord, UserSummary};
use crate::db::queries;
use crate::db::queries::{NewProblemInput, UpdateProblemInput};
use crate::error::AppResult;
use crate::listing::envelope::ProblemPage;
use crate::listing::params::ListParams;
use crate::sanitize::Sanitizer;
use crate::state::AppState;
use crate::validation::{parse_id, validate_new_problem, validate_problem_update};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/problems", get(list_problems).post(create_problem))
        .route(
            "/problems/{id}",
            get(get_problem).patch(update_problem).delete(delete_problem),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateProblemRequest {
    title: String,
    description: String,
    category: String,
    tags: Vec<String>,
    impacts: Vec<String>,
    challenges: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateProblemRequest {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    impacts: Option<Vec<String>>,
    challenges: Option<Vec<String>>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProblemResponse {
    id: String,
    user_id: String,
    title: String,
    description: String,
    category: String,
    tags: Vec<String>,
    impacts: Vec<String>,
    challenges: Vec<String>,
    status: String,
    votes: i64,
    discussions: i64,
    view_count: i64,
    quality_score: f64,
    created_at: String,
    updated_at: String,
    last_activity_at: String,
    archived_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProblemEnvelope {
    problem: ProblemResponse,
}

#[derive(Debug, Serialize)]
struct ProblemDetailsResponse {
    problem: ProblemResponse,
    author: Option<AuthorResponse>,
}

async fn list_problems(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> AppResult<Json<ProblemPage<ProblemResponse>>> {
    let params = ListParams::from_query(&query, state.config.listing.default_page_limit);
    let page = state.lister.list(&state.db, &params).await?;
    Ok(Json(page.try_map(map_problem_record)?))
}

async fn create_problem(
    State(state): State<AppState>,
    user: AuthUser,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ProblemEnvelope>)> {
    let request: CreateProblemRequest = parse_json(&body)?;
    let sanitizer = state.sanitizer;

    let input = NewProblemInput {
        user_id: user.id(),
        title: sanitizer.clean(&request.title),
        description: sanitizer.clean(&request.description),
        category: request.category.trim().to_string(),
        tags: sanitizer.clean_list(&request.tags),
        impacts: sanitizer.clean_list(&request.impacts),
        challenges: sanitizer.clean_list(&request.challenges),
    };
    validate_new_problem(&input)?;

    let problem = queries::create_problem(&state.db, input).await?;
    tracing::info!(problem_id = %problem.id, user_id = %problem.user_id, "problem created");

    Ok((
        StatusCode::CREATED,
        Json(ProblemEnvelope {
            problem: map_problem_record(problem)?,
        }),
    ))
}

async fn get_problem(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ProblemDetailsResponse>> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let details = queries::get_problem_details(&state.db, &problem_id).await?;

    Ok(Json(ProblemDetailsResponse {
        problem: map_problem_record(details.problem)?,
        author: details.author.map(map_author),
    }))
}

async fn update_problem(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<ProblemEnvelope>> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let owner_id = queries::problem_owner(&state.db, &problem_id).await?;
    queries::ensure_owner(&owner_id, &user.id(), "edit your own problems")?;

    let request: UpdateProblemRequest = parse_json(&body)?;
    let input = sanitize_update(&state.sanitizer, request);
    validate_problem_update(&input)?;

    let problem = queries::update_problem(&state.db, &problem_id, input).await?;
    Ok(Json(ProblemEnvelope {
        problem: map_problem_record(problem)?,
    }))
}

async fn delete_problem(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let owner_id = queries::problem_owner(&state.db, &problem_id).await?;
    queries::ensure_owner(&owner_id, &user.id(), "delete your own problems")?;

    queries::delete_problem(&state.db, &problem_id).await?;
    tracing::info!(problem_id = %problem_id, "problem deleted");

    Ok(SuccessResponse::ok())
}

fn sanitize_update(sanitizer: &Sanitizer, request: UpdateProblemRequest) -> UpdateProblemInput {
    UpdateProblemInput {
        title: request.title.map(|title| sanitizer.clean(&title)),
        description: request
            .description
            .map(|description| sanitizer.clean(&description)),
        category: request.category.map(|category| category.trim().to_string()),
        tags: request.tags.map(|tags| sanitizer.clean_list(&tags)),
        impacts: request.impacts.map(|impacts| sanitizer.clean_list(&impacts)),
        challenges: request
            .challenges
            .map(|challenges| sanitizer.clean_list(&challenges)),
        status: request.status.map(|status| status.trim().to_string()),
    }
}

pub(crate) fn map_problem_record(record: ProblemRecord) -> AppResult<ProblemResponse> {
    Ok(ProblemResponse {
        tags: queries::decode_list(&record.tags)?,
        impacts: queries::decode_list(&record.impacts)?,
        challenges: queries::decode_list(&record.challenges)?,
        id: record.id,
        user_id: record.user_id,
        title: record.title,
        description: record.description,
        category: record.category,
        status: record.status,
        votes: record.votes,
        discussions: record.discussions,
        view_count: record.view_count,
        quality_score: record.quality_score,
        created_at: record.created_at,
        updated_at: record.updated_at,
        last_activity_at: record.last_activity_at,
        archived_at: record.archived_at,
    })
}

fn map_author(author: UserSummary) -> AuthorResponse {
    AuthorResponse {
        id: author.id,
        display_name: author.display_name,
        photo_url: author.photo_url,
        reputation: Some(author.reputation),
    }
}
