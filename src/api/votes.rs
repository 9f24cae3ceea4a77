use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::db::models::VoteState;
use crate::db::queries;
use crate::error::AppResult;
use crate::state::AppState;
use crate::validation::parse_id;

pub fn router() -> Router<AppState> {
    Router::new().route("/problems/{id}/vote", post(toggle_vote).get(vote_status))
}

#[derive(Debug, Serialize)]
struct VoteStatusResponse {
    voted: bool,
}

async fn toggle_vote(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<VoteState>> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let vote = queries::toggle_vote(&state.db, &problem_id, &user.id()).await?;

    tracing::debug!(problem_id = %problem_id, voted = vote.voted, votes = vote.votes, "vote toggled");
    Ok(Json(vote))
}

async fn vote_status(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<VoteStatusResponse>> {
    let problem_id = parse_id(&id, "problem")?.to_string();
    let Some(user) = user else {
        return Ok(Json(VoteStatusResponse { voted: false }));
    };

    let voted = queries::has_voted(&state.db, &problem_id, &user.id.to_string()).await?;
    Ok(Json(VoteStatusResponse { voted }))
}
