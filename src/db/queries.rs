use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query_builder::QueryBuilder;
use sqlx::{Any, AnyPool, Executor};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::models::{
    CommentRecord, CommentThread, ProblemDetails, ProblemRecord, ReplyRecord, UserRecord,
    UserSummary, VoteState,
};
use crate::error::{AppError, AppResult};

pub(crate) const PROBLEM_COLUMNS: &str = r#"
    id,
    user_id,
    title,
    description,
    category,
    tags,
    impacts,
    challenges,
    status,
    votes,
    discussions,
    view_count,
    quality_score,
    created_at,
    updated_at,
    last_activity_at,
    archived_at
"#;

#[derive(Debug, Clone)]
pub struct NewProblemInput {
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub impacts: Vec<String>,
    pub challenges: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProblemInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub impacts: Option<Vec<String>>,
    pub challenges: Option<Vec<String>>,
    pub status: Option<String>,
}

impl UpdateProblemInput {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.impacts.is_none()
            && self.challenges.is_none()
            && self.status.is_none()
    }
}

pub async fn upsert_user(pool: &AnyPool, user: &AuthenticatedUser) -> AppResult<UserRecord> {
    let now = now_timestamp();
    let user_id = user.id.to_string();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, display_name, photo_url, reputation, created_at, updated_at)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            email = COALESCE(excluded.email, users.email),
            display_name = COALESCE(excluded.display_name, users.display_name),
            photo_url = COALESCE(excluded.photo_url, users.photo_url),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&user_id)
    .bind(user.email.clone())
    .bind(user.display_name.clone())
    .bind(user.photo_url.clone())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let record = sqlx::query_as::<Any, UserRecord>(
        r#"
        SELECT id, email, display_name, photo_url, reputation, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(&user_id)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

pub async fn create_problem(pool: &AnyPool, input: NewProblemInput) -> AppResult<ProblemRecord> {
    let now = now_timestamp();
    let problem_id = Uuid::new_v4().to_string();
    let score = quality_score(
        &input.title,
        &input.description,
        input.tags.len(),
        input.impacts.len(),
        input.challenges.len(),
    );

    sqlx::query(
        r#"
        INSERT INTO problems (
            id,
            user_id,
            title,
            description,
            category,
            tags,
            impacts,
            challenges,
            status,
            votes,
            discussions,
            view_count,
            quality_score,
            title_search,
            description_search,
            created_at,
            updated_at,
            last_activity_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'open', 0, 0, 0, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&problem_id)
    .bind(&input.user_id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.category)
    .bind(encode_list(&input.tags)?)
    .bind(encode_list(&input.impacts)?)
    .bind(encode_list(&input.challenges)?)
    .bind(score)
    .bind(search_fold(&input.title))
    .bind(search_fold(&input.description))
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_problem_record(pool, &problem_id).await
}

/// Reads a problem for display, counting the view in the same transaction.
pub async fn get_problem_details(pool: &AnyPool, problem_id: &str) -> AppResult<ProblemDetails> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query("UPDATE problems SET view_count = view_count + 1 WHERE id = ?")
        .bind(problem_id)
        .execute(&mut *tx)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Problem not found".to_string()));
    }

    let problem = sqlx::query_as::<Any, ProblemRecord>(&format!(
        "SELECT {PROBLEM_COLUMNS} FROM problems WHERE id = ?"
    ))
    .bind(problem_id)
    .fetch_one(&mut *tx)
    .await?;

    let author = sqlx::query_as::<Any, UserSummary>(
        r#"
        SELECT id, display_name, photo_url, reputation
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(&problem.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ProblemDetails { problem, author })
}

pub async fn problem_owner(pool: &AnyPool, problem_id: &str) -> AppResult<String> {
    sqlx::query_scalar::<Any, String>("SELECT user_id FROM problems WHERE id = ?")
        .bind(problem_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Problem not found".to_string()))
}

pub fn ensure_owner(owner_id: &str, user_id: &str, action: &str) -> AppResult<()> {
    if owner_id == user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Forbidden: You can only {action}"
        )))
    }
}

/// Applies a partial update. The row is write-locked before it is read, so
/// concurrent edits merge against each other instead of the stale row.
pub async fn update_problem(
    pool: &AnyPool,
    problem_id: &str,
    input: UpdateProblemInput,
) -> AppResult<ProblemRecord> {
    let mut tx = pool.begin().await?;

    let locked = sqlx::query("UPDATE problems SET updated_at = updated_at WHERE id = ?")
        .bind(problem_id)
        .execute(&mut *tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::NotFound("Problem not found".to_string()));
    }

    let existing = get_problem_record(&mut *tx, problem_id).await?;

    let title = input.title.unwrap_or(existing.title);
    let description = input.description.unwrap_or(existing.description);
    let category = input.category.unwrap_or(existing.category);
    let status = input.status.unwrap_or(existing.status);
    let tags = match input.tags {
        Some(tags) => tags,
        None => decode_list(&existing.tags)?,
    };
    let impacts = match input.impacts {
        Some(impacts) => impacts,
        None => decode_list(&existing.impacts)?,
    };
    let challenges = match input.challenges {
        Some(challenges) => challenges,
        None => decode_list(&existing.challenges)?,
    };

    let score = quality_score(
        &title,
        &description,
        tags.len(),
        impacts.len(),
        challenges.len(),
    );
    let now = now_timestamp();

    sqlx::query(
        r#"
        UPDATE problems
        SET title = ?,
            description = ?,
            category = ?,
            tags = ?,
            impacts = ?,
            challenges = ?,
            status = ?,
            quality_score = ?,
            title_search = ?,
            description_search = ?,
            updated_at = ?,
            last_activity_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&title)
    .bind(&description)
    .bind(&category)
    .bind(encode_list(&tags)?)
    .bind(encode_list(&impacts)?)
    .bind(encode_list(&challenges)?)
    .bind(&status)
    .bind(score)
    .bind(search_fold(&title))
    .bind(search_fold(&description))
    .bind(&now)
    .bind(&now)
    .bind(problem_id)
    .execute(&mut *tx)
    .await?;

    let updated = get_problem_record(&mut *tx, problem_id).await?;
    tx.commit().await?;

    Ok(updated)
}

/// Comments, replies and votes go with the problem through `ON DELETE CASCADE`.
pub async fn delete_problem(pool: &AnyPool, problem_id: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM problems WHERE id = ?")
        .bind(problem_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Problem not found".to_string()));
    }

    Ok(())
}

/// Adds the caller's vote, or removes it if one exists.
///
/// A concurrent insert for the same (user, problem) pair is absorbed by the
/// unique constraint: the insert affects no rows and the vote is reported as
/// already present, without counting it twice.
pub async fn toggle_vote(pool: &AnyPool, problem_id: &str, user_id: &str) -> AppResult<VoteState> {
    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    ensure_problem_exists(&mut tx, problem_id).await?;

    let existing = sqlx::query_scalar::<Any, String>(
        "SELECT id FROM problem_votes WHERE user_id = ? AND problem_id = ?",
    )
    .bind(user_id)
    .bind(problem_id)
    .fetch_optional(&mut *tx)
    .await?;

    let voted = match existing {
        Some(vote_id) => {
            sqlx::query("DELETE FROM problem_votes WHERE id = ?")
                .bind(&vote_id)
                .execute(&mut *tx)
                .await?;
            adjust_votes(&mut tx, problem_id, -1, &now).await?;
            false
        }
        None => {
            let inserted = sqlx::query(
                r#"
                INSERT INTO problem_votes (id, user_id, problem_id, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (user_id, problem_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(problem_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() > 0 {
                adjust_votes(&mut tx, problem_id, 1, &now).await?;
            } else {
                tracing::debug!(problem_id, user_id, "vote already recorded by a concurrent request");
            }
            true
        }
    };

    let votes = sqlx::query_scalar::<Any, i64>("SELECT votes FROM problems WHERE id = ?")
        .bind(problem_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(VoteState { voted, votes })
}

pub async fn has_voted(pool: &AnyPool, problem_id: &str, user_id: &str) -> AppResult<bool> {
    let count = sqlx::query_scalar::<Any, i64>(
        "SELECT COUNT(*) FROM problem_votes WHERE user_id = ? AND problem_id = ?",
    )
    .bind(user_id)
    .bind(problem_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Comments newest first, each with its replies oldest first.
pub async fn list_comment_threads(
    pool: &AnyPool,
    problem_id: &str,
) -> AppResult<Vec<CommentThread>> {
    let comments = sqlx::query_as::<Any, CommentRecord>(
        r#"
        SELECT
            c.id,
            c.problem_id,
            c.user_id,
            c.text,
            c.created_at,
            u.display_name AS author_display_name,
            u.photo_url AS author_photo_url
        FROM comments c
        LEFT JOIN users u ON u.id = c.user_id
        WHERE c.problem_id = ?
        ORDER BY c.created_at DESC, c.id DESC
        "#,
    )
    .bind(problem_id)
    .fetch_all(pool)
    .await?;

    if comments.is_empty() {
        return Ok(Vec::new());
    }

    let replies = sqlx::query_as::<Any, ReplyRecord>(
        r#"
        SELECT
            r.id,
            r.comment_id,
            r.problem_id,
            r.user_id,
            r.text,
            r.created_at,
            u.display_name AS author_display_name,
            u.photo_url AS author_photo_url
        FROM replies r
        LEFT JOIN users u ON u.id = r.user_id
        WHERE r.problem_id = ?
        ORDER BY r.created_at ASC, r.id ASC
        "#,
    )
    .bind(problem_id)
    .fetch_all(pool)
    .await?;

    let mut replies_by_comment: HashMap<String, Vec<ReplyRecord>> = HashMap::new();
    for reply in replies {
        replies_by_comment
            .entry(reply.comment_id.clone())
            .or_default()
            .push(reply);
    }

    Ok(comments
        .into_iter()
        .map(|comment| {
            let replies = replies_by_comment.remove(&comment.id).unwrap_or_default();
            CommentThread { comment, replies }
        })
        .collect())
}

pub async fn create_comment(
    pool: &AnyPool,
    problem_id: &str,
    user_id: &str,
    text: &str,
) -> AppResult<CommentRecord> {
    let now = now_timestamp();
    let comment_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    ensure_problem_exists(&mut tx, problem_id).await?;

    sqlx::query(
        r#"
        INSERT INTO comments (id, problem_id, user_id, text, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&comment_id)
    .bind(problem_id)
    .bind(user_id)
    .bind(text)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    adjust_discussions(&mut tx, problem_id, 1, &now).await?;
    tx.commit().await?;

    get_comment_record(pool, &comment_id).await
}

pub async fn create_reply(
    pool: &AnyPool,
    comment_id: &str,
    user_id: &str,
    text: &str,
) -> AppResult<ReplyRecord> {
    let now = now_timestamp();
    let reply_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    let problem_id =
        sqlx::query_scalar::<Any, String>("SELECT problem_id FROM comments WHERE id = ?")
            .bind(comment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO replies (id, comment_id, problem_id, user_id, text, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&reply_id)
    .bind(comment_id)
    .bind(&problem_id)
    .bind(user_id)
    .bind(text)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    adjust_discussions(&mut tx, &problem_id, 1, &now).await?;
    tx.commit().await?;

    let reply = sqlx::query_as::<Any, ReplyRecord>(
        r#"
        SELECT
            r.id,
            r.comment_id,
            r.problem_id,
            r.user_id,
            r.text,
            r.created_at,
            u.display_name AS author_display_name,
            u.photo_url AS author_photo_url
        FROM replies r
        LEFT JOIN users u ON u.id = r.user_id
        WHERE r.id = ?
        "#,
    )
    .bind(&reply_id)
    .fetch_one(pool)
    .await?;

    Ok(reply)
}

/// Deletes an owned comment with its replies and takes all of them off the
/// problem's discussion count.
pub async fn delete_comment(pool: &AnyPool, comment_id: &str, user_id: &str) -> AppResult<()> {
    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    let (owner_id, problem_id) = sqlx::query_as::<Any, (String, String)>(
        "SELECT user_id, problem_id FROM comments WHERE id = ?",
    )
    .bind(comment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    ensure_owner(&owner_id, user_id, "delete your own comments")?;

    let reply_count =
        sqlx::query_scalar::<Any, i64>("SELECT COUNT(*) FROM replies WHERE comment_id = ?")
            .bind(comment_id)
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

    adjust_discussions(&mut tx, &problem_id, -(1 + reply_count), &now).await?;
    tx.commit().await?;

    Ok(())
}

/// Archives every open or active problem without activity since `cutoff`.
pub async fn archive_stale_problems(
    pool: &AnyPool,
    cutoff: DateTime<Utc>,
) -> AppResult<Vec<String>> {
    let cutoff = format_timestamp(cutoff);
    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    let stale_ids = sqlx::query_scalar::<Any, String>(
        r#"
        SELECT id
        FROM problems
        WHERE status IN ('open', 'active') AND last_activity_at < ?
        ORDER BY last_activity_at ASC
        "#,
    )
    .bind(&cutoff)
    .fetch_all(&mut *tx)
    .await?;

    if stale_ids.is_empty() {
        tx.commit().await?;
        return Ok(stale_ids);
    }

    let mut update = QueryBuilder::<Any>::new("UPDATE problems SET status = 'archived', archived_at = ");
    update.push_bind(now.clone());
    update.push(", updated_at = ");
    update.push_bind(now);
    update.push(" WHERE id IN (");
    let mut ids = update.separated(", ");
    for id in &stale_ids {
        ids.push_bind(id.clone());
    }
    ids.push_unseparated(")");

    update.build().execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(stale_ids)
}

/// Weights title, description and list completeness into a 0..=1 score.
pub fn quality_score(
    title: &str,
    description: &str,
    tags: usize,
    impacts: usize,
    challenges: usize,
) -> f64 {
    let mut score = 0.0;
    score += (title.chars().count() as f64 / 100.0).min(0.2);
    score += (description.chars().count() as f64 / 500.0).min(0.3);
    score += (tags as f64 / 5.0 * 0.2).min(0.2);
    score += (impacts as f64 / 3.0 * 0.15).min(0.15);
    score += (challenges as f64 / 3.0 * 0.15).min(0.15);
    (score.min(1.0) * 100.0).round() / 100.0
}

pub fn decode_list(raw: &str) -> AppResult<Vec<String>> {
    serde_json::from_str::<Vec<String>>(raw).map_err(|error| {
        tracing::error!(error = ?error, raw, "failed to decode stored list");
        AppError::Internal(Some(format!("corrupt list column: {error}")))
    })
}

fn encode_list(items: &[String]) -> AppResult<String> {
    serde_json::to_string(items).map_err(|error| {
        tracing::error!(error = ?error, "failed to encode list column");
        AppError::Internal(Some(error.to_string()))
    })
}

/// Case folding used for the search columns and for search terms. SQL
/// `LOWER()` only folds ASCII on SQLite, so both sides are folded here.
pub(crate) fn search_fold(text: &str) -> String {
    text.to_lowercase()
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

async fn get_problem_record<'e, E>(executor: E, problem_id: &str) -> AppResult<ProblemRecord>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query_as::<Any, ProblemRecord>(&format!(
        "SELECT {PROBLEM_COLUMNS} FROM problems WHERE id = ?"
    ))
    .bind(problem_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("Problem not found".to_string()))
}

async fn get_comment_record(pool: &AnyPool, comment_id: &str) -> AppResult<CommentRecord> {
    sqlx::query_as::<Any, CommentRecord>(
        r#"
        SELECT
            c.id,
            c.problem_id,
            c.user_id,
            c.text,
            c.created_at,
            u.display_name AS author_display_name,
            u.photo_url AS author_photo_url
        FROM comments c
        LEFT JOIN users u ON u.id = c.user_id
        WHERE c.id = ?
        "#,
    )
    .bind(comment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
}

async fn ensure_problem_exists(
    tx: &mut sqlx::Transaction<'_, Any>,
    problem_id: &str,
) -> AppResult<()> {
    sqlx::query_scalar::<Any, String>("SELECT id FROM problems WHERE id = ?")
        .bind(problem_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Problem not found".to_string()))
}

async fn adjust_votes(
    tx: &mut sqlx::Transaction<'_, Any>,
    problem_id: &str,
    delta: i64,
    now: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE problems
        SET votes = CASE WHEN votes + ? < 0 THEN 0 ELSE votes + ? END,
            last_activity_at = ?
        WHERE id = ?
        "#,
    )
    .bind(delta)
    .bind(delta)
    .bind(now)
    .bind(problem_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn adjust_discussions(
    tx: &mut sqlx::Transaction<'_, Any>,
    problem_id: &str,
    delta: i64,
    now: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE problems
        SET discussions = CASE WHEN discussions + ? < 0 THEN 0 ELSE discussions + ? END,
            last_activity_at = ?
        WHERE id = ?
        "#,
    )
    .bind(delta)
    .bind(delta)
    .bind(now)
    .bind(problem_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
