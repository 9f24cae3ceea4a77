use serde::Serialize;
use sqlx::FromRow;

/// Row shape of `problems`; list columns are JSON-encoded text.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProblemRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: String,
    pub impacts: String,
    pub challenges: String,
    pub status: String,
    pub votes: i64,
    pub discussions: i64,
    pub view_count: i64,
    pub quality_score: f64,
    pub created_at: String,
    pub updated_at: String,
    pub last_activity_at: String,
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub reputation: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub reputation: i64,
}

/// Comment joined with its author's public profile.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CommentRecord {
    pub id: String,
    pub problem_id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: String,
    pub author_display_name: Option<String>,
    pub author_photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReplyRecord {
    pub id: String,
    pub comment_id: String,
    pub problem_id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: String,
    pub author_display_name: Option<String>,
    pub author_photo_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProblemDetails {
    pub problem: ProblemRecord,
    pub author: Option<UserSummary>,
}

#[derive(Debug, Clone)]
pub struct CommentThread {
    pub comment: CommentRecord,
    pub replies: Vec<ReplyRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteState {
    pub voted: bool,
    pub votes: i64,
}
