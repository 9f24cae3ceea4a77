use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::ProblemRecord;
use crate::db::queries::format_timestamp;

pub const MAX_LIMIT: i64 = 100;
const MAX_SEARCH_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    Votes,
    Discussions,
    Views,
    Title,
}

impl SortField {
    /// Unknown values sort newest first.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "votes" | "most-voted" => Self::Votes,
            "discussions" | "most-discussed" => Self::Discussions,
            "views" | "view_count" | "most-viewed" => Self::Views,
            "title" | "alphabetical" => Self::Title,
            _ => Self::CreatedAt,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Votes => "votes",
            Self::Discussions => "discussions",
            Self::Views => "view_count",
            Self::Title => "title",
        }
    }

    pub fn descending(self) -> bool {
        !matches!(self, Self::Title)
    }
}

/// The sort column's value on the cursor row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortValue {
    Count(i64),
    Text(String),
}

impl SortValue {
    /// Reads the value carried in `cursor_value`; `None` if it does not fit
    /// the sort column.
    pub fn parse(sort: SortField, raw: &str) -> Option<Self> {
        match sort {
            SortField::CreatedAt => None,
            SortField::Title => Some(Self::Text(raw.to_string())),
            SortField::Votes | SortField::Discussions | SortField::Views => {
                raw.trim().parse().ok().map(Self::Count)
            }
        }
    }

    pub fn of(sort: SortField, problem: &ProblemRecord) -> Option<Self> {
        match sort {
            SortField::CreatedAt => None,
            SortField::Votes => Some(Self::Count(problem.votes)),
            SortField::Discussions => Some(Self::Count(problem.discussions)),
            SortField::Views => Some(Self::Count(problem.view_count)),
            SortField::Title => Some(Self::Text(problem.title.clone())),
        }
    }

    pub fn to_query_value(&self) -> String {
        match self {
            Self::Count(count) => count.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Position of the last row the client has seen.
///
/// For sorts other than creation time the cursor also needs the row's sort
/// value. Clients echo it back in `cursor_value`; when it is missing the
/// lister looks it up from `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub id: String,
    pub created_at: String,
    pub sort_value: Option<SortValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
    pub cursor: Option<Cursor>,
    pub sort: SortField,
    pub category: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub search: Option<String>,
}

impl ListParams {
    /// Never fails: malformed values fall back to their defaults and
    /// out-of-range numbers are clamped.
    pub fn from_query(query: &HashMap<String, String>, default_limit: i64) -> Self {
        let limit = query
            .get("limit")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(default_limit)
            .clamp(1, MAX_LIMIT);

        let offset = query
            .get("offset")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0);

        let sort = query
            .get("sort_by")
            .map(|value| SortField::parse(value))
            .unwrap_or_default();

        let cursor = parse_cursor(
            sort,
            query.get("cursor_id").map(String::as_str),
            query.get("cursor_created_at").map(String::as_str),
            query.get("cursor_value").map(String::as_str),
        );

        Self {
            limit,
            offset,
            cursor,
            sort,
            category: equality_filter(query.get("category")),
            status: equality_filter(query.get("status")),
            user_id: equality_filter(query.get("user_id")),
            search: search_term(query.get("search")),
        }
    }
}

fn equality_filter(value: Option<&String>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("all") {
        return None;
    }
    Some(value.to_string())
}

fn search_term(value: Option<&String>) -> Option<String> {
    let term: String = value?.trim().chars().take(MAX_SEARCH_CHARS).collect();
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}

fn parse_cursor(
    sort: SortField,
    id: Option<&str>,
    created_at: Option<&str>,
    value: Option<&str>,
) -> Option<Cursor> {
    let id = Uuid::parse_str(id?.trim()).ok()?;
    let created_at = DateTime::parse_from_rfc3339(created_at?.trim()).ok()?;
    let sort_value = match value {
        Some(raw) if sort != SortField::CreatedAt => Some(SortValue::parse(sort, raw)?),
        _ => None,
    };

    Some(Cursor {
        id: id.to_string(),
        created_at: format_timestamp(created_at.with_timezone(&Utc)),
        sort_value,
    })
}
