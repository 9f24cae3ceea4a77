use serde::Serialize;

use crate::db::models::ProblemRecord;
use crate::error::AppResult;
use crate::listing::params::{SortField, SortValue};

#[derive(Debug, Serialize)]
pub struct OffsetPage<T> {
    pub problems: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct CursorPage<T> {
    pub problems: Vec<T>,
    pub pagination: CursorPagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorPagination {
    pub has_more: bool,
    pub next_cursor: Option<NextCursor>,
    pub total_returned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextCursor {
    pub cursor_id: String,
    pub cursor_created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_value: Option<String>,
}

/// A listing page in whichever envelope produced it.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProblemPage<T> {
    Offset(OffsetPage<T>),
    Cursor(CursorPage<T>),
}

impl<T> ProblemPage<T> {
    pub fn problems(&self) -> &[T] {
        match self {
            Self::Offset(page) => &page.problems,
            Self::Cursor(page) => &page.problems,
        }
    }

    /// Converts every row, keeping the envelope metadata.
    pub fn try_map<U, F>(self, mut map: F) -> AppResult<ProblemPage<U>>
    where
        F: FnMut(T) -> AppResult<U>,
    {
        Ok(match self {
            Self::Offset(page) => ProblemPage::Offset(OffsetPage {
                problems: page
                    .problems
                    .into_iter()
                    .map(&mut map)
                    .collect::<AppResult<_>>()?,
                total: page.total,
                limit: page.limit,
                offset: page.offset,
            }),
            Self::Cursor(page) => ProblemPage::Cursor(CursorPage {
                problems: page
                    .problems
                    .into_iter()
                    .map(&mut map)
                    .collect::<AppResult<_>>()?,
                pagination: page.pagination,
            }),
        })
    }
}

pub fn offset_page(
    mut rows: Vec<ProblemRecord>,
    total: i64,
    limit: i64,
    offset: i64,
) -> OffsetPage<ProblemRecord> {
    truncate_lookahead(&mut rows, limit);
    OffsetPage {
        problems: rows,
        total,
        limit,
        offset,
    }
}

pub fn cursor_page(
    mut rows: Vec<ProblemRecord>,
    limit: i64,
    sort: SortField,
) -> CursorPage<ProblemRecord> {
    let has_more = truncate_lookahead(&mut rows, limit);
    let next_cursor = if has_more {
        rows.last().map(|row| NextCursor {
            cursor_id: row.id.clone(),
            cursor_created_at: row.created_at.clone(),
            cursor_value: SortValue::of(sort, row).map(|value| value.to_query_value()),
        })
    } else {
        None
    };

    CursorPage {
        pagination: CursorPagination {
            has_more,
            next_cursor,
            total_returned: rows.len(),
        },
        problems: rows,
    }
}

/// Drops the lookahead row, reporting whether it was there.
fn truncate_lookahead(rows: &mut Vec<ProblemRecord>, limit: i64) -> bool {
    let limit = usize::try_from(limit).unwrap_or(0);
    if rows.len() > limit {
        rows.truncate(limit);
        true
    } else {
        false
    }
}
