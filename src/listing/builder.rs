use sqlx::query_builder::QueryBuilder;
use sqlx::Any;

use crate::db::queries::{search_fold, PROBLEM_COLUMNS};
use crate::listing::params::{Cursor, ListParams, SortField, SortValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    Offset,
    Keyset,
}

/// Selects one row past `limit` so the caller can tell whether another page
/// exists.
pub fn page_query(params: &ListParams, strategy: PageStrategy) -> QueryBuilder<'static, Any> {
    let mut query = QueryBuilder::<Any>::new(format!(
        "SELECT {PROBLEM_COLUMNS} FROM problems WHERE 1 = 1"
    ));

    push_filters(&mut query, params);

    if strategy == PageStrategy::Keyset {
        if let Some(cursor) = &params.cursor {
            push_keyset(&mut query, params.sort, cursor);
        }
    }

    let sort = params.sort;
    query.push(" ORDER BY ");
    if sort != SortField::CreatedAt {
        query.push(sort.column());
        query.push(if sort.descending() { " DESC, " } else { " ASC, " });
    }
    query.push("created_at DESC, id DESC LIMIT ");
    query.push_bind(params.limit + 1);

    if strategy == PageStrategy::Offset {
        query.push(" OFFSET ");
        query.push_bind(params.offset);
    }

    query
}

pub fn count_query(params: &ListParams) -> QueryBuilder<'static, Any> {
    let mut query = QueryBuilder::<Any>::new("SELECT COUNT(*) FROM problems WHERE 1 = 1");
    push_filters(&mut query, params);
    query
}

fn push_filters(query: &mut QueryBuilder<'static, Any>, params: &ListParams) {
    if let Some(category) = &params.category {
        query.push(" AND category = ");
        query.push_bind(category.clone());
    }

    if let Some(status) = &params.status {
        query.push(" AND status = ");
        query.push_bind(status.clone());
    }

    if let Some(user_id) = &params.user_id {
        query.push(" AND user_id = ");
        query.push_bind(user_id.clone());
    }

    if let Some(search) = &params.search {
        let pattern = format!("%{}%", escape_like(&search_fold(search)));
        query.push(" AND (title_search LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR description_search LIKE ");
        query.push_bind(pattern);
        query.push(" ESCAPE '\\')");
    }
}

/// Rows strictly after the cursor row in `ORDER BY <sort>, created_at DESC, id DESC`.
///
/// Secondary sorts compare against the value carried by the cursor, so a
/// cursor row deleted between pages does not end the listing early. A cursor
/// without that value pages by creation time only; [`ProblemLister`] fills it
/// in before building the query.
///
/// [`ProblemLister`]: crate::listing::ProblemLister
fn push_keyset(query: &mut QueryBuilder<'static, Any>, sort: SortField, cursor: &Cursor) {
    let sort_value = cursor
        .sort_value
        .as_ref()
        .filter(|_| sort != SortField::CreatedAt);

    query.push(" AND (");

    if let Some(value) = sort_value {
        let column = sort.column();
        query.push(column);
        query.push(if sort.descending() { " < " } else { " > " });
        push_sort_value(query, value);
        query.push(" OR (");
        query.push(column);
        query.push(" = ");
        push_sort_value(query, value);
        query.push(" AND ");
    }

    query.push("(created_at < ");
    query.push_bind(cursor.created_at.clone());
    query.push(" OR (created_at = ");
    query.push_bind(cursor.created_at.clone());
    query.push(" AND id < ");
    query.push_bind(cursor.id.clone());
    query.push("))");

    if sort_value.is_some() {
        query.push(")");
    }

    query.push(")");
}

fn push_sort_value(query: &mut QueryBuilder<'static, Any>, value: &SortValue) {
    match value {
        SortValue::Count(count) => query.push_bind(*count),
        SortValue::Text(text) => query.push_bind(text.clone()),
    };
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for character in term.chars() {
        if matches!(character, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ListParams {
        ListParams {
            limit: 10,
            offset: 30,
            cursor: None,
            sort: SortField::CreatedAt,
            category: None,
            status: None,
            user_id: None,
            search: None,
        }
    }

    fn cursor() -> Cursor {
        Cursor {
            id: "7f1d2c4e-9a55-4bd2-8f7e-0c1a2b3c4d5e".to_string(),
            created_at: "2026-03-01T08:00:00.000Z".to_string(),
            sort_value: None,
        }
    }

    fn compact(sql: &str) -> String {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn offset_page_orders_newest_first_with_offset() {
        let query = page_query(&params(), PageStrategy::Offset);
        let sql = compact(query.sql());
        assert!(sql.ends_with("WHERE 1 = 1 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"));
    }

    #[test]
    fn filters_and_search_apply_to_page_and_count() {
        let params = ListParams {
            category: Some("Health".to_string()),
            status: Some("open".to_string()),
            search: Some("Clean Water".to_string()),
            ..params()
        };

        let expected = "AND category = ? AND status = ? AND (title_search LIKE ? ESCAPE '\\' OR description_search LIKE ? ESCAPE '\\')";
        assert!(compact(page_query(&params, PageStrategy::Offset).sql()).contains(expected));
        assert!(compact(count_query(&params).sql()).ends_with(expected));
    }

    #[test]
    fn created_at_keyset_skips_offset() {
        let params = ListParams {
            cursor: Some(cursor()),
            ..params()
        };
        let sql = compact(page_query(&params, PageStrategy::Keyset).sql());
        assert!(sql.contains("AND ((created_at < ? OR (created_at = ? AND id < ?)))"));
        assert!(!sql.contains("OFFSET"));
    }

    #[test]
    fn keyset_without_cursor_is_first_page() {
        let sql = compact(page_query(&params(), PageStrategy::Keyset).sql());
        assert!(sql.ends_with("WHERE 1 = 1 ORDER BY created_at DESC, id DESC LIMIT ?"));
    }

    #[test]
    fn secondary_sort_keyset_binds_cursor_value() {
        let params = ListParams {
            cursor: Some(Cursor {
                sort_value: Some(SortValue::Count(4)),
                ..cursor()
            }),
            sort: SortField::Votes,
            ..params()
        };
        let sql = compact(page_query(&params, PageStrategy::Keyset).sql());
        assert!(sql.contains(
            "AND (votes < ? OR (votes = ? AND (created_at < ? OR (created_at = ? AND id < ?))))"
        ));
        assert!(!sql.contains("SELECT votes"));
        assert!(sql.contains("ORDER BY votes DESC, created_at DESC, id DESC"));

        let params = ListParams {
            sort: SortField::Title,
            cursor: Some(Cursor {
                sort_value: Some(SortValue::Text("Water".to_string())),
                ..cursor()
            }),
            ..params
        };
        let sql = compact(page_query(&params, PageStrategy::Keyset).sql());
        assert!(sql.contains("AND (title > ? OR (title = ? AND"));
        assert!(sql.contains("ORDER BY title ASC, created_at DESC, id DESC"));
    }

    #[test]
    fn secondary_sort_without_value_pages_by_creation_time() {
        let params = ListParams {
            cursor: Some(cursor()),
            sort: SortField::Views,
            ..params()
        };
        let sql = compact(page_query(&params, PageStrategy::Keyset).sql());
        assert!(sql.contains("AND ((created_at < ? OR (created_at = ? AND id < ?)))"));
        assert!(sql.contains("ORDER BY view_count DESC"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
