pub mod builder;
pub mod envelope;
pub mod params;

use std::future::Future;

use sqlx::{Any, AnyPool};
use tracing::warn;

use crate::config::{ListingConfig, PaginationMode};
use crate::db::models::ProblemRecord;
use crate::error::{AppError, AppResult};
use crate::listing::builder::{count_query, page_query, PageStrategy};
use crate::listing::envelope::{cursor_page, offset_page, ProblemPage};
use crate::listing::params::{ListParams, SortField, SortValue};

/// Runs problem listings with the configured pagination strategy.
///
/// In cursor mode a failed keyset query is retried as an offset query when
/// fallback is enabled; the response then carries the offset envelope.
#[derive(Debug, Clone, Copy)]
pub struct ProblemLister {
    mode: PaginationMode,
    fallback: bool,
}

impl ProblemLister {
    pub fn new(config: &ListingConfig) -> Self {
        Self {
            mode: config.pagination,
            fallback: config.fallback,
        }
    }

    pub async fn list(
        &self,
        pool: &AnyPool,
        params: &ListParams,
    ) -> AppResult<ProblemPage<ProblemRecord>> {
        match self.mode {
            PaginationMode::Offset => list_offset(pool, params).await,
            PaginationMode::Cursor => {
                self.with_fallback(list_keyset(pool, params), || list_offset(pool, params))
                    .await
            }
        }
    }

    async fn with_fallback<T, P, F, Fut>(&self, primary: P, fallback: F) -> AppResult<T>
    where
        P: Future<Output = AppResult<T>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match primary.await {
            Ok(value) => Ok(value),
            Err(error) if self.fallback => {
                warn!(error = %error, "keyset listing failed, falling back to offset pagination");
                fallback().await
            }
            Err(error) => Err(error),
        }
    }
}

async fn list_keyset(pool: &AnyPool, params: &ListParams) -> AppResult<ProblemPage<ProblemRecord>> {
    let params = resolve_cursor(pool, params).await?;
    let rows = page_query(&params, PageStrategy::Keyset)
        .build_query_as::<ProblemRecord>()
        .fetch_all(pool)
        .await?;

    Ok(ProblemPage::Cursor(cursor_page(rows, params.limit, params.sort)))
}

/// Looks up the cursor row's sort value when the client did not send one.
/// A cursor row that no longer exists is an error, never an empty page.
async fn resolve_cursor(pool: &AnyPool, params: &ListParams) -> AppResult<ListParams> {
    let mut params = params.clone();
    let sort = params.sort;
    let Some(cursor) = params.cursor.as_mut() else {
        return Ok(params);
    };
    if sort == SortField::CreatedAt || cursor.sort_value.is_some() {
        return Ok(params);
    }

    let sql = format!("SELECT {} FROM problems WHERE id = ?", sort.column());
    let value = match sort {
        SortField::Title => sqlx::query_scalar::<Any, String>(&sql)
            .bind(cursor.id.clone())
            .fetch_optional(pool)
            .await?
            .map(SortValue::Text),
        _ => sqlx::query_scalar::<Any, i64>(&sql)
            .bind(cursor.id.clone())
            .fetch_optional(pool)
            .await?
            .map(SortValue::Count),
    };

    cursor.sort_value = Some(value.ok_or_else(|| {
        AppError::BadRequest(
            "Cursor problem no longer exists; pass cursor_value or start from the first page"
                .to_string(),
        )
    })?);
    Ok(params)
}

async fn list_offset(pool: &AnyPool, params: &ListParams) -> AppResult<ProblemPage<ProblemRecord>> {
    let rows = page_query(params, PageStrategy::Offset)
        .build_query_as::<ProblemRecord>()
        .fetch_all(pool)
        .await?;

    let total = match count_query(params)
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await
    {
        Ok(total) => total,
        Err(error) => {
            warn!(error = %error, "problem count failed, reporting total as 0");
            0
        }
    };

    Ok(ProblemPage::Offset(offset_page(
        rows,
        total,
        params.limit,
        params.offset,
    )))
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use crate::config::{ListingConfig, PaginationMode};
    use crate::db::queries;
    use crate::error::AppError;
    use crate::listing::envelope::ProblemPage;
    use crate::listing::params::ListParams;
    use crate::listing::ProblemLister;
    use crate::test_support::{problem_input, seed_user, setup_db};

    fn lister(pagination: PaginationMode, fallback: bool) -> ProblemLister {
        ProblemLister::new(&ListingConfig {
            pagination,
            fallback,
            default_page_limit: 20,
        })
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn fallback_runs_only_when_enabled() {
        let enabled = lister(PaginationMode::Cursor, true);
        let recovered = enabled
            .with_fallback(
                async { Err::<u32, _>(AppError::Internal(None)) },
                || async { Ok(7) },
            )
            .await;
        assert_eq!(recovered.ok(), Some(7));

        let disabled = lister(PaginationMode::Cursor, false);
        let failed = disabled
            .with_fallback(
                async { Err::<u32, _>(AppError::Internal(None)) },
                || async { Ok(7) },
            )
            .await;
        assert!(matches!(failed, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn cursor_pages_are_disjoint_and_cover_every_row() {
        let (_temp_dir, pool) = setup_db("cursor-pages").await;
        let owner = seed_user(&pool).await;
        let mut created = HashSet::new();
        for _ in 0..7 {
            let problem = queries::create_problem(&pool, problem_input(&owner, "Health"))
                .await
                .expect("problem should be created");
            created.insert(problem.id);
        }

        let lister = lister(PaginationMode::Cursor, false);
        let mut seen = Vec::new();
        let mut request = query(&[("limit", "3")]);
        loop {
            let params = ListParams::from_query(&request, 20);
            let page = match lister.list(&pool, &params).await.expect("page should load") {
                ProblemPage::Cursor(page) => page,
                ProblemPage::Offset(_) => panic!("expected cursor envelope"),
            };
            seen.extend(page.problems.iter().map(|problem| problem.id.clone()));

            let Some(next) = page.pagination.next_cursor else {
                assert!(!page.pagination.has_more);
                break;
            };
            request.insert("cursor_id".to_string(), next.cursor_id);
            request.insert("cursor_created_at".to_string(), next.cursor_created_at);
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(seen.iter().cloned().collect::<HashSet<_>>(), created);
    }

    #[tokio::test]
    async fn vote_sorted_cursor_pages_follow_vote_order() {
        let (_temp_dir, pool) = setup_db("cursor-votes").await;
        let owner = seed_user(&pool).await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            let problem = queries::create_problem(&pool, problem_input(&owner, "Health"))
                .await
                .expect("problem should be created");
            ids.push(problem.id);
        }
        for voters in [1, 3] {
            for _ in 0..voters {
                let voter = seed_user(&pool).await;
                queries::toggle_vote(&pool, &ids[voters], &voter)
                    .await
                    .expect("vote should succeed");
            }
        }

        let lister = lister(PaginationMode::Cursor, false);
        let first = ListParams::from_query(&query(&[("limit", "1"), ("sort_by", "votes")]), 20);
        let ProblemPage::Cursor(first) = lister.list(&pool, &first).await.expect("page should load")
        else {
            panic!("expected cursor envelope");
        };
        assert_eq!(first.problems[0].id, ids[3]);

        let next = first.pagination.next_cursor.expect("more pages should follow");
        let second = ListParams::from_query(
            &query(&[
                ("limit", "10"),
                ("sort_by", "votes"),
                ("cursor_id", next.cursor_id.as_str()),
                ("cursor_created_at", next.cursor_created_at.as_str()),
            ]),
            20,
        );
        let ProblemPage::Cursor(second) =
            lister.list(&pool, &second).await.expect("page should load")
        else {
            panic!("expected cursor envelope");
        };
        assert_eq!(second.problems.len(), 3);
        assert_eq!(second.problems[0].id, ids[1]);
        assert!(!second.pagination.has_more);
    }

    async fn vote_ranked_problems(pool: &sqlx::AnyPool) -> Vec<String> {
        let owner = seed_user(pool).await;
        let mut ids = Vec::new();
        for votes in 0..3 {
            let problem = queries::create_problem(pool, problem_input(&owner, "Health"))
                .await
                .expect("problem should be created");
            for _ in 0..votes {
                let voter = seed_user(pool).await;
                queries::toggle_vote(pool, &problem.id, &voter)
                    .await
                    .expect("vote should succeed");
            }
            ids.push(problem.id);
        }
        ids.reverse();
        ids
    }

    #[tokio::test]
    async fn deleted_cursor_row_does_not_end_secondary_sort_listing() {
        let (_temp_dir, pool) = setup_db("cursor-deleted-row").await;
        let ranked = vote_ranked_problems(&pool).await;
        let lister = lister(PaginationMode::Cursor, false);

        let first = ListParams::from_query(&query(&[("limit", "1"), ("sort_by", "votes")]), 20);
        let ProblemPage::Cursor(first) = lister.list(&pool, &first).await.expect("page should load")
        else {
            panic!("expected cursor envelope");
        };
        assert_eq!(first.problems[0].id, ranked[0]);
        let next = first.pagination.next_cursor.expect("more pages should follow");
        assert_eq!(next.cursor_value.as_deref(), Some("2"));

        queries::delete_problem(&pool, &next.cursor_id)
            .await
            .expect("problem should be deleted");

        let cursor_value = next.cursor_value.clone().unwrap_or_default();
        let second = ListParams::from_query(
            &query(&[
                ("limit", "10"),
                ("sort_by", "votes"),
                ("cursor_id", next.cursor_id.as_str()),
                ("cursor_created_at", next.cursor_created_at.as_str()),
                ("cursor_value", cursor_value.as_str()),
            ]),
            20,
        );
        let ProblemPage::Cursor(second) =
            lister.list(&pool, &second).await.expect("page should load")
        else {
            panic!("expected cursor envelope");
        };
        let ids: Vec<_> = second.problems.iter().map(|problem| problem.id.clone()).collect();
        assert_eq!(ids, ranked[1..].to_vec());
        assert!(!second.pagination.has_more);
    }

    #[tokio::test]
    async fn unresolvable_cursor_falls_back_to_offset_listing() {
        let (_temp_dir, pool) = setup_db("cursor-fallback").await;
        let ranked = vote_ranked_problems(&pool).await;
        queries::delete_problem(&pool, &ranked[0])
            .await
            .expect("problem should be deleted");

        let cursor_created_at = "2026-01-01T00:00:00.000Z";
        let request = query(&[
            ("limit", "10"),
            ("sort_by", "votes"),
            ("cursor_id", ranked[0].as_str()),
            ("cursor_created_at", cursor_created_at),
        ]);
        let params = ListParams::from_query(&request, 20);

        let strict = lister(PaginationMode::Cursor, false);
        let error = strict
            .list(&pool, &params)
            .await
            .expect_err("missing cursor row should fail without fallback");
        assert!(matches!(error, AppError::BadRequest(_)));

        let lenient = lister(PaginationMode::Cursor, true);
        let ProblemPage::Offset(page) = lenient
            .list(&pool, &params)
            .await
            .expect("fallback should load a page")
        else {
            panic!("expected offset envelope after fallback");
        };
        assert_eq!(page.total, 2);
        assert_eq!(page.offset, 0);
        let ids: Vec<_> = page.problems.iter().map(|problem| problem.id.clone()).collect();
        assert_eq!(ids, ranked[1..].to_vec());
    }

    #[tokio::test]
    async fn search_folds_non_ascii_case() {
        let (_temp_dir, pool) = setup_db("search-unicode").await;
        let owner = seed_user(&pool).await;
        let mut input = problem_input(&owner, "Health");
        input.title = "Ärzte fehlen in Dörfern".to_string();
        queries::create_problem(&pool, input)
            .await
            .expect("problem should be created");
        queries::create_problem(&pool, problem_input(&owner, "Health"))
            .await
            .expect("problem should be created");

        let lister = lister(PaginationMode::Offset, true);
        for term in ["Ärzte", "ärzte", "ÄRZTE", "dörfern", "fehlen in DÖR"] {
            let params = ListParams::from_query(&query(&[("search", term)]), 20);
            let page = lister.list(&pool, &params).await.expect("page should load");
            assert_eq!(page.problems().len(), 1, "search={term}");
            assert_eq!(page.problems()[0].title, "Ärzte fehlen in Dörfern");
        }
    }

    #[tokio::test]
    async fn offset_listing_filters_and_counts() {
        let (_temp_dir, pool) = setup_db("offset-filters").await;
        let owner = seed_user(&pool).await;
        let other = seed_user(&pool).await;
        for _ in 0..3 {
            queries::create_problem(&pool, problem_input(&owner, "Health"))
                .await
                .expect("problem should be created");
        }
        let mut special = problem_input(&other, "Finance");
        special.title = "Micro loans at 100% interest".to_string();
        queries::create_problem(&pool, special)
            .await
            .expect("problem should be created");

        let lister = lister(PaginationMode::Offset, true);

        let params = ListParams::from_query(&query(&[("category", "Health"), ("limit", "2")]), 20);
        let ProblemPage::Offset(page) = lister.list(&pool, &params).await.expect("page should load")
        else {
            panic!("expected offset envelope");
        };
        assert_eq!(page.total, 3);
        assert_eq!(page.problems.len(), 2);

        let params = ListParams::from_query(&query(&[("search", "100%")]), 20);
        let page = lister.list(&pool, &params).await.expect("page should load");
        assert_eq!(page.problems().len(), 1);

        let params = ListParams::from_query(&query(&[("search", "10_%")]), 20);
        let page = lister.list(&pool, &params).await.expect("page should load");
        assert!(page.problems().is_empty());

        let params = ListParams::from_query(&query(&[("user_id", other.as_str())]), 20);
        let page = lister.list(&pool, &params).await.expect("page should load");
        assert_eq!(page.problems().len(), 1);

        let params = ListParams::from_query(&query(&[("status", "solved")]), 20);
        let ProblemPage::Offset(page) = lister.list(&pool, &params).await.expect("page should load")
        else {
            panic!("expected offset envelope");
        };
        assert!(page.problems.is_empty());
        assert_eq!(page.total, 0);
    }
}
