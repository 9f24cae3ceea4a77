use std::sync::Arc;

use axum::Router;
use chrono::{Duration, Utc};
use clap::Parser;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use sqlx::AnyPool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use crate::auth::{provider_from_config, AuthenticatedUser, IdentityProvider};
use crate::config::Config;
use crate::db;
use crate::db::queries::{self, NewProblemInput};
use crate::state::AppState;

pub const TEST_JWT_SECRET: &str = "solvinghub-test-secret";

pub fn test_config(db_url: &str, extra_args: &[&str]) -> Config {
    let mut args = vec![
        "solvinghub",
        "--db-url",
        db_url,
        "--jwt-secret",
        TEST_JWT_SECRET,
    ];
    args.extend_from_slice(extra_args);
    Config::try_parse_from(args).expect("test config should parse")
}

pub async fn setup_db(db_name: &str) -> (TempDir, AnyPool) {
    let (temp_dir, config) = temp_config(db_name, &[]);
    let pool = db::connect_and_migrate(&config)
        .await
        .expect("database should initialize");
    (temp_dir, pool)
}

/// Full application router over a fresh database.
pub async fn setup_app(db_name: &str, extra_args: &[&str]) -> (TempDir, AnyPool, Router) {
    let (temp_dir, config) = temp_config(db_name, extra_args);
    let identity = provider_from_config(&config.identity).expect("identity provider should build");
    let (pool, app) = app_for(config, identity).await;
    (temp_dir, pool, app)
}

/// Application state over a fresh database, for routers built in tests.
pub async fn setup_state(db_name: &str, extra_args: &[&str]) -> (TempDir, AppState) {
    let (temp_dir, config) = temp_config(db_name, extra_args);
    let identity = provider_from_config(&config.identity).expect("identity provider should build");
    let pool = db::connect_and_migrate(&config)
        .await
        .expect("database should initialize");
    (temp_dir, AppState::new(config, pool, identity))
}

/// Router whose state has no identity provider at all.
pub async fn setup_app_without_identity(db_name: &str) -> (TempDir, Router) {
    let (temp_dir, config) = temp_config(db_name, &[]);
    let (_pool, app) = app_for(config, None).await;
    (temp_dir, app)
}

async fn app_for(
    config: Config,
    identity: Option<Arc<dyn IdentityProvider>>,
) -> (AnyPool, Router) {
    let pool = db::connect_and_migrate(&config)
        .await
        .expect("database should initialize");
    let state = AppState::new(config, pool.clone(), identity);
    (pool, crate::build_app(state))
}

fn temp_config(db_name: &str, extra_args: &[&str]) -> (TempDir, Config) {
    let temp_dir = tempdir().expect("tempdir should be created");
    let db_path = temp_dir.path().join(format!("{db_name}.db"));
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let config = test_config(&db_url, extra_args);
    (temp_dir, config)
}

/// Inserts a user with a fresh id and returns that id.
pub async fn seed_user(pool: &AnyPool) -> String {
    let id = Uuid::new_v4();
    queries::upsert_user(
        pool,
        &AuthenticatedUser {
            id,
            email: Some(format!("{id}@example.com")),
            display_name: Some("Test User".to_string()),
            photo_url: None,
        },
    )
    .await
    .expect("user should be stored");
    id.to_string()
}

pub fn problem_input(user_id: &str, category: &str) -> NewProblemInput {
    NewProblemInput {
        user_id: user_id.to_string(),
        title: "Clean water access in rural villages".to_string(),
        description: "Many rural villages still rely on unsafe wells and walk hours every day to fetch water.".to_string(),
        category: category.to_string(),
        tags: vec!["water".to_string(), "rural".to_string()],
        impacts: vec!["health".to_string()],
        challenges: vec!["infrastructure".to_string()],
    }
}

pub fn token_for(user_id: &str) -> String {
    let claims = json!({
        "sub": user_id,
        "email": format!("{user_id}@example.com"),
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        "user_metadata": { "full_name": "Test User" }
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("token should encode")
}
