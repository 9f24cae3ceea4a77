use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::auth::{bearer_token, IdentityProvider};
use crate::config::RateLimitConfig;
use crate::state::AppState;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const STALE_BUCKET_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum RateScope {
    Read,
    Write,
    Vote,
}

impl RateScope {
    fn description(self) -> &'static str {
        match self {
            Self::Read => "read requests",
            Self::Write => "write requests",
            Self::Vote => "vote requests",
        }
    }
}

#[derive(Debug)]
pub enum RateDecision {
    Allow(RateAllowance),
    Deny(RateDenial),
}

#[derive(Debug)]
pub struct RateAllowance {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after_secs: u64,
}

#[derive(Debug)]
pub struct RateDenial {
    pub limit: u32,
    pub retry_after_secs: u64,
    pub message: String,
}

/// Token buckets keyed by scope and client identity.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    buckets: Arc<Mutex<BucketTable>>,
    settings: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(settings: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(BucketTable::default())),
            settings,
        }
    }

    pub fn check(&self, scope: RateScope, identity: &str) -> RateDecision {
        self.check_with_now(scope, identity, Instant::now())
    }

    fn check_with_now(&self, scope: RateScope, identity: &str, now: Instant) -> RateDecision {
        let settings = BucketSettings::for_scope(&self.settings, scope);
        let mut table = lock_or_recover(&self.buckets);
        table.evict_stale(now);

        let bucket = table
            .buckets
            .entry((scope, identity.to_string()))
            .or_insert_with(|| RateBucket::full(settings, now));

        match bucket.take(settings, now) {
            Some(remaining) => RateDecision::Allow(RateAllowance {
                limit: settings.per_minute,
                remaining: remaining.floor().clamp(0.0, u32::MAX as f64) as u32,
                reset_after_secs: settings.seconds_to_refill(settings.burst as f64 - remaining),
            }),
            None => RateDecision::Deny(RateDenial {
                limit: settings.per_minute,
                retry_after_secs: settings.seconds_to_refill(1.0 - bucket.tokens).max(1),
                message: format!("rate limit exceeded for {}", scope.description()),
            }),
        }
    }
}

pub async fn enforce_limits(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(scope) = classify_scope(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let identity = request_identity(request.headers(), state.identity.as_deref());
    let allowance = match state.rate_limiter.check(scope, &identity) {
        RateDecision::Allow(allowance) => allowance,
        RateDecision::Deny(denial) => {
            tracing::warn!(
                scope = %scope.description(),
                identity = %identity,
                retry_after_secs = denial.retry_after_secs,
                "request denied by rate limiter"
            );
            return rate_limited_response(denial);
        }
    };

    let mut response = next.run(request).await;
    set_rate_limit_headers(
        &mut response,
        allowance.limit,
        allowance.remaining,
        allowance.reset_after_secs,
    );
    response
}

#[derive(Clone, Copy, Debug)]
struct BucketSettings {
    per_minute: u32,
    burst: u32,
}

impl BucketSettings {
    fn for_scope(settings: &RateLimitConfig, scope: RateScope) -> Self {
        let (per_minute, burst) = match scope {
            RateScope::Read => (settings.read_per_min, settings.read_burst),
            RateScope::Write => (settings.write_per_min, settings.write_burst),
            RateScope::Vote => (settings.vote_per_min, settings.vote_burst),
        };
        Self { per_minute, burst }
    }

    fn tokens_per_second(self) -> f64 {
        self.per_minute as f64 / 60.0
    }

    fn seconds_to_refill(self, missing_tokens: f64) -> u64 {
        if self.per_minute == 0 {
            return 60;
        }
        if missing_tokens <= 0.0 {
            return 0;
        }
        (missing_tokens / self.tokens_per_second()).ceil() as u64
    }
}

#[derive(Debug)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl RateBucket {
    fn full(settings: BucketSettings, now: Instant) -> Self {
        Self {
            tokens: settings.burst as f64,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Spends one token, returning what is left.
    fn take(&mut self, settings: BucketSettings, now: Instant) -> Option<f64> {
        self.refill(settings, now);
        if self.tokens < 1.0 {
            return None;
        }
        self.tokens -= 1.0;
        Some(self.tokens)
    }

    fn refill(&mut self, settings: BucketSettings, now: Instant) {
        self.last_seen = now;
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if settings.per_minute == 0 || elapsed <= 0.0 {
            return;
        }

        self.tokens =
            (self.tokens + elapsed * settings.tokens_per_second()).min(settings.burst as f64);
        self.last_refill = now;
    }
}

#[derive(Debug, Default)]
struct BucketTable {
    buckets: HashMap<(RateScope, String), RateBucket>,
    last_eviction: Option<Instant>,
}

impl BucketTable {
    fn evict_stale(&mut self, now: Instant) {
        let due = self
            .last_eviction
            .is_none_or(|previous| now.saturating_duration_since(previous) >= CLEANUP_INTERVAL);
        if !due {
            return;
        }

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) < STALE_BUCKET_AGE);
        self.last_eviction = Some(now);

        let evicted = before - self.buckets.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle rate limit buckets");
        }
    }
}

fn classify_scope(method: &Method, path: &str) -> Option<RateScope> {
    if path != "/api" && !path.starts_with("/api/") {
        return None;
    }

    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return Some(RateScope::Read);
    }

    if method == Method::POST && is_vote_route(path) {
        return Some(RateScope::Vote);
    }

    Some(RateScope::Write)
}

fn is_vote_route(path: &str) -> bool {
    let normalized = path.trim_end_matches('/');
    normalized.starts_with("/api/problems/") && normalized.ends_with("/vote")
}

/// Callers whose token verifies in-process are keyed by user id. Anything
/// else, including tokens nobody has checked yet, is keyed by the hashed
/// client address so rotating bearer strings does not buy fresh buckets.
fn request_identity(headers: &HeaderMap, provider: Option<&dyn IdentityProvider>) -> String {
    let verified = provider
        .zip(bearer_token(headers))
        .and_then(|(provider, token)| provider.verify_offline(token));
    if let Some(user_id) = verified {
        return format!("user:{user_id}");
    }

    match forwarded_ip(headers, "x-forwarded-for").or_else(|| forwarded_ip(headers, "x-real-ip")) {
        Some(ip) => format!("ip:{}", hash_prefix(ip)),
        None => "ip:anonymous".to_string(),
    }
}

fn forwarded_ip<'a>(headers: &'a HeaderMap, header_name: &'static str) -> Option<&'a str> {
    headers
        .get(header_name)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

fn hash_prefix(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(12)
        .fold(String::with_capacity(24), |mut output, byte| {
            let _ = write!(&mut output, "{byte:02x}");
            output
        })
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("rate limiter mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Serialize)]
struct RateLimitBody {
    error: String,
    code: &'static str,
}

fn rate_limited_response(denial: RateDenial) -> Response {
    let retry_after_secs = denial.retry_after_secs;
    let limit = denial.limit;
    let body = Json(RateLimitBody {
        error: denial.message,
        code: "rate_limited",
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    set_rate_limit_headers(&mut response, limit, 0, retry_after_secs);
    set_header_u64(&mut response, RETRY_AFTER.as_str(), retry_after_secs);
    response
}

fn set_rate_limit_headers(response: &mut Response, limit: u32, remaining: u32, reset_after: u64) {
    set_header_u64(response, "x-ratelimit-limit", limit as u64);
    set_header_u64(response, "x-ratelimit-remaining", remaining as u64);
    set_header_u64(response, "x-ratelimit-reset", reset_after);
}

fn set_header_u64(response: &mut Response, key: &'static str, value: u64) {
    if let Ok(header_value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(key, header_value);
    }
}
