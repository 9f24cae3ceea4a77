use clap::{Args, Parser, ValueEnum};
use tracing::warn;

#[derive(Clone, Debug, Parser)]
#[command(name = "solvinghub")]
pub struct Config {
    #[arg(long, env = "SOLVINGHUB_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "SOLVINGHUB_DB_URL", default_value = "sqlite://./solvinghub.db")]
    pub db_url: String,

    #[arg(long, env = "SOLVINGHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "SOLVINGHUB_ENVIRONMENT", value_enum, default_value_t = Environment::Production)]
    pub environment: Environment,

    #[arg(long, env = "SOLVINGHUB_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    #[command(flatten)]
    pub identity: IdentityConfig,

    #[command(flatten)]
    pub listing: ListingConfig,

    #[arg(long, env = "SOLVINGHUB_SANITIZE_MODE", value_enum, default_value_t = SanitizeMode::Strip)]
    pub sanitize_mode: SanitizeMode,

    /// Archive stale problems once and exit instead of serving HTTP.
    #[arg(long, env = "SOLVINGHUB_ARCHIVE_STALE", default_value_t = false)]
    pub archive_stale: bool,

    #[arg(long, env = "SOLVINGHUB_ARCHIVE_AFTER_DAYS", default_value_t = 90)]
    pub archive_after_days: u32,

    #[command(flatten)]
    pub rate_limits: RateLimitConfig,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PaginationMode {
    Offset,
    Cursor,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SanitizeMode {
    Strip,
    Escape,
}

#[derive(Clone, Debug, Default, Args)]
pub struct IdentityConfig {
    #[arg(long, env = "SOLVINGHUB_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    #[arg(long, env = "SOLVINGHUB_JWT_AUDIENCE")]
    pub jwt_audience: Option<String>,

    #[arg(long, env = "SOLVINGHUB_AUTH_URL")]
    pub auth_url: Option<String>,

    #[arg(long, env = "SOLVINGHUB_AUTH_API_KEY")]
    pub auth_api_key: Option<String>,
}

impl IdentityConfig {
    pub fn jwt_secret(&self) -> Option<&str> {
        non_blank(self.jwt_secret.as_deref())
    }

    pub fn remote(&self) -> Option<(&str, &str)> {
        Some((
            non_blank(self.auth_url.as_deref())?,
            non_blank(self.auth_api_key.as_deref())?,
        ))
    }
}

#[derive(Clone, Debug, Args)]
pub struct ListingConfig {
    #[arg(long, env = "SOLVINGHUB_PAGINATION", value_enum, default_value_t = PaginationMode::Offset)]
    pub pagination: PaginationMode,

    #[arg(
        long = "listing-fallback",
        env = "SOLVINGHUB_LISTING_FALLBACK",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub fallback: bool,

    #[arg(long, env = "SOLVINGHUB_DEFAULT_PAGE_LIMIT", default_value_t = 20)]
    pub default_page_limit: i64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            pagination: PaginationMode::Offset,
            fallback: true,
            default_page_limit: 20,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct RateLimitConfig {
    #[arg(
        long = "rate-limit-read-per-min",
        env = "SOLVINGHUB_RATE_LIMIT_READ_PER_MIN",
        default_value_t = 240
    )]
    pub read_per_min: u32,

    #[arg(
        long = "rate-limit-read-burst",
        env = "SOLVINGHUB_RATE_LIMIT_READ_BURST",
        default_value_t = 60
    )]
    pub read_burst: u32,

    #[arg(
        long = "rate-limit-write-per-min",
        env = "SOLVINGHUB_RATE_LIMIT_WRITE_PER_MIN",
        default_value_t = 60
    )]
    pub write_per_min: u32,

    #[arg(
        long = "rate-limit-write-burst",
        env = "SOLVINGHUB_RATE_LIMIT_WRITE_BURST",
        default_value_t = 20
    )]
    pub write_burst: u32,

    #[arg(
        long = "rate-limit-vote-per-min",
        env = "SOLVINGHUB_RATE_LIMIT_VOTE_PER_MIN",
        default_value_t = 120
    )]
    pub vote_per_min: u32,

    #[arg(
        long = "rate-limit-vote-burst",
        env = "SOLVINGHUB_RATE_LIMIT_VOTE_BURST",
        default_value_t = 30
    )]
    pub vote_burst: u32,

    #[arg(long = "max-request-body-bytes", env = "SOLVINGHUB_MAX_REQUEST_BODY_BYTES", default_value_t = 256 * 1024)]
    pub max_request_body_bytes: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_per_min: 240,
            read_burst: 60,
            write_per_min: 60,
            write_burst: 20,
            vote_per_min: 120,
            vote_burst: 30,
            max_request_body_bytes: 256 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let config = <Self as Parser>::parse();
        config.validate();
        config
    }

    pub fn identity_configured(&self) -> bool {
        self.identity.jwt_secret().is_some() || self.identity.remote().is_some()
    }

    pub fn log_startup_warnings(&self) {
        if !self.identity_configured() {
            warn!(
                "neither SOLVINGHUB_JWT_SECRET nor SOLVINGHUB_AUTH_URL/SOLVINGHUB_AUTH_API_KEY is set, authenticated endpoints will fail with a configuration error"
            );
        }

        if self.identity.jwt_secret().is_some() && self.identity.remote().is_some() {
            warn!("both a JWT secret and a remote auth server are configured, the JWT secret wins");
        }

        if self.environment.is_development() {
            warn!("development environment, internal error details are exposed in responses");
        }

        if self.cors_origin.is_none() {
            warn!("SOLVINGHUB_CORS_ORIGIN is unset, cross-origin requests are allowed from any origin");
        }
    }

    fn validate(&self) {
        assert!(
            (1..=100).contains(&self.listing.default_page_limit),
            "SOLVINGHUB_DEFAULT_PAGE_LIMIT must be between 1 and 100"
        );
        assert_non_zero_u32("SOLVINGHUB_ARCHIVE_AFTER_DAYS", self.archive_after_days);
        assert_non_zero_u32(
            "SOLVINGHUB_RATE_LIMIT_READ_PER_MIN",
            self.rate_limits.read_per_min,
        );
        assert_non_zero_u32(
            "SOLVINGHUB_RATE_LIMIT_READ_BURST",
            self.rate_limits.read_burst,
        );
        assert_non_zero_u32(
            "SOLVINGHUB_RATE_LIMIT_WRITE_PER_MIN",
            self.rate_limits.write_per_min,
        );
        assert_non_zero_u32(
            "SOLVINGHUB_RATE_LIMIT_WRITE_BURST",
            self.rate_limits.write_burst,
        );
        assert_non_zero_u32(
            "SOLVINGHUB_RATE_LIMIT_VOTE_PER_MIN",
            self.rate_limits.vote_per_min,
        );
        assert_non_zero_u32(
            "SOLVINGHUB_RATE_LIMIT_VOTE_BURST",
            self.rate_limits.vote_burst,
        );
        assert!(
            self.rate_limits.max_request_body_bytes > 0,
            "SOLVINGHUB_MAX_REQUEST_BODY_BYTES must be greater than 0"
        );
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn assert_non_zero_u32(key: &'static str, value: u32) {
    assert!(value > 0, "{key} must be greater than 0");
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Config, PaginationMode, SanitizeMode};

    #[test]
    fn defaults_parse_without_arguments() {
        let config = Config::try_parse_from(["solvinghub"]).expect("defaults should parse");
        assert_eq!(config.listing.pagination, PaginationMode::Offset);
        assert!(config.listing.fallback);
        assert_eq!(config.listing.default_page_limit, 20);
        assert_eq!(config.sanitize_mode, SanitizeMode::Strip);
        assert!(!config.archive_stale);
    }

    #[test]
    fn blank_identity_settings_count_as_unset() {
        let config = Config::try_parse_from([
            "solvinghub",
            "--jwt-secret",
            "  ",
            "--auth-url",
            "https://auth.example.com",
        ])
        .expect("arguments should parse");
        assert!(config.identity.jwt_secret().is_none());
        assert!(config.identity.remote().is_none());
        assert!(!config.identity_configured());
    }

    #[test]
    fn listing_fallback_can_be_disabled() {
        let config = Config::try_parse_from([
            "solvinghub",
            "--pagination",
            "cursor",
            "--listing-fallback",
            "false",
        ])
        .expect("arguments should parse");
        assert_eq!(config.listing.pagination, PaginationMode::Cursor);
        assert!(!config.listing.fallback);
    }
}
