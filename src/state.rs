use std::sync::Arc;

use sqlx::AnyPool;

use crate::auth::IdentityProvider;
use crate::config::Config;
use crate::listing::ProblemLister;
use crate::rate_limit::RateLimiter;
use crate::sanitize::Sanitizer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: AnyPool,
    pub rate_limiter: RateLimiter,
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub sanitizer: Sanitizer,
    pub lister: ProblemLister,
}

impl AppState {
    pub fn new(
        config: Config,
        db: AnyPool,
        identity: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limits.clone());
        let sanitizer = Sanitizer::new(config.sanitize_mode);
        let lister = ProblemLister::new(&config.listing);
        Self {
            config: Arc::new(config),
            db,
            rate_limiter,
            identity,
            sanitizer,
            lister,
        }
    }
}
