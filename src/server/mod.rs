// src/server/mod.rs

//! The HTTP surface: router, shared state and periodic upkeep.

pub mod error;
mod handlers;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::config::Config;
use crate::core::cache::{CachedReport, ResponseCache};
use crate::core::domain::{DomainName, DomainNormalizer};
use crate::core::error::AssessError;
use crate::core::models::ProbeKind;
use crate::core::orchestrator::Orchestrator;
use crate::core::rate_limiter::RateLimiter;
use crate::core::scanner::BackendRegistry;

/// Request-independent settings the handlers read.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub enabled_probes: Vec<ProbeKind>,
    pub cache_ttl: Duration,
    pub http_max_age_secs: u64,
    pub max_batch_size: usize,
    pub batch_concurrency: usize,
    pub trust_forwarded_for: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub normalizer: DomainNormalizer,
    pub orchestrator: Orchestrator,
    pub cache: Arc<ResponseCache>,
    pub limiter: Arc<RateLimiter>,
    pub settings: Arc<ServiceSettings>,
}

impl AppState {
    pub fn new(config: &Config, registry: BackendRegistry) -> Self {
        Self {
            normalizer: DomainNormalizer::new(&config.assessment.default_suffix),
            orchestrator: Orchestrator::new(
                registry,
                config.assessment.probe_timeout(),
                config.assessment.worker_pool_size,
            ),
            cache: Arc::new(ResponseCache::new()),
            limiter: Arc::new(RateLimiter::new(
                Duration::from_secs(config.rate_limit.window_secs),
                config.rate_limit.max_requests,
            )),
            settings: Arc::new(ServiceSettings {
                enabled_probes: config.assessment.enabled_probes.clone(),
                cache_ttl: config.cache.ttl(),
                http_max_age_secs: config.cache.http_max_age_secs,
                max_batch_size: config.server.max_batch_size,
                batch_concurrency: config.server.batch_concurrency,
                trust_forwarded_for: config.server.trust_forwarded_for,
            }),
        }
    }

    /// The cached report for `domain` when fresh, otherwise a new assessment
    /// which is then cached.
    pub async fn report_for(&self, domain: &DomainName) -> Result<CachedReport, AssessError> {
        if let Some(hit) = self.cache.get(domain) {
            info!(target = %domain, age_secs = hit.age.as_secs(), "Serving cached report.");
            return Ok(hit);
        }

        debug!(target = %domain, "Cache miss.");
        let report = Arc::new(self.orchestrator.assess(domain, &self.settings.enabled_probes).await?);
        self.cache.put(domain.clone(), report.clone(), self.settings.cache_ttl);
        Ok(CachedReport { report, age: Duration::ZERO })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/check_domain/{domain}", get(handlers::check_domain))
        .route("/check_domains", post(handlers::check_domains))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically drops expired cache entries and stale rate budgets.
pub fn spawn_maintenance(state: &AppState, every: Duration) -> JoinHandle<()> {
    let cache = state.cache.clone();
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reports = cache.sweep();
            let clients = limiter.sweep();
            debug!(reports, clients, "Maintenance sweep finished.");
        }
    })
}
