//! Per-source strategy selection and fallback.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use medsearch_common::{ResultRecord, SourceCatalog, SourceConfig, StrategyKind};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::ranker::rank;
use crate::rate_limit::RateLimiter;
use crate::registry::{RegisteredStrategy, SourceRegistry};
use crate::retry::RetryPolicy;
use crate::strategy::{
    AccessStrategy, BrowserLauncher, CaptchaSolver, SearchRequest, StrategyContext, StrategyResult,
};
use crate::tracker::SuccessRateTracker;

/// Tries a source's strategies best-first until one returns results.
pub struct AccessOrchestrator {
    registry: SourceRegistry,
    catalog: SourceCatalog,
    tracker: SuccessRateTracker,
    rate_limiter: Arc<RateLimiter>,
    captcha: Option<Arc<dyn CaptchaSolver>>,
    browser: Option<Arc<dyn BrowserLauncher>>,
    retry: RetryPolicy,
}

impl AccessOrchestrator {
    pub fn new(registry: SourceRegistry, catalog: SourceCatalog, tracker: SuccessRateTracker) -> Self {
        Self {
            registry,
            catalog,
            tracker,
            rate_limiter: Arc::new(RateLimiter::new()),
            captcha: None,
            browser: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha = Some(solver);
        self
    }

    pub fn with_browser(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(launcher);
        self
    }

    /// Backoff template for strategies that do not retry themselves. The
    /// number of retries always comes from the source's `max_retries`.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tracker(&self) -> &SuccessRateTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// Every source id known to either the registry or the catalog, sorted.
    pub fn list_databases(&self) -> Vec<String> {
        self.registry
            .source_ids()
            .chain(self.catalog.ids())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Search one source, falling back across its strategies.
    ///
    /// Returns the ranked records of the first strategy that yields any, or an
    /// empty list when the source has no strategies or all of them fail.
    #[instrument(skip(self, request), fields(query = %request.query))]
    pub async fn search_source(&self, source_id: &str, request: &SearchRequest) -> Vec<ResultRecord> {
        let config = self.catalog.get_database_config(source_id);
        let entries = self.ordered(source_id, &config).await;
        if entries.is_empty() {
            warn!("No usable access strategies");
            return Vec::new();
        }

        let ctx = self.context(source_id, config);
        for entry in entries {
            info!(strategy = %entry.kind, "Trying strategy");
            match self.attempt(entry, request, &ctx).await {
                StrategyResult::Success(records) if !records.is_empty() => {
                    self.tracker.record(source_id, entry.kind, true);
                    info!(strategy = %entry.kind, count = records.len(), "Strategy succeeded");
                    return rank(records);
                }
                StrategyResult::Success(_) | StrategyResult::Empty => {
                    self.tracker.record(source_id, entry.kind, false);
                    info!(strategy = %entry.kind, "Strategy returned no results");
                }
                StrategyResult::Failure(reason) => {
                    self.tracker.record(source_id, entry.kind, false);
                    warn!(strategy = %entry.kind, %reason, "Strategy failed");
                }
            }
        }

        warn!("All strategies exhausted");
        Vec::new()
    }

    /// The order `search_source` would try this source's strategies in right now.
    pub async fn strategy_order(&self, source_id: &str) -> Vec<StrategyKind> {
        let config = self.catalog.get_database_config(source_id);
        self.ordered(source_id, &config)
            .await
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    /// Registered strategies the source's `access_methods` allow, highest
    /// success rate first. An empty `access_methods` allows every strategy.
    async fn ordered(&self, source_id: &str, config: &SourceConfig) -> Vec<&RegisteredStrategy> {
        let entries: Vec<&RegisteredStrategy> = self
            .registry
            .strategies(source_id)
            .iter()
            .filter(|e| config.access_methods.is_empty() || config.access_methods.contains(&e.kind))
            .collect();
        let kinds: Vec<StrategyKind> = entries.iter().map(|e| e.kind).collect();
        let rates = self.tracker.rates(source_id, &kinds).await;
        let mut ranked: Vec<(&RegisteredStrategy, f64)> = entries.into_iter().zip(rates).collect();
        // Stable: equal rates keep registration order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().map(|(e, _)| e).collect()
    }

    fn context(&self, source_id: &str, config: SourceConfig) -> StrategyContext {
        let captcha = if config.use_captcha_solver { self.captcha.clone() } else { None };
        StrategyContext {
            source_id: source_id.to_string(),
            config,
            rate_limiter: self.rate_limiter.clone(),
            captcha,
            browser: self.browser.clone(),
        }
    }

    async fn attempt(
        &self,
        entry: &RegisteredStrategy,
        request: &SearchRequest,
        ctx: &StrategyContext,
    ) -> StrategyResult {
        let strategy = entry.strategy.as_ref();
        // A CAPTCHA round trip comes on top of the source's own timeout.
        let limit = ctx.config.timeout() + ctx.captcha.as_ref().map_or(Duration::ZERO, |c| c.timeout());
        if strategy.retries_internally() {
            return invoke(strategy, request, ctx, limit).await;
        }

        let policy = self.retry.clone().with_max_retries(ctx.config.max_retries);
        let result = policy
            .execute(move |_| async move {
                match invoke(strategy, request, ctx, limit).await {
                    StrategyResult::Failure(reason) => Err(reason),
                    other => Ok(other),
                }
            })
            .await;
        result.unwrap_or_else(|e| StrategyResult::Failure(e.to_string()))
    }
}

async fn invoke(
    strategy: &dyn AccessStrategy,
    request: &SearchRequest,
    ctx: &StrategyContext,
    limit: Duration,
) -> StrategyResult {
    match timeout(limit, strategy.search(request, ctx)).await {
        Ok(result) => result,
        Err(_) => StrategyResult::failure(format!("timed out after {}s", limit.as_secs())),
    }
}
