//! The contract every source adapter implements, and the capabilities handed to it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medsearch_common::{DateRange, ResultRecord, SourceConfig};

use crate::rate_limit::RateLimiter;

/// Outcome of one strategy invocation.
///
/// `Empty` is a legitimate answer, not an error, but the orchestrator still
/// falls back to the next strategy and counts it against this one.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyResult {
    Success(Vec<ResultRecord>),
    Empty,
    Failure(String),
}

impl StrategyResult {
    pub fn from_records(records: Vec<ResultRecord>) -> Self {
        if records.is_empty() {
            Self::Empty
        } else {
            Self::Success(records)
        }
    }

    pub fn failure(reason: impl fmt::Display) -> Self {
        Self::Failure(reason.to_string())
    }

    /// Map an adapter's internal `Result` onto the three outcomes.
    pub fn from_result<E: fmt::Display>(result: Result<Vec<ResultRecord>, E>) -> Self {
        match result {
            Ok(records) => Self::from_records(records),
            Err(e) => Self::failure(format!("{e:#}")),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// What a caller asks of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub date_range: DateRange,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
            date_range: DateRange::unbounded(),
        }
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub site_key: String,
    pub page_url: String,
}

/// External CAPTCHA solving service.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Returns the solution token for `challenge`.
    async fn solve(&self, challenge: &CaptchaChallenge) -> anyhow::Result<String>;

    /// Upper bound a caller should wait for [`solve`](Self::solve).
    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }
}

/// A live browser page driven by a strategy.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> anyhow::Result<bool>;
    async fn fill_form(&mut self, fields: &HashMap<String, String>) -> anyhow::Result<bool>;
    async fn click(&mut self, selector: &str) -> anyhow::Result<bool>;
    async fn page_source(&mut self) -> anyhow::Result<String>;
    /// Detect and solve a CAPTCHA on the current page, if one is present.
    async fn solve_captcha(&mut self) -> anyhow::Result<bool>;
    async fn screenshot(&mut self) -> anyhow::Result<Vec<u8>>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Opens browser sessions; one session per strategy attempt.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &str) -> anyhow::Result<Box<dyn BrowserSession>>;
}

/// Everything a strategy may use besides its own request.
///
/// Built fresh by the orchestrator for each source search. Optional
/// capabilities are `None` when they are not configured or are disabled for
/// this source.
#[derive(Clone)]
pub struct StrategyContext {
    pub source_id: String,
    pub config: SourceConfig,
    pub rate_limiter: Arc<RateLimiter>,
    pub captcha: Option<Arc<dyn CaptchaSolver>>,
    pub browser: Option<Arc<dyn BrowserLauncher>>,
}

impl StrategyContext {
    pub fn new(source_id: impl Into<String>, config: SourceConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            source_id: source_id.into(),
            config,
            rate_limiter,
            captcha: None,
            browser: None,
        }
    }

    /// Wait for a request slot on `domain` at this source's configured rate and
    /// take it. Call once per outgoing request, right before sending it.
    /// No-op when the source does not respect rate limits.
    pub async fn throttle(&self, domain: &str) {
        if self.config.respect_rate_limits {
            self.rate_limiter
                .acquire(domain, self.config.requests_per_minute)
                .await;
        }
    }
}

impl fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyContext")
            .field("source_id", &self.source_id)
            .field("config", &self.config.name)
            .field("captcha", &self.captcha.is_some())
            .field("browser", &self.browser.is_some())
            .finish()
    }
}

// ── Strategy ──────────────────────────────────────────────────────────────────

/// One way of retrieving results from one source.
#[async_trait]
pub trait AccessStrategy: Send + Sync {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult;

    /// Strategies that already retry their own requests are not wrapped in
    /// the orchestrator's retry policy.
    fn retries_internally(&self) -> bool {
        false
    }
}

/// Adapter turning an async closure into an [`AccessStrategy`].
pub struct FnStrategy<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap `f` as a strategy. The closure receives owned copies of the request
/// and context so the returned future can be `'static`.
pub fn strategy_fn<F, Fut>(f: F) -> FnStrategy<F, Fut>
where
    F: Fn(SearchRequest, StrategyContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrategyResult> + Send + 'static,
{
    FnStrategy { f, _fut: PhantomData }
}

#[async_trait]
impl<F, Fut> AccessStrategy for FnStrategy<F, Fut>
where
    F: Fn(SearchRequest, StrategyContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrategyResult> + Send + 'static,
{
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        (self.f)(request.clone(), ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ResultRecord {
        ResultRecord::new(id, "Title", "https://example.org", "Example")
    }

    #[test]
    fn test_from_records_distinguishes_empty() {
        assert_eq!(StrategyResult::from_records(vec![]), StrategyResult::Empty);
        assert!(matches!(
            StrategyResult::from_records(vec![record("1")]),
            StrategyResult::Success(r) if r.len() == 1
        ));
    }

    #[test]
    fn test_from_result_keeps_error_chain() {
        let err = anyhow::anyhow!("503 Service Unavailable").context("esearch failed");
        let result = StrategyResult::from_result(Err::<Vec<ResultRecord>, _>(err));
        match result {
            StrategyResult::Failure(reason) => {
                assert!(reason.contains("esearch failed"));
                assert!(reason.contains("503"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_strategy_fn_sees_request_and_context() {
        let strategy = strategy_fn(|req: SearchRequest, ctx: StrategyContext| async move {
            let id = format!("{}-{}", ctx.source_id, req.query);
            StrategyResult::Success(vec![record(&id)])
        });
        let ctx = StrategyContext::new(
            "pubmed",
            SourceConfig::default_for("pubmed"),
            Arc::new(RateLimiter::new()),
        );
        let result = strategy.search(&SearchRequest::new("aspirin", 5), &ctx).await;
        assert_eq!(result, StrategyResult::Success(vec![record("pubmed-aspirin")]));
        assert!(!strategy.retries_internally());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_skipped_when_rate_limits_ignored() {
        let mut config = SourceConfig::default_for("mirror");
        config.respect_rate_limits = false;
        config.requests_per_minute = 1;
        let limiter = Arc::new(RateLimiter::new());
        let ctx = StrategyContext::new("mirror", config, limiter.clone());

        for _ in 0..3 {
            ctx.throttle("mirror.example").await;
        }
        assert_eq!(limiter.recent_requests("mirror.example").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_takes_a_slot_per_request() {
        let mut config = SourceConfig::default_for("tga-cmi");
        config.requests_per_minute = 2;
        let limiter = Arc::new(RateLimiter::new());
        let ctx = StrategyContext::new("tga-cmi", config, limiter.clone());
        let alias = StrategyContext { source_id: "tga".into(), ..ctx.clone() };

        let start = tokio::time::Instant::now();
        tokio::join!(ctx.throttle("www.tga.gov.au"), alias.throttle("www.tga.gov.au"));
        assert_eq!(limiter.recent_requests("www.tga.gov.au").await, 2);
        assert_eq!(start.elapsed(), Duration::ZERO);

        ctx.throttle("www.tga.gov.au").await;
        assert!(start.elapsed() >= crate::rate_limit::WINDOW);
    }
}
