//! medsearch-access — Multi-source access orchestration.
//!
//! For every data source the orchestrator picks among the registered access
//! strategies (official API, browser, selenium, browser automation), ordered by
//! their tracked success rate, and falls back between them until one returns
//! results. The batch coordinator fans a query out across many sources and
//! merges the ranked results.
//!
//! - Rate limiting per network domain (`rate_limit`)
//! - Exponential backoff with jitter (`retry`)
//! - Strategy contract and capabilities (`strategy`)
//! - Source registry (`registry`)
//! - Persistent success-rate tracking (`tracker`)
//! - Per-source fallback (`orchestrator`)
//! - Fan-out and merge (`batch`, `ranker`)

pub mod batch;
pub mod orchestrator;
pub mod ranker;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod strategy;
pub mod tracker;

pub use batch::{BatchCoordinator, BatchReport, BatchRequest, SourceStatus, SourceSummary};
pub use orchestrator::AccessOrchestrator;
pub use rate_limit::RateLimiter;
pub use registry::{RegisteredStrategy, SourceRegistry};
pub use retry::{ExhaustedRetries, RetryPolicy};
pub use strategy::{
    strategy_fn, AccessStrategy, BrowserLauncher, BrowserSession, CaptchaChallenge,
    CaptchaSolver, SearchRequest, StrategyContext, StrategyResult,
};
pub use tracker::{
    JsonFileStore, MemoryStore, StatsStore, StrategyOutcome, StrategyStats, SuccessRateTracker,
    SuccessStats,
};
