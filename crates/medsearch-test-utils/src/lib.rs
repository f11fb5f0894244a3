//! Fakes and builders shared by medsearch tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use medsearch_access::{
    AccessOrchestrator, AccessStrategy, BatchCoordinator, MemoryStore, RetryPolicy, SearchRequest,
    SourceRegistry, StatsStore, StrategyContext, StrategyResult, SuccessRateTracker, SuccessStats,
};
use medsearch_common::{MedsearchError, ResultRecord, SourceCatalog, SourceConfig};

// ── Records ───────────────────────────────────────────────────────────────────

pub fn record(source: &str, id: &str) -> ResultRecord {
    ResultRecord::new(
        format!("{source}-{id}"),
        format!("{source} result {id}"),
        format!("https://example.org/{source}/{id}"),
        source,
    )
}

pub fn scored(id: &str, score: f64) -> ResultRecord {
    record("test", id).with_relevance(score)
}

/// `n` unscored records from `source`, ids `<source>-0`, `<source>-1`, …
pub fn records(source: &str, n: usize) -> Vec<ResultRecord> {
    (0..n).map(|i| record(source, &i.to_string())).collect()
}

// ── Strategies ────────────────────────────────────────────────────────────────

/// Replays a fixed script of results, then repeats a fallback forever.
pub struct ScriptedStrategy {
    script: Mutex<VecDeque<StrategyResult>>,
    then: StrategyResult,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn always(result: StrategyResult) -> Arc<Self> {
        Self::sequence(Vec::new(), result)
    }

    pub fn sequence(script: Vec<StrategyResult>, then: StrategyResult) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            then,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(records: Vec<ResultRecord>) -> Arc<Self> {
        Self::always(StrategyResult::Success(records))
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Self::always(StrategyResult::failure(reason))
    }

    pub fn empty() -> Arc<Self> {
        Self::always(StrategyResult::Empty)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessStrategy for ScriptedStrategy {
    async fn search(&self, _request: &SearchRequest, _ctx: &StrategyContext) -> StrategyResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        next.unwrap_or_else(|| self.then.clone())
    }
}

/// Panics on every call, standing in for a crashed browser driver.
pub struct PanickingStrategy(pub &'static str);

#[async_trait]
impl AccessStrategy for PanickingStrategy {
    async fn search(&self, _request: &SearchRequest, _ctx: &StrategyContext) -> StrategyResult {
        panic!("{}", self.0)
    }
}

// ── Stores ────────────────────────────────────────────────────────────────────

/// Starts empty and rejects every save, like a read-only stats directory.
#[derive(Debug, Default)]
pub struct FailingStore {
    save_attempts: AtomicUsize,
}

impl FailingStore {
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

impl StatsStore for FailingStore {
    fn load(&self) -> medsearch_common::Result<SuccessStats> {
        Ok(SuccessStats::new())
    }

    fn save(&self, _stats: &SuccessStats) -> medsearch_common::Result<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        Err(MedsearchError::Persistence("success_rates.json: read-only file system".into()))
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Catalog whose only entry is `source_id`, edited from the generic default.
pub fn catalog_with(source_id: &str, edit: impl FnOnce(&mut SourceConfig)) -> SourceCatalog {
    let mut catalog = SourceCatalog::empty();
    catalog.insert(source_id, edited(source_id, edit));
    catalog
}

pub fn edited(source_id: &str, edit: impl FnOnce(&mut SourceConfig)) -> SourceConfig {
    let mut config = SourceConfig::default_for(source_id);
    edit(&mut config);
    config
}

/// Retry policy with millisecond delays for tests that run on real time.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

/// An orchestrator backed by an in-memory stats store seeded with `stats`.
pub fn orchestrator_with_stats(
    registry: SourceRegistry,
    catalog: SourceCatalog,
    stats: SuccessStats,
) -> (Arc<AccessOrchestrator>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_stats(stats));
    let tracker = SuccessRateTracker::spawn(store.clone());
    let orch = AccessOrchestrator::new(registry, catalog, tracker).with_retry_policy(fast_retry());
    (Arc::new(orch), store)
}

pub fn orchestrator(registry: SourceRegistry, catalog: SourceCatalog) -> (Arc<AccessOrchestrator>, Arc<MemoryStore>) {
    orchestrator_with_stats(registry, catalog, SuccessStats::new())
}

pub fn coordinator(registry: SourceRegistry, catalog: SourceCatalog) -> (BatchCoordinator, Arc<MemoryStore>) {
    let (orch, store) = orchestrator(registry, catalog);
    (BatchCoordinator::new(orch), store)
}
