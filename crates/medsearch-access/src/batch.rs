//! Fan a query out across many sources and merge what comes back.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use medsearch_common::{DateRange, MedsearchError, ResultRecord, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::orchestrator::AccessOrchestrator;
use crate::ranker::rank;
use crate::strategy::SearchRequest;

pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub query: String,
    pub source_ids: Vec<String>,
    pub max_results: usize,
    pub date_range: DateRange,
    pub parallel: bool,
    pub max_workers: usize,
}

impl BatchRequest {
    pub fn new<I, S>(query: impl Into<String>, source_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query: query.into(),
            source_ids: source_ids.into_iter().map(Into::into).collect(),
            max_results: DEFAULT_MAX_RESULTS,
            date_range: DateRange::unbounded(),
            parallel: false,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    /// Search sources concurrently with at most `max_workers` in flight.
    pub fn parallel(mut self, max_workers: usize) -> Self {
        self.parallel = true;
        self.max_workers = max_workers;
        self
    }

    /// Reject malformed invocations before any source is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(MedsearchError::InvalidRequest("query is empty".into()));
        }
        if self.source_ids.is_empty() {
            return Err(MedsearchError::InvalidRequest("no sources selected".into()));
        }
        if self.max_workers == 0 {
            return Err(MedsearchError::InvalidRequest("max_workers must be at least 1".into()));
        }
        Ok(())
    }

    fn search_request(&self) -> SearchRequest {
        SearchRequest::new(self.query.clone(), self.max_results).with_date_range(self.date_range)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Completed { records: usize },
    Panicked { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    #[serde(flatten)]
    pub status: SourceStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Ranked, concatenated in request order before ranking.
    pub records: Vec<ResultRecord>,
    /// One entry per requested source, in request order.
    pub sources: Vec<SourceSummary>,
    pub duration_ms: u64,
}

struct SourceRun {
    source_id: String,
    outcome: std::result::Result<Vec<ResultRecord>, String>,
    duration_ms: u64,
}

pub struct BatchCoordinator {
    orchestrator: Arc<AccessOrchestrator>,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<AccessOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<AccessOrchestrator> {
        &self.orchestrator
    }

    /// Ranked results from every requested source.
    pub async fn batch_search(&self, request: &BatchRequest) -> Result<Vec<ResultRecord>> {
        Ok(self.run(request).await?.records)
    }

    /// Search all sources and return the merged results with a per-source summary.
    ///
    /// A source that fails or panics contributes nothing; it never aborts the
    /// batch. Success stats are saved once at the end.
    #[instrument(skip(self, request), fields(query = %request.query, sources = request.source_ids.len()))]
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport> {
        request.validate()?;
        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let search = request.search_request();

        let runs = if request.parallel && request.source_ids.len() > 1 {
            info!(%batch_id, workers = request.max_workers, "Starting parallel batch");
            self.run_parallel(&request.source_ids, &search, request.max_workers).await
        } else {
            info!(%batch_id, "Starting sequential batch");
            let mut runs = Vec::with_capacity(request.source_ids.len());
            for source_id in &request.source_ids {
                runs.push(search_guarded(self.orchestrator.clone(), source_id.clone(), search.clone()).await);
            }
            runs
        };

        let mut merged = Vec::new();
        let mut sources = Vec::with_capacity(runs.len());
        for run in runs {
            let status = match run.outcome {
                Ok(records) => {
                    let status = SourceStatus::Completed { records: records.len() };
                    merged.extend(records);
                    status
                }
                Err(message) => {
                    error!(source_id = %run.source_id, %message, "Source search panicked");
                    SourceStatus::Panicked { message }
                }
            };
            sources.push(SourceSummary { source_id: run.source_id, status, duration_ms: run.duration_ms });
        }

        if let Err(e) = self.orchestrator.tracker().save().await {
            warn!(error = %e, "Failed to save success stats");
        }

        let report = BatchReport {
            batch_id,
            records: rank(merged),
            sources,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        log_report(&report);
        Ok(report)
    }

    async fn run_parallel(&self, source_ids: &[String], search: &SearchRequest, workers: usize) -> Vec<SourceRun> {
        let permits = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for (idx, source_id) in source_ids.iter().enumerate() {
            let orchestrator = self.orchestrator.clone();
            let permits = permits.clone();
            let search = search.clone();
            let source_id = source_id.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (idx, search_guarded(orchestrator, source_id, search).await)
            });
        }

        let mut runs = Vec::with_capacity(source_ids.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => error!(error = %e, "Batch worker did not finish"),
            }
        }
        runs.sort_by_key(|(idx, _)| *idx);
        runs.into_iter().map(|(_, run)| run).collect()
    }
}

async fn search_guarded(
    orchestrator: Arc<AccessOrchestrator>,
    source_id: String,
    search: SearchRequest,
) -> SourceRun {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(orchestrator.search_source(&source_id, &search))
        .catch_unwind()
        .await
        .map_err(panic_message);
    SourceRun { source_id, outcome, duration_ms: started.elapsed().as_millis() as u64 }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_report(report: &BatchReport) {
    for s in &report.sources {
        match &s.status {
            SourceStatus::Completed { records } => {
                info!(source_id = %s.source_id, records, duration_ms = s.duration_ms, "Source finished")
            }
            SourceStatus::Panicked { message } => {
                warn!(source_id = %s.source_id, %message, "Source contributed no results")
            }
        }
    }
    info!(
        batch_id = %report.batch_id,
        total = report.records.len(),
        duration_ms = report.duration_ms,
        "Batch complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use crate::strategy::{strategy_fn, StrategyContext, StrategyResult};
    use crate::tracker::{MemoryStore, SuccessRateTracker};
    use medsearch_common::{SourceCatalog, StrategyKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn rec(id: &str, score: f64) -> ResultRecord {
        ResultRecord::new(id, id, "https://example.org", "Test").with_relevance(score)
    }

    fn coordinator(registry: SourceRegistry, store: Arc<MemoryStore>) -> BatchCoordinator {
        let tracker = SuccessRateTracker::spawn(store);
        let orch = AccessOrchestrator::new(registry, SourceCatalog::empty(), tracker);
        BatchCoordinator::new(Arc::new(orch))
    }

    #[test]
    fn test_validate_rejects_malformed_requests() {
        assert!(BatchRequest::new("aspirin", Vec::<String>::new()).validate().is_err());
        assert!(BatchRequest::new("  ", ["pubmed"]).validate().is_err());
        assert!(BatchRequest::new("aspirin", ["pubmed"]).parallel(0).validate().is_err());
        assert!(BatchRequest::new("aspirin", ["pubmed"]).validate().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_request_contacts_no_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut registry = SourceRegistry::new();
        registry.register(
            "pubmed",
            StrategyKind::Api,
            strategy_fn(move |_: SearchRequest, _: StrategyContext| {
                c.fetch_add(1, Ordering::SeqCst);
                async { StrategyResult::Empty }
            }),
        );
        let batch = coordinator(registry, Arc::new(MemoryStore::new()));
        let err = batch.run(&BatchRequest::new("aspirin", ["pubmed"]).parallel(0)).await;
        assert!(matches!(err, Err(MedsearchError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequential_panic_is_isolated_and_stats_saved_once() {
        let mut registry = SourceRegistry::new();
        registry
            .register(
                "a",
                StrategyKind::Api,
                strategy_fn(|_: SearchRequest, _: StrategyContext| async {
                    StrategyResult::Success(vec![rec("a1", 0.2)])
                }),
            )
            .register(
                "b",
                StrategyKind::Api,
                strategy_fn(|req: SearchRequest, _: StrategyContext| async move {
                    if !req.query.is_empty() {
                        panic!("driver crashed");
                    }
                    StrategyResult::Empty
                }),
            )
            .register(
                "c",
                StrategyKind::Api,
                strategy_fn(|_: SearchRequest, _: StrategyContext| async {
                    StrategyResult::Success(vec![rec("c1", 0.8)])
                }),
            );
        let store = Arc::new(MemoryStore::new());
        let batch = coordinator(registry, store.clone());

        let report = batch.run(&BatchRequest::new("aspirin", ["a", "b", "c"])).await.unwrap();
        let ids: Vec<_> = report.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "a1"]);
        assert_eq!(
            report.sources[1].status,
            SourceStatus::Panicked { message: "driver crashed".into() }
        );
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.stored().rate("a", StrategyKind::Api), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_respects_worker_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = SourceRegistry::new();
        let ids: Vec<String> = (0..6).map(|i| format!("s{i}")).collect();
        for id in &ids {
            let (in_flight, peak) = (in_flight.clone(), peak.clone());
            let rid = id.clone();
            registry.register(
                id,
                StrategyKind::Api,
                strategy_fn(move |_: SearchRequest, _: StrategyContext| {
                    let (in_flight, peak, rid) = (in_flight.clone(), peak.clone(), rid.clone());
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        StrategyResult::Success(vec![rec(&rid, 0.5)])
                    }
                }),
            );
        }
        let batch = coordinator(registry, Arc::new(MemoryStore::new()));

        let report = batch.run(&BatchRequest::new("aspirin", ids.clone()).parallel(2)).await.unwrap();
        assert_eq!(report.records.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        // Equal scores: request order survives the merge.
        let got: Vec<_> = report.records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(got, ids);
        let summary_ids: Vec<_> = report.sources.iter().map(|s| s.source_id.clone()).collect();
        assert_eq!(summary_ids, ids);
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42_u8)), "unknown panic");
    }
}
