//! Success-rate tracking per (source, strategy), persisted between runs.
//!
//! All mutations go through a single aggregator task that owns the
//! [`SuccessStats`]; workers only send it outcomes over a channel. Persistence
//! sits behind the [`StatsStore`] port so tests can swap the JSON file for memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use medsearch_common::{MedsearchError, Result, StrategyKind};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Rate reported for a strategy that has never been tried.
pub const NEUTRAL_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub success: u64,
    pub total: u64,
    pub rate: f64,
}

impl Default for StrategyStats {
    fn default() -> Self {
        Self { success: 0, total: 0, rate: NEUTRAL_RATE }
    }
}

impl StrategyStats {
    fn from_counts(success: u64, total: u64) -> Self {
        let success = success.min(total);
        let rate = if total == 0 { NEUTRAL_RATE } else { success as f64 / total as f64 };
        Self { success, total, rate }
    }

    pub fn record(&mut self, success: bool) {
        *self = Self::from_counts(self.success + u64::from(success), self.total + 1);
    }
}

/// `source_id → strategy name → stats`, serialized exactly in that shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuccessStats(BTreeMap<String, BTreeMap<String, StrategyStats>>);

impl SuccessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_id: &str, kind: StrategyKind) -> Option<&StrategyStats> {
        self.0.get(source_id)?.get(kind.as_str())
    }

    pub fn rate(&self, source_id: &str, kind: StrategyKind) -> f64 {
        self.get(source_id, kind).map_or(NEUTRAL_RATE, |s| s.rate)
    }

    pub fn record(&mut self, source_id: &str, kind: StrategyKind, success: bool) {
        self.0
            .entry(source_id.to_string())
            .or_default()
            .entry(kind.as_str().to_string())
            .or_default()
            .record(success);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a stats file written by any earlier version.
    ///
    /// Counts are taken as given and rates recomputed from them, so a hand-edited
    /// or stale `rate` can never leave `[0, 1]`. Entries that are not objects are skipped.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let sources = value
            .as_object()
            .ok_or_else(|| MedsearchError::Persistence("stats root is not an object".into()))?;

        let mut stats = BTreeMap::new();
        for (source_id, strategies) in sources {
            let Some(strategies) = strategies.as_object() else {
                continue;
            };
            let entry: &mut BTreeMap<String, StrategyStats> =
                stats.entry(source_id.clone()).or_default();
            for (name, raw) in strategies {
                let count = |field: &str| raw.get(field).and_then(|v| v.as_u64()).unwrap_or(0);
                if raw.is_object() {
                    entry.insert(name.clone(), StrategyStats::from_counts(count("success"), count("total")));
                }
            }
        }
        Ok(Self(stats))
    }
}

/// One finished strategy attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub source_id: String,
    pub strategy: StrategyKind,
    pub success: bool,
}

// ── Persistence port ──────────────────────────────────────────────────────────

pub trait StatsStore: Send + Sync {
    fn load(&self) -> Result<SuccessStats>;
    fn save(&self, stats: &SuccessStats) -> Result<()>;
}

/// Stats kept in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatsStore for JsonFileStore {
    fn load(&self) -> Result<SuccessStats> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No stats file yet");
            return Ok(SuccessStats::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        SuccessStats::from_json(&text)
    }

    fn save(&self, stats: &SuccessStats) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), stats)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| MedsearchError::Persistence(format!("{}: {}", self.path.display(), e.error)))?;
        Ok(())
    }
}

/// In-memory store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stats: Mutex<SuccessStats>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stats(stats: SuccessStats) -> Self {
        Self { stats: Mutex::new(stats), saves: AtomicUsize::new(0) }
    }

    pub fn stored(&self) -> SuccessStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StatsStore for MemoryStore {
    fn load(&self) -> Result<SuccessStats> {
        Ok(self.stored())
    }

    fn save(&self, stats: &SuccessStats) -> Result<()> {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

enum Command {
    Record(StrategyOutcome),
    Rates {
        source_id: String,
        kinds: Vec<StrategyKind>,
        reply: oneshot::Sender<Vec<f64>>,
    },
    Snapshot(oneshot::Sender<SuccessStats>),
    Replace(SuccessStats),
}

/// Handle to the aggregator task. Cheap to clone; the task stops when the
/// last handle is dropped.
#[derive(Clone)]
pub struct SuccessRateTracker {
    tx: mpsc::UnboundedSender<Command>,
    store: Arc<dyn StatsStore>,
}

impl std::fmt::Debug for SuccessRateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuccessRateTracker").finish_non_exhaustive()
    }
}

impl SuccessRateTracker {
    /// Load stats from `store` and start the aggregator. Unreadable stats are
    /// logged and replaced by empty ones. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn StatsStore>) -> Self {
        let initial = match store.load() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Failed to load success stats, starting fresh");
                SuccessStats::new()
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(aggregate(initial, rx));
        Self { tx, store }
    }

    pub fn in_memory() -> Self {
        Self::spawn(Arc::new(MemoryStore::new()))
    }

    pub async fn rate(&self, source_id: &str, kind: StrategyKind) -> f64 {
        self.rates(source_id, &[kind]).await.first().copied().unwrap_or(NEUTRAL_RATE)
    }

    /// Rates for several strategies of one source, read in a single step.
    pub async fn rates(&self, source_id: &str, kinds: &[StrategyKind]) -> Vec<f64> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Rates { source_id: source_id.to_string(), kinds: kinds.to_vec(), reply };
        if self.tx.send(cmd).is_err() {
            return vec![NEUTRAL_RATE; kinds.len()];
        }
        rx.await.unwrap_or_else(|_| vec![NEUTRAL_RATE; kinds.len()])
    }

    pub fn record(&self, source_id: &str, kind: StrategyKind, success: bool) {
        let outcome = StrategyOutcome { source_id: source_id.to_string(), strategy: kind, success };
        if self.tx.send(Command::Record(outcome)).is_err() {
            warn!(source_id, strategy = %kind, "Success tracker stopped; outcome dropped");
        }
    }

    /// Current stats, including every outcome recorded before this call.
    pub async fn snapshot(&self) -> SuccessStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot(reply)).is_err() {
            return SuccessStats::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn save(&self) -> Result<()> {
        let stats = self.snapshot().await;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&stats))
            .await
            .map_err(|e| MedsearchError::Persistence(format!("save task failed: {e}")))??;
        info!("Success stats saved");
        Ok(())
    }

    /// Reload from the store, replacing everything in memory.
    pub async fn load(&self) -> Result<()> {
        let store = self.store.clone();
        let stats = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| MedsearchError::Persistence(format!("load task failed: {e}")))??;
        self.tx
            .send(Command::Replace(stats))
            .map_err(|_| MedsearchError::Persistence("success tracker stopped".into()))
    }
}

async fn aggregate(mut stats: SuccessStats, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Record(o) => {
                stats.record(&o.source_id, o.strategy, o.success);
                debug!(
                    source_id = %o.source_id,
                    strategy = %o.strategy,
                    success = o.success,
                    rate = stats.rate(&o.source_id, o.strategy),
                    "Outcome recorded"
                );
            }
            Command::Rates { source_id, kinds, reply } => {
                let rates = kinds.iter().map(|k| stats.rate(&source_id, *k)).collect();
                let _ = reply.send(rates);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(stats.clone());
            }
            Command::Replace(new) => stats = new,
        }
    }
}
