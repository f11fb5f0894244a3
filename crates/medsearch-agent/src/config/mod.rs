//! Configuration loading for medsearch.
//! Reads medsearch.toml from the current directory or the path in the MEDSEARCH_CONFIG env var.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use medsearch_access::{CaptchaSolver, RetryPolicy};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::{SourceCatalog, SourceConfig};
use medsearch_sources::{ApiKeys, TwoCaptchaSolver};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub pubmed: PubMedConfig,
    #[serde(default)]
    pub drugbank: DrugBankConfig,
    /// Per-source overrides, merged over the built-in catalog.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_databases")]
    pub databases: Vec<String>,
    /// Added to `databases` when commercial providers are requested.
    #[serde(default = "default_commercial_databases")]
    pub commercial_databases: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_databases() -> Vec<String> {
    ["pubmed", "fda-drugs", "ema-medicines", "mhra", "tga-cmi"].map(String::from).to_vec()
}
fn default_commercial_databases() -> Vec<String> {
    ["drugbank", "rxnav", "chembl"].map(String::from).to_vec()
}
fn default_max_results()  -> usize   { 10 }
fn default_max_workers()  -> usize   { 4 }
fn default_output_dir()   -> PathBuf { PathBuf::from(".") }
fn default_http_timeout() -> u64     { 30 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            databases: default_databases(),
            commercial_databases: default_commercial_databases(),
            max_results: default_max_results(),
            parallel: false,
            max_workers: default_max_workers(),
            output_dir: default_output_dir(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl SearchConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Configured databases, with the commercial ones appended when asked for.
    pub fn selected_databases(&self, include_commercial: bool) -> Vec<String> {
        let mut ids = self.databases.clone();
        if include_commercial {
            for id in &self.commercial_databases {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_stats_path")]
    pub stats_path: PathBuf,
}

fn default_stats_path() -> PathBuf { PathBuf::from("success_rates.json") }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { stats_path: default_stats_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_initial_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms()     -> u64 { 30_000 }
fn default_backoff_factor()   -> f64 { 2.0 }
fn default_jitter_factor()    -> f64 { 0.25 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Backoff template; the retry count comes from each source's `max_retries`.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            jitter_factor: self.jitter_factor.clamp(0.0, 1.0),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    #[serde(default = "default_captcha_service")]
    pub service: String,
    /// Environment variable holding the service API key.
    #[serde(default = "default_captcha_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_captcha_timeout")]
    pub timeout_secs: u64,
}

fn default_captcha_service() -> String { "2captcha".to_string() }
fn default_captcha_key_env() -> String { "CAPTCHA_API_KEY".to_string() }
fn default_captcha_timeout() -> u64    { 120 }

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            service: default_captcha_service(),
            api_key_env: default_captcha_key_env(),
            timeout_secs: default_captcha_timeout(),
        }
    }
}

impl CaptchaConfig {
    /// The configured solver, or `None` when the service is unknown or has no key.
    pub fn solver(&self, client: SandboxClient) -> Option<Arc<dyn CaptchaSolver>> {
        let Some(key) = secret_from_env(&self.api_key_env) else {
            debug!(env = %self.api_key_env, "No CAPTCHA API key set; solver disabled");
            return None;
        };
        match self.service.as_str() {
            "2captcha" => Some(Arc::new(TwoCaptchaSolver::new(
                client,
                key,
                Duration::from_secs(self.timeout_secs),
            ))),
            other => {
                warn!(service = other, "Unsupported CAPTCHA service; solver disabled");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubMedConfig {
    #[serde(default = "default_pubmed_key_env")]
    pub api_key_env: String,
}

fn default_pubmed_key_env() -> String { "NCBI_API_KEY".to_string() }

impl Default for PubMedConfig {
    fn default() -> Self {
        Self { api_key_env: default_pubmed_key_env() }
    }
}

impl PubMedConfig {
    pub fn api_key(&self) -> Option<SecretString> {
        secret_from_env(&self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugBankConfig {
    #[serde(default = "default_drugbank_key_env")]
    pub api_key_env: String,
}

fn default_drugbank_key_env() -> String { "DRUGBANK_API_KEY".to_string() }

impl Default for DrugBankConfig {
    fn default() -> Self {
        Self { api_key_env: default_drugbank_key_env() }
    }
}

fn secret_from_env(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Load configuration from file.
    /// Checks MEDSEARCH_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("MEDSEARCH_CONFIG").unwrap_or_else(|_| "medsearch.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Rejects values that parse as TOML but cannot drive a search.
    fn validate(&self) -> anyhow::Result<()> {
        let retry = &self.retry;
        if !retry.backoff_factor.is_finite() || retry.backoff_factor <= 0.0 {
            anyhow::bail!("retry.backoff_factor must be a positive number, got {}", retry.backoff_factor);
        }
        if !retry.jitter_factor.is_finite() || retry.jitter_factor < 0.0 {
            anyhow::bail!("retry.jitter_factor must be a non-negative number, got {}", retry.jitter_factor);
        }
        Ok(())
    }

    pub fn api_keys(&self) -> ApiKeys {
        ApiKeys {
            pubmed: self.pubmed.api_key(),
            drugbank: secret_from_env(&self.drugbank.api_key_env),
        }
    }

    /// Built-in catalog with this file's `[sources.*]` entries applied.
    pub fn catalog(&self) -> SourceCatalog {
        let mut catalog = SourceCatalog::builtin();
        for (id, source) in &self.sources {
            catalog.insert(id, source.clone());
        }
        catalog
    }
}

mod tests;
