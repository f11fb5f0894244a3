//! Per-source access configuration.
//!
//! Every source id resolves to a [`SourceConfig`]: the built-in catalog covers the
//! regulators and commercial providers medsearch knows about, `medsearch.toml` may
//! override any of them, and unknown ids fall back to a conservative default.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::StrategyKind;

/// Access settings for one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub use_proxies: bool,
    #[serde(default)]
    pub use_captcha_solver: bool,
    #[serde(default)]
    pub use_authentication: bool,
    #[serde(default = "default_true")]
    pub respect_rate_limits: bool,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub use_selenium: bool,
    /// Seconds a browser strategy waits for a page to settle.
    #[serde(default = "default_wait_time")]
    pub wait_time: u64,
    /// Hard per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Strategy kinds the orchestrator may use for this source. Empty allows
    /// every registered strategy.
    #[serde(default)]
    pub access_methods: Vec<StrategyKind>,
}

fn default_true()            -> bool             { true }
fn default_rpm()             -> u32              { 10 }
fn default_max_retries()     -> u32              { 3 }
fn default_wait_time()       -> u64              { 5 }
fn default_timeout()         -> u64              { 30 }

impl SourceConfig {
    /// Fallback configuration for a source id the catalog does not know.
    pub fn default_for(source_id: &str) -> Self {
        Self {
            name: source_id.to_uppercase(),
            url: format!("https://www.{}.com/", source_id.to_lowercase()),
            api_url: String::new(),
            use_proxies: false,
            use_captcha_solver: false,
            use_authentication: false,
            respect_rate_limits: true,
            requests_per_minute: default_rpm(),
            max_retries: default_max_retries(),
            use_selenium: false,
            wait_time: default_wait_time(),
            timeout: default_timeout(),
            access_methods: Vec::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time)
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// Lookup table from source id to [`SourceConfig`].
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    configs: BTreeMap<String, SourceConfig>,
}

impl SourceCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the known medical databases.
    pub fn builtin() -> Self {
        use StrategyKind::*;

        let mut catalog = Self::empty();
        let mut add = |id: &str, cfg: SourceConfig| {
            catalog.insert(id, cfg);
        };

        add("pubmed", Entry::new("PubMed", "https://pubmed.ncbi.nlm.nih.gov/")
            .api("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/")
            .rpm(10).captcha().selenium()
            .methods(&[Api, Browser, Selenium]).build());
        add("fda-drugs", Entry::new("FDA - Drugs", "https://www.accessdata.fda.gov/scripts/cder/daf/")
            .api("https://api.fda.gov/drug/")
            .rpm(40)
            .methods(&[Api, Browser]).build());
        add("ema-medicines", Entry::new("EMA Medicines", "https://www.ema.europa.eu/en/medicines/")
            .api("https://www.ema.europa.eu/en/medicines/api/medicines")
            .rpm(20).proxies().captcha().selenium()
            .methods(&[Api, Browser, Selenium]).build());
        add("mhra", Entry::new("MHRA", "https://products.mhra.gov.uk/")
            .api("https://products.mhra.gov.uk/api/search")
            .rpm(15).captcha().selenium()
            .methods(&[Api, Browser, Selenium]).build());
        let tga = Entry::new("TGA - Consumer Medicines Information", "https://www.tga.gov.au/products/consumer-medicines-information/search")
            .rpm(8).retries(4).wait(3).proxies().captcha().selenium()
            .methods(&[Browser, Selenium, BrowserAutomation]).build();
        add("tga-cmi", tga.clone());
        add("tga", SourceConfig { name: "TGA".into(), url: "https://www.tga.gov.au/".into(), ..tga });
        add("drugbank", Entry::new("DrugBank", "https://go.drugbank.com/")
            .api("https://api.drugbank.com/v1/")
            .rpm(30).auth()
            .methods(&[Api]).build());
        add("rxnav", Entry::new("RxNav", "https://mor.nlm.nih.gov/RxNav/")
            .api("https://rxnav.nlm.nih.gov/REST/")
            .rpm(20)
            .methods(&[Api]).build());
        add("chembl", Entry::new("ChEMBL", "https://www.ebi.ac.uk/chembl/")
            .api("https://www.ebi.ac.uk/chembl/api/")
            .rpm(15)
            .methods(&[Api]).build());
        add("swissmedic", Entry::new("Swissmedic", "https://www.swissmedic.ch/")
            .rpm(5).retries(5).proxies().selenium()
            .methods(&[Browser, Selenium]).build());
        add("medsafe", Entry::new("Medsafe", "https://www.medsafe.govt.nz/")
            .rpm(20).retries(2)
            .methods(&[Browser]).build());
        add("lakemedelsverket", Entry::new("Läkemedelsverket", "https://www.lakemedelsverket.se/")
            .rpm(10).wait(4).proxies().selenium()
            .methods(&[Browser, Selenium]).build());

        catalog
    }

    pub fn insert(&mut self, source_id: &str, config: SourceConfig) {
        self.configs.insert(source_id.to_string(), config);
    }

    /// Configuration for `source_id`, or the generic default when it is not catalogued.
    pub fn get_database_config(&self, source_id: &str) -> SourceConfig {
        self.configs
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| SourceConfig::default_for(source_id))
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.configs.contains_key(source_id)
    }

    /// Catalogued source ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }
}

/// Small builder so the catalog table stays readable.
struct Entry(SourceConfig);

impl Entry {
    fn new(name: &str, url: &str) -> Self {
        Self(SourceConfig {
            name: name.to_string(),
            url: url.to_string(),
            ..SourceConfig::default_for(name)
        })
    }
    fn api(mut self, url: &str) -> Self { self.0.api_url = url.to_string(); self }
    fn rpm(mut self, rpm: u32) -> Self { self.0.requests_per_minute = rpm; self }
    fn retries(mut self, n: u32) -> Self { self.0.max_retries = n; self }
    fn wait(mut self, secs: u64) -> Self { self.0.wait_time = secs; self }
    fn captcha(mut self) -> Self { self.0.use_captcha_solver = true; self }
    fn selenium(mut self) -> Self { self.0.use_selenium = true; self }
    fn proxies(mut self) -> Self { self.0.use_proxies = true; self }
    fn auth(mut self) -> Self { self.0.use_authentication = true; self }
    fn methods(mut self, kinds: &[StrategyKind]) -> Self { self.0.access_methods = kinds.to_vec(); self }
    fn build(self) -> SourceConfig { self.0 }
}
