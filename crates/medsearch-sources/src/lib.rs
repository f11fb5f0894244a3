//! medsearch-sources — Adapters for the medical databases medsearch can query.
//!
//! Each adapter implements [`medsearch_access::AccessStrategy`] for one access
//! method of one source. [`default_registry`] wires up every adapter shipped here.

pub mod captcha;
pub mod http;
pub mod sources;
pub mod web;

use medsearch_access::SourceRegistry;
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::StrategyKind;
use secrecy::SecretString;
use tracing::debug;

pub use captcha::TwoCaptchaSolver;

use sources::{
    ChemblMolecules, DrugBankDrugs, EmaMedicines, MhraProducts, OpenFdaLabels, PubMedApi,
    PubMedBrowser, RxNavDrugs, TgaCmiSearch,
};

/// API keys for the sources that take one.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Optional; raises the NCBI rate limit.
    pub pubmed: Option<SecretString>,
    /// Required; DrugBank is skipped without it.
    pub drugbank: Option<SecretString>,
}

/// Registry with every adapter in this crate, in preferred order per source.
pub fn default_registry(client: SandboxClient, keys: ApiKeys) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry
        .register("pubmed", StrategyKind::Api, PubMedApi::new(client.clone(), keys.pubmed))
        .register("pubmed", StrategyKind::Browser, PubMedBrowser::new(client.clone()))
        .register("fda-drugs", StrategyKind::Api, OpenFdaLabels::new(client.clone()))
        .register("ema-medicines", StrategyKind::Api, EmaMedicines::new(client.clone()))
        .register("mhra", StrategyKind::Api, MhraProducts::new(client.clone()))
        .register("tga-cmi", StrategyKind::Browser, TgaCmiSearch::new(client.clone()))
        .register("rxnav", StrategyKind::Api, RxNavDrugs::new(client.clone()))
        .register("chembl", StrategyKind::Api, ChemblMolecules::new(client.clone()));
    registry.alias("tga", "tga-cmi");
    match keys.drugbank {
        Some(key) => {
            registry.register("drugbank", StrategyKind::Api, DrugBankDrugs::new(client, key));
        }
        None => debug!("No DrugBank API key; drugbank not registered"),
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> SandboxClient {
        SandboxClient::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_default_registry_sources() {
        let registry = default_registry(client(), ApiKeys::default());
        assert_eq!(
            registry.source_ids().collect::<Vec<_>>(),
            vec!["chembl", "ema-medicines", "fda-drugs", "mhra", "pubmed", "rxnav", "tga", "tga-cmi"]
        );
        let pubmed: Vec<_> = registry.strategies("pubmed").iter().map(|s| s.kind).collect();
        assert_eq!(pubmed, vec![StrategyKind::Api, StrategyKind::Browser]);
        assert_eq!(registry.strategies("tga")[0].kind, StrategyKind::Browser);
    }

    #[test]
    fn test_drugbank_needs_key() {
        let keys = ApiKeys { drugbank: Some(SecretString::from("db-key")), ..ApiKeys::default() };
        let registry = default_registry(client(), keys);
        assert!(registry.contains("drugbank"));
        assert!(!default_registry(client(), ApiKeys::default()).contains("drugbank"));
    }
}
