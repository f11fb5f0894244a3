//! Explicit mapping from source id to its access strategies.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use medsearch_common::StrategyKind;

use crate::strategy::AccessStrategy;

#[derive(Clone)]
pub struct RegisteredStrategy {
    pub kind: StrategyKind,
    pub strategy: Arc<dyn AccessStrategy>,
}

impl fmt::Debug for RegisteredStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStrategy").field("kind", &self.kind).finish()
    }
}

/// Source id → strategies, in registration order.
///
/// Registration order is the tie-break when two strategies have the same
/// tracked success rate.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Vec<RegisteredStrategy>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` for `source_id`. A second registration of the same
    /// kind replaces the first but keeps its position.
    pub fn register<S>(&mut self, source_id: &str, kind: StrategyKind, strategy: S) -> &mut Self
    where
        S: AccessStrategy + 'static,
    {
        self.register_arc(source_id, kind, Arc::new(strategy))
    }

    pub fn register_arc(
        &mut self,
        source_id: &str,
        kind: StrategyKind,
        strategy: Arc<dyn AccessStrategy>,
    ) -> &mut Self {
        let entries = self.sources.entry(source_id.to_string()).or_default();
        match entries.iter_mut().find(|e| e.kind == kind) {
            Some(existing) => existing.strategy = strategy,
            None => entries.push(RegisteredStrategy { kind, strategy }),
        }
        self
    }

    /// Strategies for `source_id`; empty when the source is unknown.
    pub fn strategies(&self, source_id: &str) -> &[RegisteredStrategy] {
        self.sources.get(source_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.get(source_id).is_some_and(|s| !s.is_empty())
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Drop every strategy whose kind fails `keep`; sources left without
    /// strategies are removed.
    pub fn retain_kinds(&mut self, keep: impl Fn(StrategyKind) -> bool) -> &mut Self {
        for entries in self.sources.values_mut() {
            entries.retain(|e| keep(e.kind));
        }
        self.sources.retain(|_, entries| !entries.is_empty());
        self
    }

    /// Make `alias` share the strategies already registered for `source_id`.
    pub fn alias(&mut self, alias: &str, source_id: &str) -> &mut Self {
        if let Some(entries) = self.sources.get(source_id).cloned() {
            self.sources.insert(alias.to_string(), entries);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{strategy_fn, SearchRequest, StrategyContext, StrategyResult};

    fn noop() -> impl AccessStrategy {
        strategy_fn(|_: SearchRequest, _: StrategyContext| async { StrategyResult::Empty })
    }

    #[test]
    fn test_unknown_source_has_no_strategies() {
        let registry = SourceRegistry::new();
        assert!(registry.strategies("pubmed").is_empty());
        assert!(!registry.contains("pubmed"));
    }

    #[test]
    fn test_registration_order_kept_and_reregistration_replaces() {
        let mut registry = SourceRegistry::new();
        registry
            .register("pubmed", StrategyKind::Api, noop())
            .register("pubmed", StrategyKind::Browser, noop())
            .register("pubmed", StrategyKind::Api, noop());

        let kinds: Vec<_> = registry.strategies("pubmed").iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StrategyKind::Api, StrategyKind::Browser]);
    }

    #[test]
    fn test_alias_shares_strategies() {
        let mut registry = SourceRegistry::new();
        registry.register("tga-cmi", StrategyKind::Browser, noop());
        registry.alias("tga", "tga-cmi").alias("ghost", "missing");

        assert_eq!(registry.strategies("tga").len(), 1);
        assert!(!registry.contains("ghost"));
        assert_eq!(registry.source_ids().collect::<Vec<_>>(), vec!["tga", "tga-cmi"]);
    }

    #[test]
    fn test_retain_kinds_drops_browser_strategies() {
        let mut registry = SourceRegistry::new();
        registry
            .register("pubmed", StrategyKind::Api, noop())
            .register("pubmed", StrategyKind::Browser, noop())
            .register("tga", StrategyKind::Selenium, noop());
        registry.retain_kinds(|k| k == StrategyKind::Api);

        assert_eq!(registry.strategies("pubmed").len(), 1);
        assert!(!registry.contains("tga"));
        assert_eq!(registry.source_ids().collect::<Vec<_>>(), vec!["pubmed"]);
    }
}
