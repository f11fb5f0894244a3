//! RxNav drug concepts from the NLM RxNorm API.
//!
//! Endpoint: https://rxnav.nlm.nih.gov/REST/drugs.json?name=...
//! Concepts carry no dates; every record is undated.

use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::ResultRecord;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::http::fetch_json;

const DRUGS_URL: &str = "https://rxnav.nlm.nih.gov/REST/drugs.json";
const CONCEPT_URL: &str = "https://mor.nlm.nih.gov/RxNav/search?searchBy=RXCUI&searchTerm=";

pub const SOURCE_NAME: &str = "RxNav";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrugsResponse {
    #[serde(default)]
    drug_group: DrugGroup,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrugGroup {
    #[serde(default)]
    concept_group: Vec<ConceptGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConceptGroup {
    #[serde(default)]
    concept_properties: Vec<Concept>,
}

#[derive(Debug, Deserialize)]
struct Concept {
    rxcui: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    synonym: String,
    #[serde(default)]
    tty: String,
}

pub struct RxNavDrugs {
    client: SandboxClient,
}

impl RxNavDrugs {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let body = fetch_json(&self.client, ctx, DRUGS_URL, &[("name", request.query.clone())]).await?;
        let resp: DrugsResponse = serde_json::from_value(body)?;
        let records = to_records(resp, request.max_results);
        debug!(count = records.len(), "RxNav concepts parsed");
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for RxNavDrugs {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn to_records(resp: DrugsResponse, max_results: usize) -> Vec<ResultRecord> {
    resp.drug_group
        .concept_group
        .into_iter()
        .flat_map(|g| g.concept_properties)
        .filter(|c| !c.name.is_empty())
        .take(max_results)
        .map(|c| {
            let mut snippet = format!("RxCUI: {}", c.rxcui);
            if !c.tty.is_empty() {
                snippet.push_str(&format!(" ({})", c.tty));
            }
            if !c.synonym.is_empty() {
                snippet.push_str(&format!(". {}", c.synonym));
            }
            ResultRecord::new(format!("rxnav-{}", c.rxcui), c.name, format!("{CONCEPT_URL}{}", c.rxcui), SOURCE_NAME)
                .with_snippet(&snippet)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_concepts_across_groups() {
        let resp: DrugsResponse = serde_json::from_str(
            r#"{"drugGroup": {"name": null, "conceptGroup": [
                {"tty": "BPCK"},
                {"tty": "SBD", "conceptProperties": [
                    {"rxcui": "213269", "name": "metformin hydrochloride 500 MG Oral Tablet [Glucophage]",
                     "synonym": "Glucophage 500 MG Oral Tablet", "tty": "SBD"}
                ]},
                {"tty": "SCD", "conceptProperties": [
                    {"rxcui": "861007", "name": "metformin hydrochloride 500 MG Oral Tablet", "synonym": "", "tty": "SCD"},
                    {"rxcui": "861010", "name": "metformin hydrochloride 850 MG Oral Tablet", "synonym": "", "tty": "SCD"}
                ]}
            ]}}"#,
        )
        .unwrap();

        let records = to_records(resp, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "rxnav-213269");
        assert_eq!(records[0].snippet, "RxCUI: 213269 (SBD). Glucophage 500 MG Oral Tablet");
        assert_eq!(
            records[0].url,
            "https://mor.nlm.nih.gov/RxNav/search?searchBy=RXCUI&searchTerm=213269"
        );
        assert_eq!(records[1].snippet, "RxCUI: 861007 (SCD)");
        assert_eq!(records[1].date, "");
    }

    #[test]
    fn test_no_match_has_empty_group() {
        let resp: DrugsResponse = serde_json::from_str(r#"{"drugGroup": {"name": null}}"#).unwrap();
        assert!(to_records(resp, 10).is_empty());
    }
}
