//! ChEMBL molecule search.
//!
//! Endpoint: https://www.ebi.ac.uk/chembl/api/data/molecule/search.json?q=...

use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::ResultRecord;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::http::fetch_json;

const SEARCH_URL: &str = "https://www.ebi.ac.uk/chembl/api/data/molecule/search.json";
const REPORT_URL: &str = "https://www.ebi.ac.uk/chembl/compound_report_card";

pub const SOURCE_NAME: &str = "ChEMBL";

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    molecules: Vec<Molecule>,
}

#[derive(Debug, Deserialize)]
struct Molecule {
    molecule_chembl_id: String,
    pref_name: Option<String>,
    max_phase: Option<serde_json::Value>,
    first_approval: Option<i32>,
    molecule_type: Option<String>,
    /// Full-text search score, as returned by the API.
    score: Option<f64>,
}

pub struct ChemblMolecules {
    client: SandboxClient,
}

impl ChemblMolecules {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let params = [
            ("q", request.query.clone()),
            ("limit", request.max_results.to_string()),
        ];
        let body = fetch_json(&self.client, ctx, SEARCH_URL, &params).await?;
        let page: SearchPage = serde_json::from_value(body)?;
        debug!(count = page.molecules.len(), "ChEMBL molecules returned");
        Ok(to_records(page))
    }
}

#[async_trait]
impl AccessStrategy for ChemblMolecules {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn to_records(page: SearchPage) -> Vec<ResultRecord> {
    let top = page
        .molecules
        .iter()
        .filter_map(|m| m.score)
        .fold(0.0_f64, f64::max);

    page.molecules
        .into_iter()
        .map(|m| {
            let id = m.molecule_chembl_id;
            let title = m.pref_name.unwrap_or_else(|| id.clone());
            let phase = m.max_phase.as_ref().and_then(|p| match p {
                serde_json::Value::String(s) => s.parse::<f64>().ok(),
                other => other.as_f64(),
            });
            let mut summary = Vec::new();
            if let Some(kind) = m.molecule_type {
                summary.push(kind);
            }
            if let Some(phase) = phase {
                summary.push(format!("max phase {phase}"));
            }
            if let Some(year) = m.first_approval {
                summary.push(format!("first approved {year}"));
            }

            let mut record = ResultRecord::new(format!("chembl-{id}"), title, format!("{REPORT_URL}/{id}/"), SOURCE_NAME)
                .with_snippet(&summary.join(", "));
            if let (Some(score), true) = (m.score, top > 0.0) {
                record = record.with_relevance(score / top);
            }
            if let Some(year) = m.first_approval {
                record = record.with_date(&format!("{year}-01-01"));
            }
            record
        })
        .collect()
}
