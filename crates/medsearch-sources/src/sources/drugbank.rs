//! DrugBank drug search (commercial API, bearer key required).
//!
//! Endpoint: POST https://api.drugbank.com/v1/drugs/search with a JSON body.

use anyhow::Context;
use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::ResultRecord;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::http::send;

const SEARCH_URL: &str = "https://api.drugbank.com/v1/drugs/search";
const DRUG_URL: &str = "https://go.drugbank.com/drugs";

pub const SOURCE_NAME: &str = "DrugBank";

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Drug>,
}

#[derive(Debug, Deserialize)]
struct Drug {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    updated: Option<String>,
    cas_number: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

pub struct DrugBankDrugs {
    client: SandboxClient,
    api_key: SecretString,
}

impl DrugBankDrugs {
    pub fn new(client: SandboxClient, api_key: SecretString) -> Self {
        Self { client, api_key }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let body = json!({ "query": request.query, "limit": request.max_results });
        let req = self
            .client
            .post(SEARCH_URL)?
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);
        let page: SearchPage = send(ctx, SEARCH_URL, req)
            .await?
            .error_for_status()
            .context("DrugBank search rejected")?
            .json()
            .await?;
        debug!(count = page.results.len(), "DrugBank drugs returned");

        let mut records = to_records(page);
        records.retain(|r| request.date_range.admits(&r.date));
        records.truncate(request.max_results);
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for DrugBankDrugs {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn to_records(page: SearchPage) -> Vec<ResultRecord> {
    page.results
        .into_iter()
        .filter(|d| !d.name.is_empty())
        .map(|d| {
            let mut snippet = d.description;
            if snippet.is_empty() {
                let mut facts = Vec::new();
                if let Some(cas) = d.cas_number.filter(|c| !c.is_empty()) {
                    facts.push(format!("CAS {cas}"));
                }
                if !d.groups.is_empty() {
                    facts.push(d.groups.join(", "));
                }
                snippet = facts.join("; ");
            }
            ResultRecord::new(format!("drugbank-{}", d.id), d.name, format!("{DRUG_URL}/{}", d.id), SOURCE_NAME)
                .with_date(d.updated.as_deref().and_then(|u| u.get(..10)).unwrap_or_default())
                .with_snippet(&snippet)
        })
        .collect()
}
