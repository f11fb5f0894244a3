//! MHRA products search.
//!
//! Endpoint: POST https://products.mhra.gov.uk/api/search with a JSON body.

use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::ResultRecord;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::http::post_json;

const SEARCH_URL: &str = "https://products.mhra.gov.uk/api/search";
const BASE_URL: &str = "https://products.mhra.gov.uk";

pub const SOURCE_NAME: &str = "MHRA";

#[derive(Debug, Deserialize)]
struct SearchPage {
    results: Vec<Product>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Product {
    #[serde(default)]
    name: String,
    product_id: Option<String>,
    authorisation_date: Option<String>,
    #[serde(default)]
    active_substances: Vec<String>,
    product_type: Option<String>,
    marketing_status: Option<String>,
    marketing_authorisation_holder: Option<String>,
}

pub struct MhraProducts {
    client: SandboxClient,
}

impl MhraProducts {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let body = json!({
            "query": request.query,
            "page": 1,
            "pageSize": request.max_results,
            "productTypes": ["medicines"],
        });
        let resp = post_json(&self.client, ctx, SEARCH_URL, &body).await?;
        let page: SearchPage = serde_json::from_value(resp)?;
        debug!(count = page.results.len(), "MHRA products returned");

        let mut records = to_records(page.results);
        records.retain(|r| request.date_range.admits(&r.date));
        records.truncate(request.max_results);
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for MhraProducts {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn product_url(product: &Product) -> String {
    match product.product_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => format!("{BASE_URL}/substance-product/{id}"),
        None => Url::parse_with_params(&format!("{BASE_URL}/search"), [("query", &product.name)])
            .map(String::from)
            .unwrap_or_else(|_| BASE_URL.to_string()),
    }
}

fn to_records(products: Vec<Product>) -> Vec<ResultRecord> {
    products
        .into_iter()
        .enumerate()
        .filter(|(_, p)| !p.name.is_empty())
        .map(|(i, p)| {
            let url = product_url(&p);
            let id = match p.product_id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => format!("mhra-{id}"),
                None => format!("mhra-{i}"),
            };

            let mut summary = Vec::new();
            if !p.active_substances.is_empty() {
                summary.push(format!("Active substances: {}.", p.active_substances.join(", ")));
            }
            if let Some(kind) = &p.product_type {
                summary.push(format!("Product type: {kind}."));
            }
            if let Some(status) = &p.marketing_status {
                summary.push(format!("Status: {status}."));
            }

            ResultRecord::new(id, p.name, url, SOURCE_NAME)
                .with_date(p.authorisation_date.as_deref().unwrap_or_default())
                .with_snippet(&summary.join(" "))
                .with_authors(p.marketing_authorisation_holder)
        })
        .collect()
}
