//! European Medicines Agency medicine search.
//!
//! Endpoint: https://www.ema.europa.eu/en/medicines/api/medicines?search_api_fulltext=...
//! The endpoint answers with a JSON array, but serves the HTML listing instead
//! when it decides the client is a browser; both are understood.

use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::ResultRecord;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::http::fetch_text;
use crate::web::{selector, text_of};

const SEARCH_URL: &str = "https://www.ema.europa.eu/en/medicines/api/medicines";
const BASE_URL: &str = "https://www.ema.europa.eu";

pub const SOURCE_NAME: &str = "EMA - Medicines";

#[derive(Debug, Deserialize)]
struct Medicine {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    field_authorisation_date: Option<String>,
    field_overview: Option<String>,
    field_therapeutic_area: Option<String>,
    field_authorisation_holder: Option<String>,
}

pub struct EmaMedicines {
    client: SandboxClient,
}

impl EmaMedicines {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let params = [
            ("search_api_fulltext", request.query.clone()),
            ("items_per_page", request.max_results.to_string()),
        ];
        let body = fetch_text(&self.client, ctx, SEARCH_URL, &params).await?;
        let mut records = match serde_json::from_str::<Vec<Medicine>>(&body) {
            Ok(medicines) => to_records(medicines),
            Err(e) => {
                debug!(error = %e, "EMA answered with something other than JSON, parsing HTML");
                parse_listing(&body)?
            }
        };
        records.retain(|r| request.date_range.admits(&r.date));
        records.truncate(request.max_results);
        debug!(count = records.len(), "EMA medicines parsed");
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for EmaMedicines {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn absolute(href: &str) -> String {
    Url::parse(BASE_URL)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

fn record_id(url: &str) -> String {
    let slug = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    format!("ema-{slug}")
}

fn to_records(medicines: Vec<Medicine>) -> Vec<ResultRecord> {
    medicines
        .into_iter()
        .filter(|m| !m.title.is_empty())
        .map(|m| {
            let url = absolute(&m.url);
            let snippet = m
                .field_overview
                .filter(|s| !s.trim().is_empty())
                .or(m.field_therapeutic_area)
                .unwrap_or_default();
            ResultRecord::new(record_id(&url), m.title, url, SOURCE_NAME)
                .with_date(m.field_authorisation_date.as_deref().unwrap_or_default())
                .with_snippet(&snippet)
                .with_authors(m.field_authorisation_holder)
        })
        .collect()
}

/// The medicines listing served as HTML.
fn parse_listing(html: &str) -> anyhow::Result<Vec<ResultRecord>> {
    let doc = Html::parse_document(html);
    let items = selector(".view-medicines .views-row")?;
    let title_sel = selector("h3 a, .views-field-title a")?;
    let date_sel = selector(".field--name-field-authorisation-date, .views-field-field-authorisation-date")?;
    let overview_sel = selector(".field--name-field-overview, .views-field-field-overview")?;
    let area_sel = selector(".field--name-field-therapeutic-area, .views-field-field-therapeutic-area")?;
    let holder_sel = selector(".field--name-field-authorisation-holder, .views-field-field-authorisation-holder")?;

    let mut records = Vec::new();
    for item in doc.select(&items) {
        let Some(title_el) = item.select(&title_sel).next() else {
            continue;
        };
        let url = absolute(title_el.value().attr("href").unwrap_or_default());
        let mut snippet = item.select(&overview_sel).next().map(text_of).unwrap_or_default();
        if snippet.is_empty() {
            snippet = item.select(&area_sel).next().map(text_of).unwrap_or_default();
        }
        let date = item.select(&date_sel).next().map(text_of).unwrap_or_default();
        let holder = item.select(&holder_sel).next().map(text_of);

        records.push(
            ResultRecord::new(record_id(&url), text_of(title_el), url, SOURCE_NAME)
                .with_date(&date)
                .with_snippet(&snippet)
                .with_authors(holder),
        );
    }
    Ok(records)
}
