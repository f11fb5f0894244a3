//! openFDA drug labels.
//!
//! Endpoint: https://api.fda.gov/drug/label.json
//! Search matches generic, brand and substance names; the date range filters
//! on the label's `effective_time` (YYYYMMDD).

use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::{DateRange, ResultRecord};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::http::get;

const LABEL_URL: &str = "https://api.fda.gov/drug/label.json";
const OVERVIEW_URL: &str = "https://www.accessdata.fda.gov/scripts/cder/daf/index.cfm?event=overview.process";

pub const SOURCE_NAME: &str = "FDA - Drugs";

pub struct OpenFdaLabels {
    client: SandboxClient,
}

impl OpenFdaLabels {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let params = [
            ("search", search_expression(&request.query, &request.date_range)),
            ("limit", request.max_results.to_string()),
        ];
        let resp = get(&self.client, ctx, LABEL_URL, &params).await?;
        // openFDA answers a search with no matches with 404 NOT_FOUND.
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("openFDA returned no matches");
            return Ok(vec![]);
        }
        let body: Value = resp.error_for_status()?.json().await?;
        let records = parse_labels(&body);
        debug!(count = records.len(), "openFDA labels parsed");
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for OpenFdaLabels {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn search_expression(query: &str, date_range: &DateRange) -> String {
    let term = query.trim().replace('"', "");
    let term = if term.contains(char::is_whitespace) { format!("\"{term}\"") } else { term };
    let mut expr = format!("(openfda.generic_name:{term} OR openfda.brand_name:{term} OR openfda.substance_name:{term})");
    if !date_range.is_unbounded() {
        let (min, max) = date_range.format_bounds("%Y%m%d");
        expr.push_str(&format!(" AND effective_time:[{min} TO {max}]"));
    }
    expr
}

fn first(value: &Value, field: &str) -> String {
    match &value[field] {
        Value::Array(items) => items.first().and_then(Value::as_str).unwrap_or_default().to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn parse_labels(body: &Value) -> Vec<ResultRecord> {
    let Some(results) = body["results"].as_array() else {
        return vec![];
    };

    results
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let openfda = &label["openfda"];
            let brand = first(openfda, "brand_name");
            let generic = first(openfda, "generic_name");
            let title = [brand, generic]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| "Unnamed Drug".to_string());

            let application = first(openfda, "application_number");
            let (id, url) = if application.is_empty() {
                let set_id = label["set_id"].as_str().or_else(|| label["id"].as_str());
                (format!("fda-{}", set_id.map_or_else(|| i.to_string(), String::from)), OVERVIEW_URL.to_string())
            } else {
                (format!("fda-{application}"), format!("{OVERVIEW_URL}&ApplNo={application}"))
            };

            let mut description = first(label, "description");
            if description.is_empty() {
                description = first(label, "indications_and_usage");
            }
            let manufacturer = first(openfda, "manufacturer_name");

            ResultRecord::new(id, title, url, SOURCE_NAME)
                .with_date(label["effective_time"].as_str().unwrap_or_default())
                .with_snippet(&description)
                .with_authors((!manufacturer.is_empty()).then_some(manufacturer))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_search_expression_with_dates() {
        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
        assert_eq!(
            search_expression("paracetamol", &range),
            "(openfda.generic_name:paracetamol OR openfda.brand_name:paracetamol OR openfda.substance_name:paracetamol) AND effective_time:[20200101 TO 20201231]"
        );
        assert!(search_expression("folic acid", &DateRange::unbounded()).contains("generic_name:\"folic acid\""));
    }

    #[test]
    fn test_parse_labels() {
        let body = json!({
            "results": [
                {
                    "effective_time": "20230115",
                    "description": ["Acetaminophen 500 mg tablets."],
                    "openfda": {
                        "brand_name": ["Tylenol"],
                        "generic_name": ["ACETAMINOPHEN"],
                        "application_number": ["NDA019872"],
                        "manufacturer_name": ["Kenvue"]
                    }
                },
                {
                    "set_id": "abc-123",
                    "indications_and_usage": ["Temporarily relieves minor aches."],
                    "openfda": {}
                }
            ]
        });

        let records = parse_labels(&body);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "fda-NDA019872");
        assert_eq!(records[0].title, "Tylenol");
        assert_eq!(records[0].date, "2023-01-15");
        assert_eq!(records[0].authors, vec!["Kenvue"]);
        assert!(records[0].url.ends_with("&ApplNo=NDA019872"));

        assert_eq!(records[1].id, "fda-abc-123");
        assert_eq!(records[1].title, "Unnamed Drug");
        assert_eq!(records[1].snippet, "Temporarily relieves minor aches.");
        assert!(records[1].authors.is_empty());
    }

    #[test]
    fn test_missing_results_is_empty() {
        assert!(parse_labels(&json!({"error": {"code": "NOT_FOUND"}})).is_empty());
    }
}
