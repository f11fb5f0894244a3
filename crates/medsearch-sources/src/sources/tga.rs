//! TGA Consumer Medicines Information search.
//!
//! Web: https://www.tga.gov.au/products/consumer-medicines-information/search?query=...
//! There is no public API; the results page is scraped, and it is often fronted
//! by a reCAPTCHA.

use async_trait::async_trait;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::ResultRecord;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use crate::web::{load_page, selector, text_of};

const SEARCH_URL: &str = "https://www.tga.gov.au/products/consumer-medicines-information/search";
const BASE_URL: &str = "https://www.tga.gov.au";

pub const SOURCE_NAME: &str = "TGA - Consumer Medicines Information";

pub struct TgaCmiSearch {
    client: SandboxClient,
}

impl TgaCmiSearch {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let url = Url::parse_with_params(SEARCH_URL, [("query", &request.query)])?;
        let html = load_page(&self.client, ctx, "tga", &url).await?;
        let mut records = parse_results(&html)?;
        records.retain(|r| request.date_range.admits(&r.date));
        records.truncate(request.max_results);
        debug!(count = records.len(), "TGA CMI results parsed");
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for TgaCmiSearch {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn parse_results(html: &str) -> anyhow::Result<Vec<ResultRecord>> {
    let doc = Html::parse_document(html);
    let primary = selector(".view-content .views-row, .search-results .search-result")?;
    let fallback = selector("article, .product-item, .medicine-item")?;
    let title_sel = selector("h2 a, h3 a, .title a, .views-field-title a")?;
    let date_sel = selector(".date, .publication-date, .views-field-field-publication-date")?;
    let snippet_sel = selector(".summary, .description, .views-field-body")?;
    let sponsor_sel = selector(".manufacturer, .sponsor, .views-field-field-sponsor")?;
    let base = Url::parse(BASE_URL)?;

    let mut items: Vec<_> = doc.select(&primary).collect();
    if items.is_empty() {
        items = doc.select(&fallback).collect();
    }

    let mut records = Vec::new();
    for item in items {
        let Some(title_el) = item.select(&title_sel).next() else {
            continue;
        };
        let href = title_el.value().attr("href").unwrap_or_default();
        let url = base.join(href).map(String::from).unwrap_or_else(|_| href.to_string());
        let slug = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string();
        let date = item.select(&date_sel).next().map(text_of).unwrap_or_default();
        let snippet = item.select(&snippet_sel).next().map(text_of).unwrap_or_default();
        let sponsor = item.select(&sponsor_sel).next().map(text_of);

        records.push(
            ResultRecord::new(format!("tga-{slug}"), text_of(title_el), url, SOURCE_NAME)
                .with_date(&date)
                .with_snippet(&snippet)
                .with_authors(sponsor),
        );
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_views_rows() {
        let html = r#"<div class="view-content">
          <div class="views-row">
            <h3><a href="/resources/cmi/panadol-tablets">Panadol Tablets</a></h3>
            <span class="date">12 March 2021</span>
            <div class="summary">Paracetamol 500 mg for pain relief.</div>
            <div class="sponsor">Haleon Australia</div>
          </div>
          <div class="views-row"><h3><a href="https://www.tga.gov.au/resources/cmi/herron/">Herron</a></h3>
            <span class="date">05/07/2020</span></div>
        </div>"#;

        let records = parse_results(html).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "tga-panadol-tablets");
        assert_eq!(records[0].url, "https://www.tga.gov.au/resources/cmi/panadol-tablets");
        assert_eq!(records[0].date, "2021-03-12");
        assert_eq!(records[0].snippet, "Paracetamol 500 mg for pain relief.");
        assert_eq!(records[0].authors, vec!["Haleon Australia"]);
        assert_eq!(records[1].id, "tga-herron");
        assert_eq!(records[1].date, "2020-07-05");
    }

    #[test]
    fn test_article_fallback() {
        let html = r#"<main>
          <article><h2><a href="/resources/cmi/nurofen">Nurofen</a></h2></article>
          <article><p>Promo without a link</p></article>
        </main>"#;
        let records = parse_results(html).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Nurofen");
        assert_eq!(records[0].source, "TGA - Consumer Medicines Information");
    }
}
