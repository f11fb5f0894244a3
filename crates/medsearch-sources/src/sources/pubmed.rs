//! PubMed: E-utilities API and the public web search.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!   web:     https://pubmed.ncbi.nlm.nih.gov/?term=...

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use medsearch_access::{AccessStrategy, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::{DateRange, ResultRecord};
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::Html;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::http::{fetch_json, fetch_text};
use crate::web::{load_page, selector, text_of};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL:  &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
const WEB_URL:     &str = "https://pubmed.ncbi.nlm.nih.gov/";
const TOOL: &str = "medsearch";

pub const SOURCE_NAME: &str = "PubMed";

fn article_url(pmid: &str) -> String {
    format!("{WEB_URL}{pmid}/")
}

// ── API ───────────────────────────────────────────────────────────────────────

pub struct PubMedApi {
    client: SandboxClient,
    api_key: Option<SecretString>,
}

impl PubMedApi {
    pub fn new(client: SandboxClient, api_key: Option<SecretString>) -> Self {
        Self { client, api_key }
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("tool", TOOL.to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.expose_secret().to_string()));
        }
        params
    }

    /// Search PubMed and return a list of PMIDs.
    #[instrument(skip(self, ctx, date_range))]
    async fn esearch(
        &self,
        ctx: &StrategyContext,
        query: &str,
        max: usize,
        date_range: &DateRange,
    ) -> anyhow::Result<Vec<String>> {
        let mut params = self.base_params();
        params.push(("term", query.to_string()));
        params.push(("retmax", max.to_string()));
        params.push(("retmode", "json".to_string()));
        if !date_range.is_unbounded() {
            let (min, max) = date_range.format_bounds("%Y/%m/%d");
            params.push(("mindate", min));
            params.push(("maxdate", max));
            params.push(("datetype", "pdat".to_string()));
        }

        let resp = fetch_json(&self.client, ctx, ESEARCH_URL, &params).await?;
        if let Some(err) = resp["esearchresult"]["ERROR"].as_str() {
            bail!("esearch error: {err}");
        }
        let ids: Vec<String> = resp["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        debug!(count = ids.len(), "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    /// Fetch PubMed XML for a list of PMIDs.
    #[instrument(skip(self, ctx))]
    async fn efetch(&self, ctx: &StrategyContext, pmids: &[String]) -> anyhow::Result<Vec<ResultRecord>> {
        if pmids.is_empty() {
            return Ok(vec![]);
        }
        let mut params = self.base_params();
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let xml = fetch_text(&self.client, ctx, EFETCH_URL, &params).await?;
        parse_pubmed_xml(&xml)
    }

    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let pmids = self
            .esearch(ctx, &request.query, request.max_results, &request.date_range)
            .await
            .context("esearch failed")?;
        let mut records = self.efetch(ctx, &pmids).await.context("efetch failed")?;
        records.truncate(request.max_results);
        Ok(records)
    }
}

#[async_trait]
impl AccessStrategy for PubMedApi {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

#[derive(Default)]
struct Article {
    pmid: Option<String>,
    title: String,
    abstract_text: String,
    authors: Vec<String>,
    year: String,
    month: String,
    day: String,
    medline_date: String,
}

impl Article {
    fn into_record(self) -> Option<ResultRecord> {
        let pmid = self.pmid?;
        let date = if self.year.is_empty() {
            self.medline_date.get(..4).map(|y| pubmed_date(y, "", "")).unwrap_or_default()
        } else {
            pubmed_date(&self.year, &self.month, &self.day)
        };
        let mut record = ResultRecord::new(format!("pubmed-{pmid}"), self.title, article_url(&pmid), SOURCE_NAME)
            .with_snippet(&self.abstract_text)
            .with_authors(self.authors);
        record.date = date;
        Some(record)
    }
}

fn append(dst: &mut String, text: &str) {
    if !dst.is_empty() {
        dst.push(' ');
    }
    dst.push_str(text);
}

/// Parse efetch XML (`<PubmedArticleSet><PubmedArticle>…`) into records.
fn parse_pubmed_xml(xml: &str) -> anyhow::Result<Vec<ResultRecord>> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<Article> = None;
    // Element names from the article root down to the current node.
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut last_name = String::new();
    let mut fore_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"PubmedArticle" => current = Some(Article::default()),
                    b"Author" => {
                        last_name.clear();
                        fore_name.clear();
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(article) = current.as_mut() {
                    let inside = |tag: &[u8]| path.iter().any(|p| p.as_slice() == tag);
                    match path.last().map(Vec::as_slice) {
                        Some(b"PMID") if article.pmid.is_none() && inside(b"MedlineCitation") => {
                            article.pmid = Some(text);
                        }
                        Some(b"LastName") => last_name = text,
                        Some(b"ForeName") => fore_name = text,
                        Some(b"Year") if inside(b"PubDate") => article.year = text,
                        Some(b"Month") if inside(b"PubDate") => article.month = text,
                        Some(b"Day") if inside(b"PubDate") => article.day = text,
                        Some(b"MedlineDate") => article.medline_date = text,
                        _ if inside(b"ArticleTitle") => append(&mut article.title, &text),
                        _ if inside(b"AbstractText") => append(&mut article.abstract_text, &text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                match e.name().as_ref() {
                    b"Author" => {
                        if let Some(article) = current.as_mut() {
                            let name = if fore_name.is_empty() {
                                last_name.clone()
                            } else {
                                format!("{fore_name} {last_name}")
                            };
                            if !name.is_empty() {
                                article.authors.push(name);
                            }
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(article) = current.take() {
                            if article.title.is_empty() {
                                warn!("Skipping article with empty title");
                            } else if let Some(record) = article.into_record() {
                                records.push(record);
                            }
                        }
                    }
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("PubMed XML parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

/// ISO date from PubMed's split date fields; missing month or day default to 01.
/// Months come either as numbers or as English abbreviations.
pub fn pubmed_date(year: &str, month: &str, day: &str) -> String {
    const MONTHS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
    let Ok(y) = year.trim().parse::<i32>() else {
        return String::new();
    };
    let month = month.trim().to_lowercase();
    let m = month.parse::<u32>().ok().or_else(|| {
        let abbr = month.get(..3)?;
        MONTHS.iter().position(|m| *m == abbr).map(|i| i as u32 + 1)
    });
    let d = day.trim().parse::<u32>().ok();
    NaiveDate::from_ymd_opt(y, m.unwrap_or(1), d.unwrap_or(1))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

// ── Web search ────────────────────────────────────────────────────────────────

/// Scrapes the PubMed results page, through a browser session when one is
/// available and over plain HTTP otherwise.
pub struct PubMedBrowser {
    client: SandboxClient,
}

impl PubMedBrowser {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, request, ctx), fields(query = %request.query))]
    async fn run(&self, request: &SearchRequest, ctx: &StrategyContext) -> anyhow::Result<Vec<ResultRecord>> {
        let url = search_url(&request.query, &request.date_range)?;
        let html = load_page(&self.client, ctx, "pubmed", &url).await?;
        parse_search_page(&html, request.max_results)
    }
}

#[async_trait]
impl AccessStrategy for PubMedBrowser {
    async fn search(&self, request: &SearchRequest, ctx: &StrategyContext) -> StrategyResult {
        StrategyResult::from_result(self.run(request, ctx).await)
    }
}

fn search_url(query: &str, date_range: &DateRange) -> anyhow::Result<Url> {
    let mut params = vec![("term", query.to_string())];
    if !date_range.is_unbounded() {
        let (min, max) = date_range.format_bounds("%Y/%m/%d");
        params.push(("filter", format!("dates.custom:{min}-{max}")));
    }
    Ok(Url::parse_with_params(WEB_URL, &params)?)
}

/// Extract result entries from a PubMed search results page.
fn parse_search_page(html: &str, max_results: usize) -> anyhow::Result<Vec<ResultRecord>> {
    let doc = Html::parse_document(html);
    let items = selector(".docsum-content, .results-article")?;
    let title_sel = selector(".docsum-title, .title")?;
    let link_sel = selector("a")?;
    let date_sel = selector(".docsum-journal-citation date, .pub-date")?;
    let snippet_sel = selector(".full-view-snippet, .abstract")?;
    let citation_sel = selector(".docsum-journal-citation, .citation")?;
    let authors_sel = selector(".docsum-authors, .authors")?;

    let mut records = Vec::new();
    for (i, item) in doc.select(&items).take(max_results).enumerate() {
        let title_el = item.select(&title_sel).next();
        let title = title_el.map(text_of).unwrap_or_default();
        let href = title_el
            .and_then(|t| {
                if t.value().name() == "a" {
                    Some(t)
                } else {
                    t.select(&link_sel).next()
                }
            })
            .and_then(|a| a.value().attr("href"));
        let pmid = href
            .map(|h| h.trim_matches('/').rsplit('/').next().unwrap_or_default().to_string())
            .filter(|p| !p.is_empty());

        let (id, url) = match &pmid {
            Some(p) => (format!("pubmed-{p}"), article_url(p)),
            None => (format!("pubmed-{i}"), String::new()),
        };

        let mut snippet = item.select(&snippet_sel).next().map(text_of).unwrap_or_default();
        if snippet.is_empty() {
            snippet = item.select(&citation_sel).next().map(text_of).unwrap_or_default();
        }
        let authors: Vec<String> = item
            .select(&authors_sel)
            .next()
            .map(text_of)
            .map(|a| a.split(',').map(|s| s.trim().trim_end_matches('.').to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let date = item.select(&date_sel).next().map(text_of).unwrap_or_default();

        records.push(
            ResultRecord::new(id, title, url, SOURCE_NAME)
                .with_date(&date)
                .with_snippet(&snippet)
                .with_authors(authors),
        );
    }

    debug!(count = records.len(), "Parsed PubMed results page");
    Ok(records)
}
