//! Data models shared by the access core and the source adapters.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MedsearchError;

/// Snippets longer than this many characters are cut and suffixed with `...`.
pub const SNIPPET_MAX_CHARS: usize = 300;

/// Score assumed for records whose adapter did not provide one.
pub const DEFAULT_RELEVANCE: f64 = 0.5;

// ── Result record ─────────────────────────────────────────────────────────────

/// One item retrieved from a source.
///
/// Serialized with camelCase keys so the JSON output matches what the result
/// viewer and earlier result files expect (`relevanceScore`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    /// Unique within a source; collisions across sources are tolerated.
    pub id: String,
    pub title: String,
    pub url: String,
    /// Human-readable source name, e.g. "PubMed" or "FDA - Drugs".
    pub source: String,
    /// ISO `YYYY-MM-DD`, or empty when the source date could not be parsed.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub relevance_score: Option<f64>,
}

impl ResultRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            source: source.into(),
            date: String::new(),
            snippet: String::new(),
            authors: Vec::new(),
            relevance_score: None,
        }
    }

    /// Set the date from a raw source string. Unrecognised formats leave it empty.
    pub fn with_date(mut self, raw: &str) -> Self {
        self.date = normalise_date(raw).unwrap_or_default();
        self
    }

    pub fn with_snippet(mut self, text: &str) -> Self {
        self.snippet = truncate_snippet(text);
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    /// Effective relevance: the adapter's score, or 0.5 when absent or not a finite number.
    pub fn relevance(&self) -> f64 {
        match self.relevance_score {
            Some(s) if s.is_finite() => s,
            _ => DEFAULT_RELEVANCE,
        }
    }
}

/// Accepts any JSON value for `relevanceScore`; anything but a finite number becomes `None`.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()).filter(|s| s.is_finite()))
}

/// Cut `text` to [`SNIPPET_MAX_CHARS`] characters, appending `...` when truncated.
pub fn truncate_snippet(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Normalise the date formats seen across sources to ISO `YYYY-MM-DD`.
pub fn normalise_date(raw: &str) -> Option<String> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%Y %b %d", "%d %B %Y", "%d/%m/%Y"];
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

// ── Date range ────────────────────────────────────────────────────────────────

/// Optional publication-date bounds; an absent bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl DateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Parse ISO `YYYY-MM-DD` bounds. Malformed dates or `min > max` are rejected.
    pub fn parse(min_date: Option<&str>, max_date: Option<&str>) -> crate::Result<Self> {
        let parse = |label: &str, raw: Option<&str>| -> crate::Result<Option<NaiveDate>> {
            match raw.map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Some).map_err(|e| {
                    MedsearchError::InvalidRequest(format!("{label} '{s}' is not YYYY-MM-DD: {e}"))
                }),
            }
        };
        let range = Self {
            min_date: parse("min date", min_date)?,
            max_date: parse("max date", max_date)?,
        };
        if let (Some(min), Some(max)) = (range.min_date, range.max_date) {
            if min > max {
                return Err(MedsearchError::InvalidRequest(format!(
                    "date range is inverted: {min} is after {max}"
                )));
            }
        }
        Ok(range)
    }

    pub fn is_unbounded(&self) -> bool {
        self.min_date.is_none() && self.max_date.is_none()
    }

    /// Concrete bounds for APIs that need both ends: 1900-01-01 and today stand in for open sides.
    pub fn bounds_or_defaults(&self) -> (NaiveDate, NaiveDate) {
        let min = self
            .min_date
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN));
        let max = self.max_date.unwrap_or_else(|| Utc::now().date_naive());
        (min, max)
    }

    /// Whether an ISO `YYYY-MM-DD` date falls inside the range. Records with an
    /// empty or unparseable date are kept.
    pub fn admits(&self, date: &str) -> bool {
        let Ok(date) = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") else {
            return true;
        };
        self.min_date.map_or(true, |min| date >= min) && self.max_date.map_or(true, |max| date <= max)
    }

    /// Format both bounds with a chrono format string, filling open sides with defaults.
    pub fn format_bounds(&self, fmt: &str) -> (String, String) {
        let (min, max) = self.bounds_or_defaults();
        (min.format(fmt).to_string(), max.format(fmt).to_string())
    }
}

// ── Strategy names ────────────────────────────────────────────────────────────

/// The retrieval methods a source may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Api,
    Browser,
    Selenium,
    BrowserAutomation,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Api,
        StrategyKind::Browser,
        StrategyKind::Selenium,
        StrategyKind::BrowserAutomation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Api               => "api",
            StrategyKind::Browser           => "browser",
            StrategyKind::Selenium          => "selenium",
            StrategyKind::BrowserAutomation => "browser_automation",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = MedsearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| MedsearchError::Config(format!("unknown access strategy '{s}'")))
    }
}
