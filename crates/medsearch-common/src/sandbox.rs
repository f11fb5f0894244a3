use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::MedsearchError;

const USER_AGENT: &str = concat!("medsearch/", env!("CARGO_PKG_VERSION"));

/// An HTTP client that only talks to approved medical-data domains.
/// Adapters receive this instead of a bare `reqwest::Client` so a misconfigured
/// source URL cannot make the search tool fetch arbitrary hosts.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist and a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, MedsearchError> {
        let domains = [
            "eutils.ncbi.nlm.nih.gov", // PubMed E-utilities
            "pubmed.ncbi.nlm.nih.gov", // PubMed web
            "api.fda.gov",             // openFDA
            "accessdata.fda.gov",      // Drugs@FDA
            "ema.europa.eu",           // EMA
            "products.mhra.gov.uk",    // MHRA
            "tga.gov.au",              // TGA
            "api.drugbank.com",        // DrugBank
            "rxnav.nlm.nih.gov",       // RxNav
            "www.ebi.ac.uk",           // ChEMBL
            "swissmedic.ch",           // Swissmedic
            "medsafe.govt.nz",         // Medsafe
            "lakemedelsverket.se",     // Läkemedelsverket
            "2captcha.com",            // CAPTCHA solving service
        ];

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            allowlist: domains.iter().map(|d| d.to_string()).collect(),
        })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    /// Subdomains of an allowed domain are permitted too.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Some(host) = domain_of(url) else {
            return false;
        };
        self.allowlist
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, MedsearchError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, MedsearchError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }

    fn check(&self, url: &str) -> Result<(), MedsearchError> {
        if self.is_allowed(url) {
            Ok(())
        } else {
            Err(MedsearchError::Security(format!(
                "domain not in allowlist for URL {url}"
            )))
        }
    }
}

/// Host part of a URL, used as the rate-limiting key.
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_accepts_subdomains() {
        let client = SandboxClient::new(Duration::from_secs(5)).unwrap();
        assert!(client.is_allowed("https://api.fda.gov/drug/label.json"));
        assert!(client.is_allowed("https://www.tga.gov.au/search"));
        assert!(!client.is_allowed("https://evil.example.com/"));
        assert!(!client.is_allowed("not a url"));
    }

    #[test]
    fn test_blocked_url_is_security_error() {
        let client = SandboxClient::new(Duration::from_secs(5)).unwrap();
        let err = client.get("https://example.org/").unwrap_err();
        assert!(matches!(err, MedsearchError::Security(_)));
    }

    #[test]
    fn test_allow_domain_extends_policy() {
        let mut client = SandboxClient::new(Duration::from_secs(5)).unwrap();
        client.allow_domain("localhost");
        assert!(client.is_allowed("http://localhost:8080/api"));
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://api.fda.gov/drug/").as_deref(), Some("api.fda.gov"));
        assert_eq!(domain_of("garbage"), None);
    }
}
