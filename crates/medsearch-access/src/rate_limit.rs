//! Per-domain request rate limiting.
//!
//! Each domain keeps the timestamps of its requests in the trailing 60-second
//! window. Domains are limited independently: a source waiting on its own
//! domain never holds up requests to any other domain.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Width of the sliding window the per-minute limit applies to.
pub const WINDOW: Duration = Duration::from_secs(60);

type Window = Arc<tokio::sync::Mutex<VecDeque<Instant>>>;

#[derive(Debug, Default)]
pub struct RateLimiter {
    domains: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn window(&self, domain: &str) -> Window {
        let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);
        domains.entry(domain.to_string()).or_default().clone()
    }

    /// Wait until one more request to `domain` stays within `requests_per_minute`.
    ///
    /// The first request to a domain never waits. A limit of zero is treated as one.
    /// This only checks the window; pair it with [`record_request`](Self::record_request),
    /// or use [`acquire`](Self::acquire) when callers may share the domain.
    pub async fn wait_if_needed(&self, domain: &str, requests_per_minute: u32) {
        let window = self.window(domain);
        let mut stamps = window.lock().await;
        wait_for_slot(&mut stamps, domain, requests_per_minute).await;
    }

    /// Wait for a slot on `domain` and take it before releasing the domain's lock.
    ///
    /// Concurrent callers for the same domain are served one at a time, so the
    /// window never holds more than `requests_per_minute` requests.
    pub async fn acquire(&self, domain: &str, requests_per_minute: u32) {
        let window = self.window(domain);
        let mut stamps = window.lock().await;
        wait_for_slot(&mut stamps, domain, requests_per_minute).await;
        stamps.push_back(Instant::now());
        debug!(domain, in_window = stamps.len(), "Request slot taken");
    }

    /// Record that a request to `domain` was just issued.
    pub async fn record_request(&self, domain: &str) {
        let window = self.window(domain);
        let mut stamps = window.lock().await;
        stamps.push_back(Instant::now());
        debug!(domain, in_window = stamps.len(), "Request recorded");
    }

    /// Number of requests to `domain` inside the current window.
    pub async fn recent_requests(&self, domain: &str) -> usize {
        let window = self.window(domain);
        let mut stamps = window.lock().await;
        prune(&mut stamps, Instant::now());
        stamps.len()
    }
}

async fn wait_for_slot(stamps: &mut VecDeque<Instant>, domain: &str, requests_per_minute: u32) {
    let limit = requests_per_minute.max(1) as usize;
    loop {
        let now = Instant::now();
        prune(stamps, now);
        if stamps.len() < limit {
            return;
        }
        let Some(&oldest) = stamps.front() else {
            return;
        };
        let wait = WINDOW.saturating_sub(now.duration_since(oldest));
        info!(domain, wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
        sleep(wait).await;
    }
}

/// Drop timestamps that have aged out of the window.
fn prune(stamps: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = stamps.front() {
        if now.duration_since(front) >= WINDOW {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_never_waits() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.wait_if_needed("api.fda.gov", 1).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_request_waits_for_window() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.wait_if_needed("eutils.ncbi.nlm.nih.gov", 5).await;
            limiter.record_request("eutils.ncbi.nlm.nih.gov").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.wait_if_needed("eutils.ncbi.nlm.nih.gov", 5).await;
        assert!(start.elapsed() >= WINDOW);
        assert!(limiter.recent_requests("eutils.ncbi.nlm.nih.gov").await < 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let limiter = RateLimiter::new();
        limiter.wait_if_needed("a.example", 1).await;
        limiter.record_request("a.example").await;

        let start = Instant::now();
        limiter.wait_if_needed("b.example", 1).await;
        limiter.record_request("b.example").await;
        limiter.wait_if_needed("b.example", 5).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_requests_age_out() {
        let limiter = RateLimiter::new();
        limiter.record_request("d").await;
        limiter.record_request("d").await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.recent_requests("d").await, 0);

        let start = Instant::now();
        limiter.wait_if_needed("d", 2).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_window_blocks_only_its_domain() {
        let limiter = RateLimiter::new();
        limiter.record_request("www.ema.europa.eu").await;

        let mut blocked = tokio_test::task::spawn(limiter.wait_if_needed("www.ema.europa.eu", 1));
        tokio_test::assert_pending!(blocked.poll());

        let mut other = tokio_test::task::spawn(limiter.wait_if_needed("products.mhra.gov.uk", 1));
        tokio_test::assert_ready!(other.poll());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(blocked.is_woken());
        tokio_test::assert_ready!(blocked.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_respects_limit() {
        let limiter = Arc::new(RateLimiter::new());
        let start = Instant::now();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            tasks.spawn(async move {
                limiter.acquire("www.tga.gov.au", 1).await;
                let sent = start.elapsed();
                sleep(Duration::from_secs(1)).await;
                sent
            });
        }

        let mut sent = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            sent.push(joined.unwrap());
        }
        sent.sort();

        assert_eq!(sent[0], Duration::ZERO);
        assert!(sent[1] >= WINDOW);
        assert!(sent[2] >= WINDOW * 2);
        assert_eq!(limiter.recent_requests("www.tga.gov.au").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_counts_the_request() {
        let limiter = RateLimiter::new();
        limiter.acquire("rxnav.nlm.nih.gov", 2).await;
        limiter.acquire("rxnav.nlm.nih.gov", 2).await;
        assert_eq!(limiter.recent_requests("rxnav.nlm.nih.gov").await, 2);

        let start = Instant::now();
        limiter.acquire("rxnav.nlm.nih.gov", 2).await;
        assert!(start.elapsed() >= WINDOW);
    }
}
