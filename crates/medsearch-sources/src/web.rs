//! Loading public search pages for the browser strategies.
//!
//! A page is loaded through a browser session when the context offers a
//! launcher, and over plain HTTP otherwise. Either way a reCAPTCHA challenge is
//! handed to the configured solver and the token submitted back to the site.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context};
use medsearch_access::{BrowserLauncher, BrowserSession, CaptchaChallenge, CaptchaSolver, StrategyContext};
use medsearch_common::sandbox::SandboxClient;
use scraper::{ElementRef, Html, Selector};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::http::fetch_text;

/// Form field reCAPTCHA reads the solution token from.
const TOKEN_FIELD: &str = "g-recaptcha-response";
const SUBMIT_SELECTOR: &str = "form [type=submit]";
const CAPTCHA_MARKERS: [&str; 3] = ["captcha", "cf-challenge", "challenge-form"];

/// HTML of `url`, past any CAPTCHA the site puts in front of it.
pub async fn load_page(
    client: &SandboxClient,
    ctx: &StrategyContext,
    profile: &str,
    url: &Url,
) -> anyhow::Result<String> {
    match &ctx.browser {
        Some(launcher) => load_in_browser(launcher.as_ref(), ctx, profile, url).await,
        None => load_over_http(client, ctx, url).await,
    }
}

async fn load_over_http(client: &SandboxClient, ctx: &StrategyContext, url: &Url) -> anyhow::Result<String> {
    let page = fetch_text(client, ctx, url.as_str(), &[]).await?;
    if !looks_like_captcha(&page) {
        return Ok(page);
    }
    info!(%url, "CAPTCHA detected");
    let solver = ctx.captcha.as_ref().context("CAPTCHA required but no solver is configured")?;
    let site_key = captcha_site_key(&page).context("CAPTCHA page has no site key")?;
    let token = solve(solver.as_ref(), site_key, url).await?;

    let page = fetch_text(client, ctx, url.as_str(), &[(TOKEN_FIELD, token)]).await?;
    if looks_like_captcha(&page) {
        bail!("CAPTCHA still present after submitting the solution");
    }
    Ok(page)
}

async fn load_in_browser(
    launcher: &dyn BrowserLauncher,
    ctx: &StrategyContext,
    profile: &str,
    url: &Url,
) -> anyhow::Result<String> {
    let mut guard = SessionGuard(Some(launcher.launch(profile).await?));
    let html = match guard.0.as_deref_mut() {
        Some(session) => browse(session, ctx, url).await,
        None => bail!("browser session already closed"),
    };
    guard.close().await;
    html
}

async fn browse(session: &mut dyn BrowserSession, ctx: &StrategyContext, url: &Url) -> anyhow::Result<String> {
    let domain = url.host_str().context("page URL has no host")?;
    ctx.throttle(domain).await;
    if !session.navigate(url.as_str()).await? {
        bail!("failed to load {url}");
    }
    sleep(ctx.config.wait_time()).await;

    let page = session.page_source().await?;
    if !looks_like_captcha(&page) {
        return Ok(page);
    }
    info!(%url, "CAPTCHA detected, attempting to solve");
    let solved = match (&ctx.captcha, captcha_site_key(&page)) {
        (Some(solver), Some(site_key)) => {
            let token = solve(solver.as_ref(), site_key, url).await?;
            let fields = HashMap::from([(TOKEN_FIELD.to_string(), token)]);
            ctx.throttle(domain).await;
            session.fill_form(&fields).await? && session.click(SUBMIT_SELECTOR).await?
        }
        _ => session.solve_captcha().await?,
    };
    if !solved {
        bail!("CAPTCHA could not be solved");
    }
    sleep(ctx.config.wait_time()).await;
    session.page_source().await
}

async fn solve(solver: &dyn CaptchaSolver, site_key: String, url: &Url) -> anyhow::Result<String> {
    let challenge = CaptchaChallenge { site_key, page_url: url.to_string() };
    let limit = solver.timeout();
    timeout(limit, solver.solve(&challenge))
        .await
        .with_context(|| format!("CAPTCHA not solved within {}s", limit.as_secs()))?
}

/// Closes the session it holds when dropped without [`close`](Self::close),
/// e.g. when the strategy's future is cancelled by a timeout.
struct SessionGuard(Option<Box<dyn BrowserSession>>);

impl SessionGuard {
    async fn close(mut self) {
        if let Some(mut session) = self.0.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to close browser session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Closing abandoned browser session");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(error = %e, "Failed to close abandoned browser session");
                    }
                });
            }
            Err(_) => warn!("Browser session dropped outside a runtime; left open"),
        }
    }
}

pub fn looks_like_captcha(html: &str) -> bool {
    let lower = html.to_lowercase();
    CAPTCHA_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {css:?}: {e:?}"))
}

/// Text content of `el` with whitespace runs collapsed.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The reCAPTCHA site key embedded in a challenge page.
pub fn captcha_site_key(html: &str) -> Option<String> {
    let sel = Selector::parse("[data-sitekey]").ok()?;
    Html::parse_document(html)
        .select(&sel)
        .find_map(|el| el.value().attr("data-sitekey"))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(String::from)
}
