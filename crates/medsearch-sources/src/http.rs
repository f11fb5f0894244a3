//! Rate-limited HTTP helpers shared by the API adapters.

use anyhow::Context;
use medsearch_access::StrategyContext;
use medsearch_common::sandbox::{domain_of, SandboxClient};
use reqwest::{RequestBuilder, Response};
use tracing::debug;

/// Send `request`, built for `url`, once the source's rate limit allows it.
/// The response status is not checked.
pub async fn send(ctx: &StrategyContext, url: &str, request: RequestBuilder) -> anyhow::Result<Response> {
    let domain = domain_of(url).with_context(|| format!("no host in {url}"))?;
    ctx.throttle(&domain).await;
    debug!(source_id = %ctx.source_id, %url, "Sending request");
    Ok(request.timeout(ctx.config.timeout()).send().await?)
}

pub async fn get(
    client: &SandboxClient,
    ctx: &StrategyContext,
    url: &str,
    query: &[(&str, String)],
) -> anyhow::Result<Response> {
    send(ctx, url, client.get(url)?.query(query)).await
}

pub async fn fetch_json(
    client: &SandboxClient,
    ctx: &StrategyContext,
    url: &str,
    query: &[(&str, String)],
) -> anyhow::Result<serde_json::Value> {
    let resp = get(client, ctx, url, query).await?.error_for_status()?;
    Ok(resp.json().await?)
}

pub async fn fetch_text(
    client: &SandboxClient,
    ctx: &StrategyContext,
    url: &str,
    query: &[(&str, String)],
) -> anyhow::Result<String> {
    let resp = get(client, ctx, url, query).await?.error_for_status()?;
    Ok(resp.text().await?)
}

pub async fn post_json(
    client: &SandboxClient,
    ctx: &StrategyContext,
    url: &str,
    body: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let resp = send(ctx, url, client.post(url)?.json(body)).await?.error_for_status()?;
    Ok(resp.json().await?)
}
