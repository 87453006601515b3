//! Sitemap discovery for whole-site ingestion.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};

use super::extract::parse_web_url;
use crate::core::errors::RagError;

const SITEMAP_FILE: &str = "sitemap.xml";

fn loc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<(?:[a-z0-9_]+:)?loc>\s*(.*?)\s*</(?:[a-z0-9_]+:)?loc>")
            .expect("static pattern")
    })
}

/// `<loc>` entries of a sitemap document, in document order.
pub fn parse_sitemap(xml: &str) -> Vec<String> {
    loc_pattern()
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

fn unescape_xml(text: &str) -> String {
    let text = text
        .trim()
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>");
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[derive(Clone)]
pub struct SitemapClient {
    client: Client,
}

impl SitemapClient {
    pub fn new(timeout_secs: u64) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| RagError::Configuration(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self { client })
    }

    /// Page URLs listed by `<base_url>/sitemap.xml`.
    ///
    /// A missing sitemap (404) or one without entries yields just the base
    /// URL. A sitemap index is followed one level down.
    pub async fn list_urls(&self, base_url: &str) -> Result<Vec<String>, RagError> {
        let base = parse_web_url(base_url)?;
        let fallback = vec![base_url.trim().trim_end_matches('/').to_string()];

        // join() replaces the last path segment unless the base ends with '/'
        let mut dir = base.clone();
        if !dir.path().ends_with('/') {
            dir.set_path(&format!("{}/", dir.path()));
        }
        let sitemap_url = dir
            .join(SITEMAP_FILE)
            .map_err(|err| RagError::Configuration(format!("invalid URL '{}': {}", base_url, err)))?;

        let Some(xml) = self.fetch(sitemap_url.as_str()).await? else {
            tracing::info!("No sitemap at {}, using the base URL only", sitemap_url);
            return Ok(fallback);
        };

        let mut urls = parse_sitemap(&xml);
        if is_sitemap_index(&xml) {
            let mut pages = Vec::new();
            for nested in urls {
                match self.fetch(&nested).await {
                    Ok(Some(body)) => pages.extend(parse_sitemap(&body)),
                    Ok(None) => tracing::warn!("Nested sitemap {} not found", nested),
                    Err(err) => tracing::warn!("Nested sitemap {} failed: {}", nested, err),
                }
            }
            urls = pages;
        }

        if urls.is_empty() {
            tracing::info!("Sitemap {} lists no pages, using the base URL only", sitemap_url);
            return Ok(fallback);
        }

        tracing::info!("Sitemap {} lists {} pages", sitemap_url, urls.len());
        Ok(urls)
    }

    /// Body of `url`; `None` on 404.
    async fn fetch(&self, url: &str) -> Result<Option<String>, RagError> {
        let response = self.client.get(url).send().await.map_err(RagError::backend)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RagError::Backend(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        response.text().await.map(Some).map_err(RagError::backend)
    }
}
