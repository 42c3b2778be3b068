//! Web search augmentation. Every public entry point is total: failures,
//! timeouts and unknown providers all come back as an empty list.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use threadlens_logging::{lens_debug, lens_warn};
use url::Url;

use crate::decode::decode_text;
use crate::secrets::SecretVault;
use crate::SearchResult;

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_QUERY_LENGTH: usize = 240;
const RESULT_BASE: &str = "https://duckduckgo.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub timeout_ms: u64,
    pub default_limit: usize,
    pub default_provider: String,
    pub primary_endpoint: String,
    pub secondary_endpoint: String,
    /// Vault entry holding the secondary provider's API key.
    pub secondary_credential: String,
    pub user_agent: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            default_limit: DEFAULT_SEARCH_LIMIT,
            default_provider: "primary".to_string(),
            primary_endpoint: "https://html.duckduckgo.com/html/".to_string(),
            secondary_endpoint: "https://api.exa.ai".to_string(),
            secondary_credential: "exaApiKey".to_string(),
            user_agent: concat!("threadlens/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub limit: usize,
    pub provider: String,
    pub timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            provider: "primary".to_string(),
            timeout: Duration::from_millis(8_000),
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProvider {
    /// Keyless HTML results page.
    Primary,
    /// Keyed JSON API.
    Secondary,
}

impl SearchProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "primary" | "duckduckgo" | "ddg" => Some(SearchProvider::Primary),
            "secondary" | "exa" => Some(SearchProvider::Secondary),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SearchError {
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct SearchAugmenter {
    client: reqwest::Client,
    vault: SecretVault,
    settings: SearchSettings,
}

impl SearchAugmenter {
    pub fn new(settings: SearchSettings, vault: SecretVault) -> Self {
        let client = match reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                lens_warn!("search client misconfigured, falling back to defaults: {err}");
                reqwest::Client::default()
            }
        };
        Self {
            client,
            vault,
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Options seeded from the configured defaults.
    pub fn default_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.settings.default_limit,
            provider: self.settings.default_provider.clone(),
            timeout: Duration::from_millis(self.settings.timeout_ms),
        }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() || options.limit == 0 {
            return Vec::new();
        }
        let Some(provider) = SearchProvider::parse(&options.provider) else {
            lens_warn!("Unsupported search provider {:?}", options.provider);
            return Vec::new();
        };

        let request = async {
            match provider {
                SearchProvider::Primary => self.query_primary(query, options.limit).await,
                SearchProvider::Secondary => self.query_secondary(query, options.limit).await,
            }
        };

        match tokio::time::timeout(options.timeout, request).await {
            Ok(Ok(results)) => {
                let results = dedupe_by_url(results, options.limit);
                lens_debug!("Search {:?} returned {} results", provider, results.len());
                results
            }
            Ok(Err(err)) => {
                lens_warn!("Search via {:?} failed: {}", provider, err);
                Vec::new()
            }
            Err(_) => {
                lens_warn!("Search via {:?} timed out after {:?}", provider, options.timeout);
                Vec::new()
            }
        }
    }

    async fn query_primary(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let mut url = Url::parse(&self.settings.primary_endpoint)
            .map_err(|err| SearchError::Endpoint(err.to_string()))?;
        url.query_pairs_mut().append_pair("q", query);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        let page = decode_text(&bytes, content_type.as_deref());
        Ok(parse_primary_results(&page.text, limit))
    }

    async fn query_secondary(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let Some(api_key) = self.vault.get(&self.settings.secondary_credential) else {
            lens_debug!(
                "No {} credential stored, skipping secondary search",
                self.settings.secondary_credential
            );
            return Ok(Vec::new());
        };

        let endpoint = format!("{}/search", self.settings.secondary_endpoint.trim_end_matches('/'));
        let body = SecondaryRequest {
            query,
            num_results: limit,
            contents: SecondaryContents { highlights: true },
        };
        let response = self
            .client
            .post(&endpoint)
            .header("x-api-key", api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        let payload: SecondaryResponse = response.json().await?;
        Ok(payload
            .results
            .into_iter()
            .take(limit)
            .filter_map(SecondaryHit::into_result)
            .collect())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecondaryRequest<'a> {
    query: &'a str,
    num_results: usize,
    contents: SecondaryContents,
}

#[derive(Debug, Serialize)]
struct SecondaryContents {
    highlights: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SecondaryResponse {
    #[serde(default)]
    results: Vec<SecondaryHit>,
}

#[derive(Debug, Default, Deserialize)]
struct SecondaryHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    highlights: Option<Vec<String>>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl SecondaryHit {
    fn into_result(self) -> Option<SearchResult> {
        let url = self.url.map(|url| url.trim().to_string()).filter(|url| !url.is_empty())?;
        let highlights = self
            .highlights
            .map(|parts| compact_whitespace(&parts.join(" ")))
            .filter(|joined| !joined.is_empty());
        let snippet = highlights
            .or_else(|| self.snippet.map(|s| compact_whitespace(&s)).filter(|s| !s.is_empty()))
            .or_else(|| self.text.map(|s| compact_whitespace(&s)).filter(|s| !s.is_empty()))?;
        Some(SearchResult {
            title: self.title.map(|t| compact_whitespace(&t)).unwrap_or_default(),
            url,
            snippet,
        })
    }
}

/// Extracts results from a DuckDuckGo HTML page. Entries without a url or a
/// snippet are skipped and do not count toward `limit`.
pub fn parse_primary_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse(".result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut results = Vec::new();
    let mut seen = HashSet::new();
    for block in document.select(&result_sel) {
        if results.len() >= limit {
            break;
        }
        let Some(link) = block.select(&link_sel).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(normalize_result_url) else {
            continue;
        };
        let snippet = block
            .select(&snippet_sel)
            .next()
            .map(|el| element_text(&el))
            .unwrap_or_default();
        if snippet.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        results.push(SearchResult {
            title: element_text(&link),
            url,
            snippet,
        });
    }
    results
}

/// Makes result links absolute https urls, unwrapping DuckDuckGo redirect
/// links (`/l/?uddg=<target>`).
pub fn normalize_result_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with('/') {
        format!("{RESULT_BASE}{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    let is_redirect = parsed
        .host_str()
        .is_some_and(|host| host.ends_with("duckduckgo.com"))
        && parsed.path().starts_with("/l/");
    if is_redirect {
        if let Some((_, target)) = parsed.query_pairs().find(|(key, _)| key == "uddg") {
            return Url::parse(target.trim()).ok().and_then(web_url);
        }
    }
    web_url(parsed)
}

/// Only http(s) urls with a host are usable result links.
fn web_url(url: Url) -> Option<String> {
    let web = matches!(url.scheme(), "http" | "https");
    let has_host = url.host_str().is_some_and(|host| !host.is_empty());
    (web && has_host).then(|| url.to_string())
}

/// `title body` with whitespace runs collapsed, truncated to `max_len` chars.
pub fn build_search_query(title: &str, body: &str, max_len: usize) -> String {
    let joined = format!("{} {}", title.trim(), compact_whitespace(body));
    joined.trim().chars().take(max_len).collect()
}

/// Numbered results section appended to a prompt. Empty input gives an
/// empty string.
pub fn format_search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::from("Web search results:\n");
    for (index, result) in results.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({})", index + 1, result.title, result.url);
        let _ = writeln!(out, "   {}", result.snippet);
    }
    out.trim_end().to_string()
}

fn dedupe_by_url(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.url.clone()))
        .take(limit)
        .collect()
}

fn element_text(element: &ElementRef<'_>) -> String {
    compact_whitespace(&element.text().collect::<String>())
}

fn compact_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{build_search_query, normalize_result_url, SecondaryHit};

    #[test]
    fn protocol_relative_and_rooted_urls_become_https() {
        assert_eq!(
            normalize_result_url("//example.com/a").as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(
            normalize_result_url("/about").as_deref(),
            Some("https://duckduckgo.com/about")
        );
        assert_eq!(
            normalize_result_url("//duckduckgo.com/l/?uddg=https%3A%2F%2Frust-lang.org%2F&rut=x")
                .as_deref(),
            Some("https://rust-lang.org/")
        );
    }

    #[test]
    fn unusable_redirect_targets_are_rejected() {
        assert_eq!(normalize_result_url("//duckduckgo.com/l/?uddg=&rut=1"), None);
        assert_eq!(normalize_result_url("//duckduckgo.com/l/?uddg=javascript%3Aalert(1)"), None);
        assert_eq!(normalize_result_url("//duckduckgo.com/l/?uddg=%2Frelative"), None);
        assert_eq!(normalize_result_url("mailto:someone@example.com"), None);
    }

    #[test]
    fn query_is_compacted_and_truncated() {
        assert_eq!(build_search_query("Title", "  a\n\n b\tc ", 240), "Title a b c");
        assert_eq!(build_search_query("", "  ", 240), "");
        assert_eq!(build_search_query("abcdef", "", 3), "abc");
    }

    #[test]
    fn secondary_snippet_falls_back() {
        let hit = SecondaryHit {
            url: Some("https://a.example".into()),
            highlights: Some(vec![]),
            text: Some("full text".into()),
            ..SecondaryHit::default()
        };
        assert_eq!(hit.into_result().map(|r| r.snippet).as_deref(), Some("full text"));

        let missing_url = SecondaryHit {
            snippet: Some("s".into()),
            ..SecondaryHit::default()
        };
        assert!(missing_url.into_result().is_none());
    }
}
