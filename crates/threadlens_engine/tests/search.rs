use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use threadlens_engine::{
    parse_primary_results, MemorySecretStore, SearchAugmenter, SearchOptions, SearchResult,
    SearchSettings, SecretVault,
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESULTS_PAGE: &str = r#"
<html><body>
  <div class="result">
    <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fdocs.rs%2Ftokio&amp;rut=1">Tokio docs</a>
    <a class="result__snippet">An asynchronous   runtime.</a>
  </div>
  <div class="result">
    <a class="result__a" href="https://example.com/no-snippet">No snippet</a>
  </div>
  <div class="result">
    <a class="result__a">No href</a>
    <a class="result__snippet">orphan</a>
  </div>
  <div class="result">
    <a class="result__a" href="https://docs.rs/tokio">Tokio again</a>
    <a class="result__snippet">duplicate url</a>
  </div>
  <div class="result">
    <a class="result__a" href="//blog.example/post">Blog</a>
    <a class="result__snippet">A post.</a>
  </div>
  <div class="result">
    <a class="result__a" href="/settings">Settings</a>
    <a class="result__snippet">Local page.</a>
  </div>
</body></html>
"#;

fn augmenter(settings: SearchSettings, vault: SecretVault) -> SearchAugmenter {
    SearchAugmenter::new(settings, vault)
}

fn empty_vault() -> SecretVault {
    SecretVault::new(Arc::new(MemorySecretStore::new()))
}

#[test]
fn primary_page_parsing_skips_incomplete_entries() {
    let results = parse_primary_results(RESULTS_PAGE, 10);
    assert_eq!(
        results,
        vec![
            SearchResult {
                title: "Tokio docs".into(),
                url: "https://docs.rs/tokio".into(),
                snippet: "An asynchronous runtime.".into(),
            },
            SearchResult {
                title: "Blog".into(),
                url: "https://blog.example/post".into(),
                snippet: "A post.".into(),
            },
            SearchResult {
                title: "Settings".into(),
                url: "https://duckduckgo.com/settings".into(),
                snippet: "Local page.".into(),
            },
        ]
    );
    assert_eq!(parse_primary_results(RESULTS_PAGE, 2).len(), 2);
}

#[test]
fn redirects_without_a_web_target_are_dropped() {
    let page = r#"<html><body>
      <div class="result">
        <a class="result__a" href="//duckduckgo.com/l/?uddg=&amp;rut=1">Empty target</a>
        <a class="result__snippet">s</a>
      </div>
      <div class="result">
        <a class="result__a" href="//duckduckgo.com/l/?uddg=ftp%3A%2F%2Ffiles.example%2Fx">Ftp target</a>
        <a class="result__snippet">s</a>
      </div>
      <div class="result">
        <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fkept.example%2F">Kept</a>
        <a class="result__snippet">s</a>
      </div>
    </body></html>"#;

    let results = parse_primary_results(page, 10);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://kept.example/");
    assert!(results.iter().all(|result| !result.url.is_empty()));
}

#[tokio::test]
async fn empty_query_returns_nothing_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let settings = SearchSettings {
        primary_endpoint: format!("{}/html/", server.uri()),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, empty_vault());
    assert!(search.search("   ", &SearchOptions::default()).await.is_empty());
}

#[tokio::test]
async fn unsupported_provider_returns_nothing() {
    let search = augmenter(SearchSettings::default(), empty_vault());
    let options = SearchOptions::default().with_provider("bogus");
    assert!(search.search("rust", &options).await.is_empty());
}

#[tokio::test]
async fn primary_provider_queries_and_bounds_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/html/"))
        .and(query_param("q", "tokio runtime"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(RESULTS_PAGE, "text/html; charset=utf-8"))
        .expect(1)
        .mount(&server)
        .await;

    let settings = SearchSettings {
        primary_endpoint: format!("{}/html/", server.uri()),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, empty_vault());
    let results = search
        .search(" tokio runtime ", &SearchOptions::default().with_limit(2))
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].url, "https://docs.rs/tokio");
    assert_eq!(results[1].url, "https://blog.example/post");
}

#[tokio::test]
async fn invalid_user_agent_falls_back_to_a_working_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/html/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(RESULTS_PAGE, "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let settings = SearchSettings {
        primary_endpoint: format!("{}/html/", server.uri()),
        user_agent: "broken\nagent".to_string(),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, empty_vault());
    let results = search.search("tokio", &SearchOptions::default()).await;
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn provider_error_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let settings = SearchSettings {
        primary_endpoint: format!("{}/html/", server.uri()),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, empty_vault());
    assert!(search.search("rust", &SearchOptions::default()).await.is_empty());
}

#[tokio::test]
async fn slow_provider_is_abandoned_at_the_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_raw(RESULTS_PAGE, "text/html"),
        )
        .mount(&server)
        .await;

    let settings = SearchSettings {
        primary_endpoint: format!("{}/html/", server.uri()),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, empty_vault());
    let options = SearchOptions::default().with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let results = search.search("rust", &options).await;
    assert!(results.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn secondary_without_credential_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let settings = SearchSettings {
        secondary_endpoint: server.uri(),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, empty_vault());
    let options = SearchOptions::default().with_provider("secondary");
    assert!(search.search("rust", &options).await.is_empty());
}

#[tokio::test]
async fn secondary_maps_highlights_and_truncates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("x-api-key", "exa-secret"))
        .and(body_partial_json(serde_json::json!({ "query": "rust", "numResults": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                { "title": "A", "url": "https://a.example", "highlights": ["one", "two"] },
                { "title": "B", "url": "https://b.example", "snippet": "bee" },
                { "title": "C", "url": "https://c.example", "text": "sea" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vault = SecretVault::new(Arc::new(
        MemorySecretStore::new().with_secret("exaApiKey", "exa-secret"),
    ));
    let settings = SearchSettings {
        secondary_endpoint: server.uri(),
        ..SearchSettings::default()
    };
    let search = augmenter(settings, vault);
    let options = SearchOptions::default()
        .with_provider("secondary")
        .with_limit(2);

    let results = search.search("rust", &options).await;
    assert_eq!(
        results,
        vec![
            SearchResult {
                title: "A".into(),
                url: "https://a.example".into(),
                snippet: "one two".into(),
            },
            SearchResult {
                title: "B".into(),
                url: "https://b.example".into(),
                snippet: "bee".into(),
            },
        ]
    );
}
