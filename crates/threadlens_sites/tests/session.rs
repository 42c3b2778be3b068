use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use threadlens_core::{Document, NodeId, Pattern, SharedDocument};
use threadlens_engine::{
    ActionKind, ChatError, ChatOptions, ChatProvider, ChatReply, ContextCollector, FetchSettings,
    MediaItem, Orchestrator, RunOutcome, StandardInstructions, FAILURE_MESSAGE,
};
use threadlens_sites::{
    default_integrations, ArticleIntegration, PageIntegration, PageSession, SessionServices,
    ATTACHED_MARKER,
};
use tokio::task::LocalSet;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingChat {
    reply: Option<String>,
    delay: Duration,
    /// Calls answered without `delay`.
    fast_calls: usize,
    calls: Mutex<Vec<(String, Vec<MediaItem>)>>,
}

impl RecordingChat {
    fn answering(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            ..Self::default()
        })
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            delay,
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<(String, Vec<MediaItem>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatProvider for RecordingChat {
    async fn chat(
        &self,
        prompt: &str,
        images: &[MediaItem],
        _options: &ChatOptions,
    ) -> Result<ChatReply, ChatError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((prompt.to_string(), images.to_vec()));
            calls.len()
        };
        if call > self.fast_calls && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Some(text) => Ok(ChatReply {
                text: text.clone(),
                raw: serde_json::Value::Null,
            }),
            None => Err(ChatError::Malformed("no reply".to_string())),
        }
    }
}

const REDDIT_PAGE: &str = r#"<html><body><main>
<shreddit-post permalink="/r/rust/comments/abc/lifetimes/">
  <a id="post-title-t3_abc" href="/r/rust/comments/abc/lifetimes/">Lifetimes explained?</a>
  <div class="shreddit-post-selftext userscript-code"><p>Where do they come from?</p></div>
</shreddit-post>
</main></body></html>"#;

fn services(chat: Arc<RecordingChat>) -> SessionServices {
    let instructions = StandardInstructions::new().with_override(ActionKind::Tldr, "Summarize.");
    SessionServices::new(
        Orchestrator::new(chat),
        ContextCollector::from_settings(&FetchSettings::default()),
    )
    .with_instructions(Rc::new(instructions))
}

fn find(document: &SharedDocument, css: &str) -> Vec<NodeId> {
    document.borrow().select(&Pattern::parse(css).unwrap())
}

fn start(html: &str, url: &str, services: &SessionServices) -> (SharedDocument, PageSession) {
    threadlens_logging::initialize_for_tests();
    let document = Document::parse(html).into_shared();
    let session = PageSession::start(url, document.clone(), services, &default_integrations())
        .unwrap()
        .expect("integration should activate");
    (document, session)
}

#[test]
fn unrelated_page_starts_no_session() {
    let document = Document::parse(REDDIT_PAGE).into_shared();
    let services = services(RecordingChat::answering("unused"));
    let session = PageSession::start(
        "https://example.org/",
        document,
        &services,
        &default_integrations(),
    )
    .unwrap();
    assert!(session.is_none());
}

#[test]
fn invalid_page_url_is_an_error() {
    let document = Document::parse(REDDIT_PAGE).into_shared();
    let services = services(RecordingChat::answering("unused"));
    let started = PageSession::start("not a url", document, &services, &default_integrations());
    assert!(started.is_err());
}

#[test]
fn existing_post_is_decorated_once() {
    let services = services(RecordingChat::answering("unused"));
    let (document, session) = start(REDDIT_PAGE, "https://www.reddit.com/r/rust/", &services);
    assert_eq!(session.integration_name(), "reddit");

    session.tick();
    session.discovery().rescan();
    session.tick();

    assert_eq!(find(&document, ".threadlens-content").len(), 1);
    assert_eq!(find(&document, "button.ai-button").len(), 3);
    assert_eq!(session.binding_count(), 3);
    let post = find(&document, "shreddit-post")[0];
    assert!(document.borrow().has_attr(post, ATTACHED_MARKER));
}

#[test]
fn inserted_post_is_decorated_on_next_tick() {
    let services = services(RecordingChat::answering("unused"));
    let (document, session) = start(
        "<html><body><main></main></body></html>",
        "https://www.reddit.com/r/rust/",
        &services,
    );
    session.tick();
    assert_eq!(session.binding_count(), 0);

    let main = find(&document, "main")[0];
    document
        .borrow_mut()
        .append_html(
            main,
            r#"<shreddit-post permalink="/r/rust/comments/xyz/new/"><a id="post-title-t3_xyz" href="/r/rust/comments/xyz/new/">New post</a></shreddit-post>"#,
        )
        .unwrap();
    session.tick();

    assert_eq!(find(&document, ".threadlens-content").len(), 1);
    assert_eq!(session.binding_count(), 3);
}

#[tokio::test]
async fn tldr_renders_reply_into_its_container() {
    let chat = RecordingChat::answering("**Short** answer");
    let services = services(chat.clone());
    let (document, session) = start(REDDIT_PAGE, "https://www.reddit.com/r/rust/comments/abc/", &services);
    session.tick();

    let button = find(&document, ".tldr-button")[0];
    let outcome = session.run(button).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Rendered { .. }), "{outcome:?}");

    let calls = chat.calls();
    assert_eq!(calls.len(), 1);
    let (prompt, images) = &calls[0];
    assert!(prompt.starts_with("Summarize.\n\nSubreddit: rust\nPost Title: Lifetimes explained?\nPost Content:"));
    assert!(prompt.contains("Where do they come from?"), "{prompt}");
    assert!(images.is_empty());

    let container = find(&document, ".tldr-container")[0];
    let html = document.borrow().inner_html(container).unwrap();
    assert!(html.contains("<strong>Short</strong> answer"), "{html}");
    assert!(html.contains("(Generated in"), "{html}");
    assert_eq!(document.borrow().text(button).as_deref(), Some("TL;DR"));
    assert!(!document.borrow().has_attr(button, "disabled"));
}

#[tokio::test]
async fn eligible_images_are_sent_inline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photo.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .expect(1)
        .mount(&server)
        .await;

    let page = format!(
        r#"<html><body><shreddit-post permalink="/r/pics/comments/p1/x/">
        <a id="post-title-t3_p1" href="/r/pics/comments/p1/x/">Look at this</a>
        <img class="non-lightboxed-content" src="{}/photo.png" width="800" height="600">
        <img class="non-lightboxed-content" src="{}/avatar.png" width="800" height="600">
        </shreddit-post></body></html>"#,
        server.uri(),
        server.uri()
    );
    let chat = RecordingChat::answering("A cat.");
    let services = services(chat.clone());
    let (document, session) = start(&page, "https://www.reddit.com/r/pics/", &services);
    session.tick();

    let button = find(&document, ".tldr-button")[0];
    session.run(button).await.unwrap();

    let calls = chat.calls();
    let (_, images) = &calls[0];
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].mime_type, "image/png");
    assert_eq!(images[0].base64, "iVBORw==");
}

#[tokio::test]
async fn provider_failure_shows_generic_message() {
    let chat = Arc::new(RecordingChat::default());
    let services = services(chat.clone());
    let (document, session) = start(REDDIT_PAGE, "https://www.reddit.com/r/rust/", &services);
    session.tick();

    let button = find(&document, ".answer-button")[0];
    let outcome = session.run(button).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed { .. }), "{outcome:?}");

    let container = find(&document, ".answer-container")[0];
    assert_eq!(document.borrow().text(container).as_deref(), Some(FAILURE_MESSAGE));
    assert_eq!(document.borrow().text(button).as_deref(), Some("Answer"));
}

#[tokio::test]
async fn unbound_control_runs_nothing() {
    let chat = RecordingChat::answering("unused");
    let services = services(chat.clone());
    let (document, session) = start(REDDIT_PAGE, "https://www.reddit.com/r/rust/", &services);
    session.tick();

    let title = find(&document, "[id*=\"post-title\"]")[0];
    assert!(session.run(title).await.is_none());
    assert!(chat.calls().is_empty());
}

#[tokio::test]
async fn shutdown_cancels_running_actions() {
    let chat = RecordingChat::slow("late", Duration::from_secs(30));
    let services = services(chat.clone());
    let (document, session) = start(REDDIT_PAGE, "https://www.reddit.com/r/rust/", &services);
    session.tick();
    let button = find(&document, ".tldr-button")[0];

    let local = LocalSet::new();
    let outcome = local
        .run_until(async {
            let task = session.activate(button).unwrap();
            while chat.calls().is_empty() {
                tokio::task::yield_now().await;
            }
            session.shutdown();
            task.join().await
        })
        .await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(document.borrow().text(button).as_deref(), Some("TL;DR"));
    assert!(!document.borrow().has_attr(button, "disabled"));
}

#[tokio::test]
async fn many_completed_activations_keep_shutdown_working() {
    let chat = Arc::new(RecordingChat {
        reply: Some("done".to_string()),
        delay: Duration::from_secs(30),
        fast_calls: 40,
        ..RecordingChat::default()
    });
    let services = services(chat.clone());
    let (document, session) = start(REDDIT_PAGE, "https://www.reddit.com/r/rust/", &services);
    session.tick();
    let button = find(&document, ".tldr-button")[0];

    let local = LocalSet::new();
    let (completed, last) = local
        .run_until(async {
            let mut completed = Vec::new();
            for _ in 0..40 {
                let task = session.activate(button).unwrap();
                completed.push(task.join().await);
            }
            let slow = session.activate(button).unwrap();
            while chat.calls().len() < 41 {
                tokio::task::yield_now().await;
            }
            session.shutdown();
            (completed, slow.join().await)
        })
        .await;

    assert_eq!(completed.len(), 40);
    assert!(completed
        .iter()
        .all(|outcome| matches!(outcome, RunOutcome::Rendered { .. })));
    assert_eq!(last, RunOutcome::Cancelled);
    assert!(!document.borrow().has_attr(button, "disabled"));
}

#[tokio::test]
async fn article_analyze_falls_back_to_generic_instruction() {
    threadlens_logging::initialize_for_tests();
    let chat = RecordingChat::answering("Looks fine.");
    let services = SessionServices::new(
        Orchestrator::new(chat.clone()),
        ContextCollector::from_settings(&FetchSettings::default()),
    );
    let document = Document::parse(
        r#"<html><body><article><h2>Rates rise again</h2>
        <div class="content"><p>The bank raised rates.</p></div></article></body></html>"#,
    )
    .into_shared();
    let integrations: Vec<Rc<dyn PageIntegration>> =
        vec![Rc::new(ArticleIntegration::new(["news.example.com"]))];
    let session = PageSession::start(
        "https://news.example.com/economy",
        document.clone(),
        &services,
        &integrations,
    )
    .unwrap()
    .unwrap();
    session.tick();
    assert_eq!(session.binding_count(), 1);

    let button = find(&document, ".analyze-button")[0];
    let outcome = session.run(button).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Rendered { .. }), "{outcome:?}");

    let (prompt, _) = &chat.calls()[0];
    assert!(prompt.starts_with("Analyze the following content:\n\nTitle: Rates rise again\nContent:\n"));
    assert!(prompt.contains("The bank raised rates."));
    let container = find(&document, ".result-container")[0];
    assert!(document.borrow().inner_html(container).unwrap().contains("Looks fine."));
}
