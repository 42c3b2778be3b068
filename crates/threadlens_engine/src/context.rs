//! Per-item context gathering: media downloads, transcripts and text cleanup.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::future::join_all;
use threadlens_logging::{lens_debug, lens_warn};

use crate::decode::decode_text;
use crate::fetch::{FetchSettings, Fetcher, ReqwestFetcher};
use crate::{ActionContext, MediaItem};

pub const MAX_MEDIA_ITEMS: usize = 3;
/// Candidates with a declared width or height at or below this are skipped.
pub const MIN_MEDIA_DIMENSION: u32 = 200;
const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("content item is no longer attached")]
    Detached,
    #[error("missing {0}")]
    Missing(String),
    #[error("{0}")]
    Other(String),
}

/// An image reference found in an item, with its declared size when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageCandidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: None,
            height: None,
        }
    }

    pub fn with_size(url: impl Into<String>, width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            url: url.into(),
            width,
            height,
        }
    }

    fn is_eligible(&self) -> bool {
        let lower = self.url.to_ascii_lowercase();
        if self.url.trim().is_empty() || lower.contains("icon") || lower.contains("avatar") {
            return false;
        }
        let big_enough = |dim: Option<u32>| dim.is_none_or(|value| value > MIN_MEDIA_DIMENSION);
        big_enough(self.width) && big_enough(self.height)
    }
}

/// Filters, deduplicates and caps candidate urls, keeping first-seen order.
pub fn select_media_urls(candidates: &[ImageCandidate]) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|candidate| candidate.is_eligible())
        .filter(|candidate| seen.insert(candidate.url.clone()))
        .take(MAX_MEDIA_ITEMS)
        .map(|candidate| candidate.url.clone())
        .collect()
}

/// Markdown-flavoured plain text for a content region, so lists and links
/// survive into the prompt.
pub fn html_to_prompt_text(html: &str) -> String {
    html2md::parse_html(html).trim().to_string()
}

#[derive(Clone)]
pub struct ContextCollector {
    media: Arc<dyn Fetcher>,
    text: Arc<dyn Fetcher>,
}

impl ContextCollector {
    pub fn new(media: Arc<dyn Fetcher>, text: Arc<dyn Fetcher>) -> Self {
        Self { media, text }
    }

    /// Reqwest-backed fetchers sharing the timeouts and size cap of `settings`.
    pub fn from_settings(settings: &FetchSettings) -> Self {
        let media = FetchSettings {
            allowed_content_types: FetchSettings::for_media().allowed_content_types,
            ..settings.clone()
        };
        let text = FetchSettings {
            allowed_content_types: FetchSettings::for_text().allowed_content_types,
            ..settings.clone()
        };
        Self::new(
            Arc::new(ReqwestFetcher::new(media)),
            Arc::new(ReqwestFetcher::new(text)),
        )
    }

    /// Downloads up to three eligible images concurrently. Failed downloads
    /// are logged and left out.
    pub async fn collect_media(&self, candidates: &[ImageCandidate]) -> Vec<MediaItem> {
        let urls = select_media_urls(candidates);
        let downloads = urls.iter().map(|url| self.fetch_media(url));
        join_all(downloads).await.into_iter().flatten().collect()
    }

    async fn fetch_media(&self, url: &str) -> Option<MediaItem> {
        match self.media.fetch(url).await {
            Ok(output) => {
                let mime_type = media_mime(output.metadata.content_type.as_deref(), &output.bytes);
                lens_debug!("Encoded {} ({}, {} bytes)", url, mime_type, output.bytes.len());
                Some(MediaItem {
                    mime_type,
                    base64: STANDARD.encode(&output.bytes),
                    source_url: url.to_string(),
                })
            }
            Err(err) => {
                lens_warn!("Failed to fetch image {}: {}", url, err);
                None
            }
        }
    }

    /// Fetches a caption or transcript file. Any failure yields `None`.
    pub async fn fetch_transcript(&self, url: Option<&str>) -> Option<String> {
        let url = url.map(str::trim).filter(|url| !url.is_empty())?;
        match self.text.fetch(url).await {
            Ok(output) => {
                let decoded = decode_text(&output.bytes, output.metadata.content_type.as_deref());
                let text = decoded.text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(err) => {
                lens_warn!("Failed to fetch transcript {}: {}", url, err);
                None
            }
        }
    }
}

fn media_mime(content_type: Option<&str>, bytes: &[u8]) -> String {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"));
    declared
        .or_else(|| infer::get(bytes).map(|kind| kind.mime_type().to_string()))
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// Produces a fresh [`ActionContext`] each time an action runs.
#[async_trait::async_trait(?Send)]
pub trait ContextSupplier {
    async fn supply(&self) -> Result<ActionContext, ContextError>;
}

#[async_trait::async_trait(?Send)]
impl<F, Fut> ContextSupplier for F
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<ActionContext, ContextError>>,
{
    async fn supply(&self) -> Result<ActionContext, ContextError> {
        (self)().await
    }
}

#[cfg(test)]
mod tests {
    use super::media_mime;

    #[test]
    fn mime_prefers_image_header_then_sniffs() {
        assert_eq!(media_mime(Some("image/webp; q=1"), b""), "image/webp");
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];
        assert_eq!(media_mime(Some("application/octet-stream"), &png), "image/png");
        assert_eq!(media_mime(None, b"???"), "image/jpeg");
    }
}
