use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use threadlens_logging::lens_debug;

use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput};

/// Limits applied to media and transcript downloads. Durations are in
/// milliseconds so the struct round-trips through RON config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Accepted content types; `type/*` matches a whole family and an empty
    /// list accepts anything.
    pub allowed_content_types: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 15_000,
            redirect_limit: 5,
            max_bytes: 10 * 1024 * 1024,
            allowed_content_types: Vec::new(),
        }
    }
}

impl FetchSettings {
    pub fn for_media() -> Self {
        Self {
            allowed_content_types: vec![
                "image/*".to_string(),
                "application/octet-stream".to_string(),
            ],
            ..Self::default()
        }
    }

    pub fn for_text() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024,
            allowed_content_types: vec![
                "text/*".to_string(),
                "application/x-subrip".to_string(),
                "application/json".to_string(),
            ],
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn is_content_type_allowed(&self, content_type: &str) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.allowed_content_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(family) => ct
                    .split('/')
                    .next()
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(family)),
                None => allowed.eq_ignore_ascii_case(ct),
            }
        })
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn build_client(&self) -> Result<reqwest::Client, FetchError> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout())
            .timeout(self.settings.request_timeout())
            .redirect(policy)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = self.build_client()?;

        let response = client.get(parsed).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.settings.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        lens_debug!("Fetched {} bytes from {}", bytes.len(), final_url);

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            content_type,
        };

        Ok(FetchOutput { bytes, metadata })
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::FetchSettings;

    #[test]
    fn wildcard_content_types_match_family() {
        let settings = FetchSettings::for_media();
        assert!(settings.is_content_type_allowed("image/png"));
        assert!(settings.is_content_type_allowed("IMAGE/webp; q=1"));
        assert!(!settings.is_content_type_allowed("text/html"));
    }

    #[test]
    fn empty_allow_list_accepts_everything() {
        assert!(FetchSettings::default().is_content_type_allowed("application/zip"));
    }
}
