//! Chat provider client speaking the Gemini `generateContent` wire format.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use threadlens_logging::{lens_debug, lens_warn};
use url::Url;

use crate::secrets::SecretVault;
use crate::{ChatReply, MediaItem};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no `{0}` credential available")]
    MissingCredential(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unreadable provider response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Vault entry holding the provider key.
    pub credential: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemma-3-27b-it".to_string(),
            timeout_ms: 60_000,
            credential: "apiKey".to_string(),
        }
    }
}

impl ChatSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatOptions {
    /// Overrides the configured model.
    pub model: Option<String>,
}

#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(
        &self,
        prompt: &str,
        images: &[MediaItem],
        options: &ChatOptions,
    ) -> Result<ChatReply, ChatError>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    vault: SecretVault,
    settings: ChatSettings,
}

impl GeminiProvider {
    pub fn new(settings: ChatSettings, vault: SecretVault) -> Self {
        let client = match reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                lens_warn!("chat client misconfigured, falling back to defaults: {err}");
                reqwest::Client::default()
            }
        };
        Self {
            client,
            vault,
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    fn endpoint_for(&self, model: &str, api_key: &str) -> Result<Url, ChatError> {
        let base = self.settings.endpoint.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/models/{model}:generateContent"))
            .map_err(|err| ChatError::Endpoint(err.to_string()))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    async fn generate(&self, url: Url, request: &GenerateContentRequest<'_>) -> Result<ChatReply, ChatError> {
        let response = self.client.post(url).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let raw: serde_json::Value = serde_json::from_str(&body).map_err(|err| {
            if status.is_success() {
                ChatError::Malformed(err.to_string())
            } else {
                ChatError::Api {
                    status: status.as_u16(),
                    message: body.clone(),
                }
            }
        })?;
        let parsed: GenerateContentResponse = serde_json::from_value(raw.clone())
            .map_err(|err| ChatError::Malformed(err.to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .filter(|text| !text.is_empty());

        match text {
            Some(text) if status.is_success() => Ok(ChatReply { text, raw }),
            _ => Err(ChatError::Api {
                status: status.as_u16(),
                message: parsed
                    .error
                    .map(|error| error.message)
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for GeminiProvider {
    async fn chat(
        &self,
        prompt: &str,
        images: &[MediaItem],
        options: &ChatOptions,
    ) -> Result<ChatReply, ChatError> {
        let api_key = self
            .vault
            .get_or_prompt(&self.settings.credential)
            .ok_or_else(|| ChatError::MissingCredential(self.settings.credential.clone()))?;
        let model = options.model.as_deref().unwrap_or(&self.settings.model);
        let url = self.endpoint_for(model, &api_key)?;

        let mut parts = vec![Part::Text { text: prompt }];
        parts.extend(images.iter().map(|image| Part::InlineData {
            inline_data: InlineData {
                mime_type: &image.mime_type,
                data: &image.base64,
            },
        }));
        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        lens_debug!("generateContent model={} images={}", model, images.len());
        let timeout = self.settings.timeout();
        tokio::time::timeout(timeout, self.generate(url, &request))
            .await
            .map_err(|_| ChatError::Timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::{Content, GenerateContentRequest, InlineData, Part};

    #[test]
    fn request_serializes_inline_images_after_text() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: "hi" },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png",
                            data: "AAAA",
                        },
                    },
                ],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [{ "parts": [
                    { "text": "hi" },
                    { "inline_data": { "mime_type": "image/png", "data": "AAAA" } }
                ]}]
            })
        );
    }
}
