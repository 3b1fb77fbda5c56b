use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::image::ImagePart;
use super::preview;
use super::provider::{ModelProvider, ProviderError, ProviderErrorKind};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: String,
        text: String
    },
    ImageUrl {
        #[serde(rename = "type")]
        content_type: String,
        image_url: ImageData
    },
}

#[derive(Debug, Serialize)]
struct ImageData {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// OpenRouter (OpenAI-compatible) chat completion client.
pub struct OpenRouterService {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenRouterService {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: &str, image: Option<&ImagePart>) -> ChatRequest {
        let mut content = vec![ContentPart::Text {
            content_type: "text".to_string(),
            text: prompt.to_string(),
        }];

        if let Some(image) = image {
            content.push(ContentPart::ImageUrl {
                content_type: "image_url".to_string(),
                image_url: ImageData {
                    url: image.data_url(),
                },
            });
        }

        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: 800,
        }
    }
}

/// Map an HTTP error status to a provider error kind.
fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Authentication,
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => ProviderErrorKind::Configuration,
        StatusCode::PAYMENT_REQUIRED => ProviderErrorKind::UpstreamQuota,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::Upstream,
    }
}

fn classify_transport(err: &reqwest::Error) -> ProviderErrorKind {
    if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else if err.is_builder() {
        ProviderErrorKind::Configuration
    } else {
        ProviderErrorKind::Network
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenRouterService {
    async fn invoke(&self, prompt: &str, image: Option<&ImagePart>) -> Result<String, ProviderError> {
        let request = self.build_request(prompt, image);

        log::info!("🤖 Sending request to OpenRouter with model: {}", self.model);
        if let Some(image) = image {
            log::debug!("📤 Attached image: {} ({} bytes encoded)", image.media_type, image.encoded_len());
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/nutrition-estimator") // OpenRouter app attribution
            .header("X-Title", "Nutrition Estimator")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::new(classify_transport(&e), e.to_string()))?;

        let status = response.status();
        log::debug!("📥 OpenRouter response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let kind = classify_status(status);
            log::error!("❌ OpenRouter API error ({}): {}", status, preview(&error_text, 300));
            return Err(ProviderError::new(
                kind,
                format!("OpenRouter API error ({}): {}", status, preview(&error_text, 300)),
            ));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::InvalidResponse
            };
            ProviderError::new(kind, format!("Could not decode OpenRouter response: {}", e))
        })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::InvalidResponse, "OpenRouter returned no completion")
            })?;

        log::debug!("💬 OpenRouter response content: {}", preview(&content, 200));
        Ok(content)
    }
}
