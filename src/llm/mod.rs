//! OpenAI-compatible chat-completions client for the OCR, VLM, and LLM
//! round trips (§4.2, §4.8): config held alongside a single
//! `reqwest::Client`, typed request/response structs, and exponential
//! backoff on transient failures (starting at 500 ms, factor 2, capped at
//! 8 s, stopping after 4 attempts total).

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Settings;
use crate::errors::{AppError, AppResult};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;
const MAX_ATTEMPTS: u32 = 4;
const OCR_TIMEOUT: Duration = Duration::from_secs(120);
const CORRECTION_TIMEOUT: Duration = Duration::from_secs(180);

/// Client for the three external model roles: the OCR model, the VLM, and
/// the LLM. All three speak the same chat-completions wire format; only
/// the endpoint, model name, and message shape differ per call.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    ocr_url: String,
    vlm_url: String,
    vlm_model: String,
    llm_url: String,
    llm_model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: Client::new(),
            ocr_url: settings.ocr_server_url.clone(),
            vlm_url: settings.vlm_server_url.clone(),
            vlm_model: settings.vlm_model.clone(),
            llm_url: settings.llm_server_url.clone(),
            llm_model: settings.llm_model.clone(),
        }
    }

    /// `ocr(image_bytes, mime) -> markdown` (§4.2). The OCR model is
    /// prompt-less: a single user turn carries the image and empty text.
    pub async fn ocr(&self, image_bytes: &[u8], mime: &str) -> AppResult<String> {
        let messages = vec![ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: String::new() },
                image_part(image_bytes, mime),
            ]),
        }];
        self.call(&self.ocr_url, "ocr", messages, OCR_TIMEOUT).await
    }

    /// `validate_vlm` (§4.8): re-OCR a single table region under a
    /// pricelist-aware system prompt. The original HTML is never sent.
    pub async fn validate_vlm(
        &self,
        image_bytes: &[u8],
        mime: &str,
        system_prompt: &str,
    ) -> AppResult<String> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system_prompt.to_string()),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![image_part(image_bytes, mime)]),
            },
        ];
        self.call(&self.vlm_url, &self.vlm_model, messages, CORRECTION_TIMEOUT)
            .await
    }

    /// `validate_llm` (§4.8): text-only correction given the original HTML,
    /// a structural diagnosis, and the surrounding page markdown.
    pub async fn validate_llm(&self, prompt: &str) -> AppResult<String> {
        let messages = vec![ChatMessage {
            role: "user",
            content: MessageContent::Text(prompt.to_string()),
        }];
        self.call(&self.llm_url, &self.llm_model, messages, CORRECTION_TIMEOUT)
            .await
    }

    async fn call(
        &self,
        url: &str,
        model: &str,
        messages: Vec<ChatMessage>,
        timeout: Duration,
    ) -> AppResult<String> {
        let body = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature: 0.0,
        };

        let mut last_err = String::from("unknown error");

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = (BACKOFF_BASE_MS * 2u64.pow(attempt - 1)).min(BACKOFF_CAP_MS);
                warn!(url, attempt, backoff, "retrying chat-completions call");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let sent = self
                .client
                .post(url)
                .timeout(timeout)
                .json(&body)
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ChatCompletionResponse = resp
                            .json()
                            .await
                            .map_err(|e| AppError::upstream(format!("malformed response: {e}")))?;
                        let content = parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .unwrap_or_default();
                        return Ok(content);
                    }
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(AppError::upstream(format!(
                            "{url} returned {status}: {detail}"
                        )));
                    }
                    last_err = format!("{url} returned {status}");
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }
        }

        Err(AppError::upstream(format!(
            "{url} failed after {MAX_ATTEMPTS} attempts: {last_err}"
        )))
    }
}

fn image_part(image_bytes: &[u8], mime: &str) -> ContentPart {
    let encoded = BASE64.encode(image_bytes);
    ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:{mime};base64,{encoded}"),
        },
    }
}
