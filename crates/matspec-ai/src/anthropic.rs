//! HTTP client for the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use matspec_core::ImageInput;
use matspec_core::config::ApiSettings;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{Completion, CompletionError, CompletionProvider};

const API_VERSION: &str = "2023-06-01";
/// Longest error body quoted back when the reply has no error envelope.
const MAX_ERROR_BODY: usize = 300;

// ── Wire types ──

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

// ── Client ──

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    vision_max_tokens: u32,
    spec_max_tokens: u32,
}

impl AnthropicClient {
    /// Create a client from `[api]` settings and a resolved key.
    ///
    /// A trailing slash on `base_url` is ignored.
    pub fn new(api_key: String, settings: &ApiSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("matspec/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            vision_max_tokens: settings.vision_max_tokens,
            spec_max_tokens: settings.spec_max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        max_tokens: u32,
        content: Vec<ContentBlock<'_>>,
    ) -> Result<Completion, CompletionError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: [Message {
                role: "user",
                content,
            }],
        };

        debug!(url = %url, model = %self.model, max_tokens, "sending messages request");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.network_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        let reply: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Transient(format!("malformed reply from the API: {e}")))?;
        let text = reply
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        let tokens_used = reply
            .usage
            .input_tokens
            .saturating_add(reply.usage.output_tokens);
        debug!(tokens_used, chars = text.len(), "received reply");
        Ok(Completion { text, tokens_used })
    }

    fn network_error(&self, e: &reqwest::Error) -> CompletionError {
        let message = if e.is_timeout() {
            "request to the API timed out".to_string()
        } else if e.is_connect() {
            format!("could not connect to {}", self.base_url)
        } else {
            format!("request to the API failed: {e}")
        };
        CompletionError::Transient(message)
    }
}

/// Map a non-success status and its body to a `CompletionError`.
fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> CompletionError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| {
            let body = body.trim();
            if body.is_empty() {
                status.canonical_reason().unwrap_or("no details").to_string()
            } else {
                body.chars().take(MAX_ERROR_BODY).collect()
            }
        });

    match status.as_u16() {
        401 | 403 => CompletionError::Auth(message),
        429 => CompletionError::RateLimited { retry_after },
        408 | 500..=599 => {
            CompletionError::Transient(format!("API error {}: {message}", status.as_u16()))
        }
        code => CompletionError::Rejected {
            status: code,
            message,
        },
    }
}

#[async_trait]
impl CompletionProvider for AnthropicClient {
    async fn analyze_image(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> Result<Completion, CompletionError> {
        let content = vec![
            ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: &image.media_type,
                    data: &image.encoded,
                },
            },
            ContentBlock::Text { text: instruction },
        ];
        self.send(self.vision_max_tokens, content).await
    }

    async fn generate_text(&self, prompt: &str) -> Result<Completion, CompletionError> {
        self.send(self.spec_max_tokens, vec![ContentBlock::Text { text: prompt }])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use serde_json::{Value, json};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn client(base_url: String) -> AnthropicClient {
        let settings = ApiSettings {
            base_url,
            timeout_secs: 5,
            ..ApiSettings::default()
        };
        AnthropicClient::new("test-key".into(), &settings).unwrap()
    }

    fn image() -> ImageInput {
        ImageInput {
            name: "a.png".into(),
            path: None,
            source_media_type: "image/png".into(),
            media_type: "image/jpeg".into(),
            encoded: "aGVsbG8=".into(),
            original_len: 5,
        }
    }

    async fn messages(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key")
            || headers.get("anthropic-version").and_then(|v| v.to_str().ok()) != Some(API_VERSION)
        {
            return (AxumStatus::BAD_REQUEST, Json(json!({"error": "headers"})));
        }
        let content = &body["messages"][0]["content"];
        let kinds: Vec<&str> = content
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["type"].as_str().unwrap())
            .collect();
        (
            AxumStatus::OK,
            Json(json!({
                "content": [
                    {"type": "text", "text": format!("blocks: {}", kinds.join(","))},
                    {"type": "text", "text": format!("max_tokens: {}", body["max_tokens"])}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })),
        )
    }

    #[tokio::test]
    async fn sends_image_before_instruction() {
        let base = spawn(Router::new().route("/v1/messages", post(messages))).await;
        let client = client(base);
        let reply = client.analyze_image(&image(), "what materials?").await.unwrap();
        assert_eq!(reply.text, "blocks: image,text\nmax_tokens: 1024");
        assert_eq!(reply.tokens_used, 15);

        let reply = client.generate_text("write specs").await.unwrap();
        assert_eq!(reply.text, "blocks: text\nmax_tokens: 4096");
    }

    #[tokio::test]
    async fn oversized_usage_saturates() {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async {
                Json(json!({
                    "content": [{"type": "text", "text": "ok"}],
                    "usage": {"input_tokens": u32::MAX, "output_tokens": 7}
                }))
            }),
        );
        let base = spawn(app).await;
        let reply = client(base).generate_text("x").await.unwrap();
        assert_eq!(reply.text, "ok");
        assert_eq!(reply.tokens_used, u32::MAX);
    }

    fn failing(status: u16, body: &'static str, retry_after: Option<&'static str>) -> Router {
        Router::new().route(
            "/v1/messages",
            post(move || async move {
                let mut headers = HeaderMap::new();
                if let Some(v) = retry_after {
                    headers.insert("retry-after", v.parse().unwrap());
                }
                (AxumStatus::from_u16(status).unwrap(), headers, body)
            }),
        )
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let auth = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let base = spawn(failing(401, auth, None)).await;
        assert_eq!(
            client(base).generate_text("x").await.unwrap_err(),
            CompletionError::Auth("invalid x-api-key".into())
        );

        let base = spawn(failing(429, "", Some("7"))).await;
        assert_eq!(
            client(base).generate_text("x").await.unwrap_err(),
            CompletionError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );

        let bad = r#"{"type":"error","error":{"type":"invalid_request_error","message":"image exceeds 5 MB"}}"#;
        let base = spawn(failing(400, bad, None)).await;
        assert_eq!(
            client(base).generate_text("x").await.unwrap_err(),
            CompletionError::Rejected {
                status: 400,
                message: "image exceeds 5 MB".into()
            }
        );

        let base = spawn(failing(529, "overloaded", None)).await;
        assert!(matches!(
            client(base).generate_text("x").await.unwrap_err(),
            CompletionError::Transient(m) if m.contains("529")
        ));
    }

    #[tokio::test]
    async fn malformed_reply_is_transient() {
        let base = spawn(failing(200, "not json", None)).await;
        assert!(matches!(
            client(base).generate_text("x").await.unwrap_err(),
            CompletionError::Transient(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(format!("http://{addr}"))
            .generate_text("x")
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Transient(_)));
    }

    #[test]
    fn trims_trailing_slash() {
        let c = client("http://localhost:9999/".into());
        assert_eq!(c.base_url, "http://localhost:9999");
        assert_eq!(c.model(), matspec_core::config::DEFAULT_MODEL);
    }
}
