//! OpenAI-compatible generation client

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{ContentGenerator, SpeechOutput, SYSTEM_PROMPT};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::monitoring::{
    RequestContext, Unit, METRIC_OPENAI_IMAGES, METRIC_OPENAI_SPEECH, METRIC_OPENAI_TOKENS,
};
use crate::secrets::{CachedSecret, SecretsClient};

// ============ Wire types ============

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Where the API key comes from
enum ApiKeySource {
    /// Configured directly
    Static,
    /// Secrets Manager secret, fetched on first use
    Secret { name: String, client: SecretsClient },
    Missing,
}

/// Generator for the OpenAI REST API (or anything speaking it)
pub struct OpenAiGenerator {
    http: reqwest::Client,
    config: GenerationConfig,
    key_source: ApiKeySource,
    api_key: CachedSecret,
}

impl OpenAiGenerator {
    /// Build from configuration; the key is resolved lazily
    pub fn new(config: GenerationConfig, secrets: SecretsClient) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let (key_source, api_key) = match (&config.api_key, &config.api_key_secret_name) {
            (Some(key), _) => (ApiKeySource::Static, CachedSecret::preset(key.clone())),
            (None, Some(name)) => (
                ApiKeySource::Secret { name: name.clone(), client: secrets },
                CachedSecret::new(),
            ),
            (None, None) => {
                tracing::warn!("No generation API key configured; generation requests will fail");
                (ApiKeySource::Missing, CachedSecret::new())
            }
        };

        Ok(Self {
            http,
            config,
            key_source,
            api_key,
        })
    }

    async fn api_key(&self) -> Result<&str> {
        self.api_key
            .get_or_fetch(|| async {
                match &self.key_source {
                    ApiKeySource::Secret { name, client } => {
                        tracing::info!("Fetching generation API key from secret {}", name);
                        client.get_secret(name).await
                    }
                    ApiKeySource::Static | ApiKeySource::Missing => Err(Error::Generation(
                        "no API key configured (set OPENAI_API_KEY or OPENAI_API_SECRET_NAME)".into(),
                    )),
                }
            })
            .await
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<reqwest::Response> {
        let key = self.api_key().await?;
        let response = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!(
                "{} returned HTTP {}: {}",
                endpoint,
                status.as_u16(),
                detail
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate_text(&self, ctx: &RequestContext, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.config.text_model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            max_tokens: self.config.max_tokens,
            n: 1,
        };

        let response: ChatCompletionResponse =
            self.post_json("/chat/completions", &request).await?.json().await?;

        if let Some(usage) = &response.usage {
            ctx.put_metric(METRIC_OPENAI_TOKENS, usage.total_tokens as f64, Unit::Count);
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Generation("completion response contained no choices".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn generate_image(&self, ctx: &RequestContext, prompt: &str) -> Result<Bytes> {
        let request = ImageRequest {
            model: &self.config.image_model,
            prompt,
            size: "1024x1024",
            quality: "standard",
            n: 1,
        };

        let response: ImageResponse =
            self.post_json("/images/generations", &request).await?.json().await?;
        ctx.put_metric(METRIC_OPENAI_IMAGES, 1.0, Unit::Count);

        let url = response
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| Error::Generation("image response contained no URL".into()))?;
        tracing::debug!("Image generated, downloading from {}", url);

        let download = self.http.get(&url).send().await?;
        if !download.status().is_success() {
            return Err(Error::Generation(format!(
                "image download returned HTTP {}",
                download.status().as_u16()
            )));
        }
        Ok(download.bytes().await?)
    }

    async fn generate_speech(&self, ctx: &RequestContext, prompt: &str, format: &str) -> Result<SpeechOutput> {
        let request = SpeechRequest {
            model: &self.config.speech_model,
            voice: &self.config.speech_voice,
            input: prompt,
            response_format: format,
        };

        let response = self.post_json("/audio/speech", &request).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content = response.bytes().await?;
        ctx.put_metric(METRIC_OPENAI_SPEECH, 1.0, Unit::Count);

        Ok(SpeechOutput { content, content_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{header, HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer sk-test")
    }

    async fn chat(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> impl IntoResponse {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let prompt = body["messages"][1]["content"].as_str().unwrap_or_default().to_string();
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["max_tokens"], 100);
        Json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": format!("completed: {}", prompt) } }],
            "usage": { "total_tokens": 42 }
        }))
        .into_response()
    }

    async fn images(State(base): State<String>, headers: HeaderMap) -> impl IntoResponse {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(serde_json::json!({ "data": [{ "url": format!("{}/download/cat.png", base) }] })).into_response()
    }

    async fn download() -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "image/png")], b"\x89PNGdata".to_vec())
    }

    async fn speech(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
        assert_eq!(body["voice"], "echo");
        let format = body["response_format"].as_str().unwrap_or("mp3").to_string();
        ([(header::CONTENT_TYPE, format!("audio/{}", format))], b"audio-bytes".to_vec())
    }

    async fn spawn_api() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let app = Router::new()
            .route("/chat/completions", post(chat))
            .route("/images/generations", post(images))
            .route("/download/cat.png", get(download))
            .route("/audio/speech", post(speech))
            .with_state(base.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn generator(base_url: String, api_key: Option<&str>) -> OpenAiGenerator {
        let config = GenerationConfig {
            base_url,
            api_key: api_key.map(String::from),
            ..GenerationConfig::default()
        };
        OpenAiGenerator::new(config, SecretsClient::with_base_url("http://127.0.0.1:1", None)).unwrap()
    }

    #[tokio::test]
    async fn test_text_completion_records_tokens() {
        let base = spawn_api().await;
        let generator = generator(base, Some("sk-test"));
        let ctx = RequestContext::detached();

        let text = generator.generate_text(&ctx, "a poem").await.unwrap();
        assert_eq!(text, "completed: a poem");
        assert_eq!(ctx.metrics.total(METRIC_OPENAI_TOKENS), Some(42.0));
    }

    #[tokio::test]
    async fn test_image_is_downloaded() {
        let base = spawn_api().await;
        let generator = generator(base, Some("sk-test"));
        let ctx = RequestContext::detached();

        let image = generator.generate_image(&ctx, "a cat").await.unwrap();
        assert_eq!(image, Bytes::from_static(b"\x89PNGdata"));
        assert_eq!(ctx.metrics.total(METRIC_OPENAI_IMAGES), Some(1.0));
    }

    #[tokio::test]
    async fn test_speech_reports_content_type() {
        let base = spawn_api().await;
        let generator = generator(base, Some("sk-test"));
        let ctx = RequestContext::detached();

        let speech = generator.generate_speech(&ctx, "hello", "flac").await.unwrap();
        assert_eq!(speech.content_type.as_deref(), Some("audio/flac"));
        assert_eq!(speech.content, Bytes::from_static(b"audio-bytes"));
    }

    #[tokio::test]
    async fn test_rejected_key_is_generation_error() {
        let base = spawn_api().await;
        let generator = generator(base, Some("sk-wrong"));
        let ctx = RequestContext::detached();

        let err = generator.generate_text(&ctx, "a poem").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_completion_without_choices_is_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { Json(serde_json::json!({ "choices": [] })) }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let generator = generator(base, Some("sk-test"));
        let ctx = RequestContext::detached();

        let err = generator.generate_text(&ctx, "a poem").await.unwrap_err();
        assert!(matches!(err, Error::Generation(ref msg) if msg.contains("no choices")));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let base = spawn_api().await;
        let generator = generator(base, None);
        let ctx = RequestContext::detached();

        assert!(matches!(
            generator.generate_text(&ctx, "x").await,
            Err(Error::Generation(_))
        ));
    }
}
