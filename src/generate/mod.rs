//! AI content generation
//!
//! A [`ContentGenerator`] turns a prompt into text, an image, or speech.
//! [`generate_file`] picks the right call for a validated request and works
//! out the content type the object should be stored with.

mod openai;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::monitoring::RequestContext;
use crate::schemas::{guess_content_type, GenerateFileRequest, GeneratedFileType};

pub use openai::OpenAiGenerator;

/// System prompt for text completions
pub const SYSTEM_PROMPT: &str =
    "You are an autocompletion tool that produces text files given constraints.";

/// Audio bytes plus the MIME type reported by the API
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub content: Bytes,
    pub content_type: Option<String>,
}

/// Backend that produces generated content
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Chat completion for `prompt`
    async fn generate_text(&self, ctx: &RequestContext, prompt: &str) -> Result<String>;

    /// Image bytes for `prompt`
    async fn generate_image(&self, ctx: &RequestContext, prompt: &str) -> Result<Bytes>;

    /// Speech audio for `prompt` in `format` (an audio file extension)
    async fn generate_speech(&self, ctx: &RequestContext, prompt: &str, format: &str) -> Result<SpeechOutput>;
}

/// Generated file ready for upload
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub content: Bytes,
    pub content_type: Option<String>,
}

/// Run the generation a request asks for
pub async fn generate_file(
    generator: &dyn ContentGenerator,
    ctx: &RequestContext,
    request: &GenerateFileRequest,
) -> Result<GeneratedFile> {
    let (content, content_type) = match request.file_type {
        GeneratedFileType::Text => {
            let text = generator.generate_text(ctx, &request.prompt).await?;
            (Bytes::from(text), Some("text/plain".to_string()))
        }
        GeneratedFileType::Image => {
            let image = generator.generate_image(ctx, &request.prompt).await?;
            (image, None)
        }
        GeneratedFileType::Audio => {
            let speech = generator
                .generate_speech(ctx, &request.prompt, &request.audio_format())
                .await?;
            (speech.content, speech.content_type)
        }
    };

    let content_type = content_type
        .filter(|ct| !ct.is_empty())
        .or_else(|| guess_content_type(&request.file_path).map(String::from));
    tracing::debug!("Content-Type for the generated file: {:?}", content_type);

    Ok(GeneratedFile { content, content_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned;

    #[async_trait]
    impl ContentGenerator for Canned {
        async fn generate_text(&self, _ctx: &RequestContext, prompt: &str) -> Result<String> {
            Ok(format!("echo: {}", prompt))
        }

        async fn generate_image(&self, _ctx: &RequestContext, _prompt: &str) -> Result<Bytes> {
            Ok(Bytes::from_static(b"\x89PNG"))
        }

        async fn generate_speech(&self, _ctx: &RequestContext, _prompt: &str, format: &str) -> Result<SpeechOutput> {
            let content_type = (format == "wav").then(|| "audio/x-wav".to_string());
            Ok(SpeechOutput { content: Bytes::from_static(b"ID3"), content_type })
        }
    }

    fn request(path: &str, file_type: GeneratedFileType) -> GenerateFileRequest {
        GenerateFileRequest { file_path: path.into(), prompt: "hello".into(), file_type }
    }

    #[tokio::test]
    async fn test_text_is_plain() {
        let ctx = RequestContext::detached();
        let file = generate_file(&Canned, &ctx, &request("a.txt", GeneratedFileType::Text)).await.unwrap();
        assert_eq!(file.content, Bytes::from("echo: hello"));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_image_type_guessed_from_path() {
        let ctx = RequestContext::detached();
        let file = generate_file(&Canned, &ctx, &request("cat.jpg", GeneratedFileType::Image)).await.unwrap();
        assert_eq!(file.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_speech_prefers_reported_type() {
        let ctx = RequestContext::detached();
        let file = generate_file(&Canned, &ctx, &request("hi.wav", GeneratedFileType::Audio)).await.unwrap();
        assert_eq!(file.content_type.as_deref(), Some("audio/x-wav"));

        let file = generate_file(&Canned, &ctx, &request("hi.flac", GeneratedFileType::Audio)).await.unwrap();
        assert_eq!(file.content_type.as_deref(), Some("audio/flac"));
    }
}
