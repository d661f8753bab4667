//! Request and response shapes
//!
//! Raw inputs arrive as loosely typed structs (every field optional, every
//! value a string) and are turned into validated types here, so handlers only
//! ever see well-formed requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_DIRECTORY: &str = "";

// ============ Listing ============

/// Query string of `GET /v1/files` as received
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawListingParams {
    pub page_size: Option<String>,
    pub directory: Option<String>,
    pub page_token: Option<String>,
}

/// Validated listing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingQuery {
    pub page_size: usize,
    pub directory: String,
    pub page_token: Option<String>,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            directory: DEFAULT_DIRECTORY.to_string(),
            page_token: None,
        }
    }
}

impl ListingQuery {
    /// Apply defaults and bounds, and reject a token combined with a directory
    pub fn from_params(raw: RawListingParams) -> Result<Self> {
        let page_size = match raw.page_size.as_deref() {
            None => DEFAULT_PAGE_SIZE,
            Some(value) => {
                let parsed: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::validation("page_size must be an integer", value))?;
                if parsed < MIN_PAGE_SIZE as i64 || parsed > MAX_PAGE_SIZE as i64 {
                    return Err(Error::validation(
                        format!("page_size must be between {} and {}", MIN_PAGE_SIZE, MAX_PAGE_SIZE),
                        parsed,
                    ));
                }
                parsed as usize
            }
        };

        let query = Self {
            page_size,
            directory: raw.directory.unwrap_or_default(),
            page_token: raw.page_token.filter(|token| !token.is_empty()),
        };
        query.check_exclusive()?;
        Ok(query)
    }

    /// `page_token` resumes a listing whose prefix is already fixed
    pub fn check_exclusive(&self) -> Result<()> {
        if self.page_token.is_some() && self.directory != DEFAULT_DIRECTORY {
            return Err(Error::validation(
                "page_token is mutually exclusive with directory",
                serde_json::json!({
                    "directory": self.directory,
                    "page_token": self.page_token,
                }),
            ));
        }
        Ok(())
    }
}

/// Metadata of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub last_modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPage {
    pub files: Vec<FileMetadata>,
    pub next_page_token: Option<String>,
}

// ============ Upload ============

/// Body of `PUT /v1/files/{path}`
#[derive(Debug, Serialize, Deserialize)]
pub struct PutFileResponse {
    pub file_path: String,
    pub message: String,
}

impl PutFileResponse {
    pub fn new(file_path: &str, created: bool) -> Self {
        let message = if created {
            format!("New file uploaded at path: {}", file_path)
        } else {
            format!("Existing file updated at path: {}", file_path)
        };
        Self { file_path: file_path.to_string(), message }
    }
}

// ============ Generation ============

/// Kind of content the generation API produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeneratedFileType {
    Text,
    Image,
    #[serde(rename = "Text-to-Speech")]
    Audio,
}

/// Lower-cased accepted spellings
const FILE_TYPE_LOOKUP: &[(&str, GeneratedFileType)] = &[
    ("text", GeneratedFileType::Text),
    ("image", GeneratedFileType::Image),
    ("text-to-speech", GeneratedFileType::Audio),
    ("audio", GeneratedFileType::Audio),
];

const TEXT_EXTENSIONS: &[&str] = &["txt"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "opus", "aac", "flac", "wav", "pcm"];

impl GeneratedFileType {
    pub const ALL: [GeneratedFileType; 3] =
        [GeneratedFileType::Text, GeneratedFileType::Image, GeneratedFileType::Audio];

    /// Case-insensitive parse
    pub fn parse(value: &str) -> Result<Self> {
        let lowered = value.trim().to_lowercase();
        FILE_TYPE_LOOKUP
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, file_type)| *file_type)
            .ok_or_else(|| {
                let expected: Vec<&str> = Self::ALL.iter().map(|t| t.display_name()).collect();
                Error::validation(
                    format!("Invalid file type: {}; Expected one of: {}", value, expected.join(", ")),
                    value,
                )
            })
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            GeneratedFileType::Text => "Text",
            GeneratedFileType::Image => "Image",
            GeneratedFileType::Audio => "Text-to-Speech",
        }
    }

    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            GeneratedFileType::Text => TEXT_EXTENSIONS,
            GeneratedFileType::Image => IMAGE_EXTENSIONS,
            GeneratedFileType::Audio => AUDIO_EXTENSIONS,
        }
    }

    fn extension_error(&self) -> &'static str {
        match self {
            GeneratedFileType::Text => "For text files, the path must end with .txt",
            GeneratedFileType::Image => "For image files, the path must end with .png, .jpg, or .jpeg",
            GeneratedFileType::Audio => {
                "For audio files, the path must end with .mp3, .opus, .aac, .flac, .wav, or .pcm"
            }
        }
    }
}

/// Lower-cased extension after the last dot of the final path segment
pub fn file_extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// MIME type implied by the file extension
pub fn guess_content_type(path: &str) -> Option<&'static str> {
    let content_type = match file_extension(path)?.as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "mp3" => "audio/mpeg",
        "opus" => "audio/opus",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "pcm" => "audio/pcm",
        _ => return None,
    };
    Some(content_type)
}

/// Body of `POST /v1/files/generated` as received
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawGenerateRequest {
    pub file_path: Option<String>,
    pub prompt: Option<String>,
    pub file_type: Option<String>,
}

/// Validated generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateFileRequest {
    pub file_path: String,
    pub prompt: String,
    pub file_type: GeneratedFileType,
}

impl GenerateFileRequest {
    /// Validate field presence, prompt, file type, and extension, in that order
    pub fn validate(raw: RawGenerateRequest) -> Result<Self> {
        let file_path = required(raw.file_path, "file_path")?;
        let prompt = required(raw.prompt, "prompt")?;
        let file_type_raw = required(raw.file_type, "file_type")?;

        if prompt.trim().is_empty() {
            return Err(Error::validation("Prompt cannot be empty.", prompt));
        }

        let file_type = GeneratedFileType::parse(&file_type_raw)?;

        let extension_ok = file_extension(&file_path)
            .map(|ext| file_type.allowed_extensions().contains(&ext.as_str()))
            .unwrap_or(false);
        if !extension_ok {
            return Err(Error::validation(file_type.extension_error(), file_path));
        }

        Ok(Self { file_path, prompt, file_type })
    }

    /// Speech output format, taken from the file extension
    pub fn audio_format(&self) -> String {
        file_extension(&self.file_path).unwrap_or_else(|| "mp3".to_string())
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| Error::validation(format!("Field required: {}", field), field))
}

/// Body of `POST /v1/files/generated` responses (201 and 400)
#[derive(Debug, Serialize, Deserialize)]
pub struct PostFileResponse {
    pub file_path: String,
    pub message: String,
}

impl PostFileResponse {
    pub fn generated(request: &GenerateFileRequest) -> Self {
        Self {
            file_path: request.file_path.clone(),
            message: format!(
                "New {} file generated and uploaded at path: {}",
                request.file_type.display_name(),
                request.file_path
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page_size: Option<&str>, directory: Option<&str>, page_token: Option<&str>) -> RawListingParams {
        RawListingParams {
            page_size: page_size.map(String::from),
            directory: directory.map(String::from),
            page_token: page_token.map(String::from),
        }
    }

    fn message(err: Error) -> String {
        match err {
            Error::Validation { message, .. } => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_listing_defaults() {
        let query = ListingQuery::from_params(RawListingParams::default()).unwrap();
        assert_eq!(query, ListingQuery::default());
        assert_eq!(query.page_size, 10);
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(ListingQuery::from_params(params(Some("1"), None, None)).is_ok());
        assert!(ListingQuery::from_params(params(Some("100"), None, None)).is_ok());

        let err = ListingQuery::from_params(params(Some("0"), None, None)).unwrap_err();
        assert_eq!(message(err), "page_size must be between 1 and 100");
        assert!(ListingQuery::from_params(params(Some("-1"), None, None)).is_err());
        assert!(ListingQuery::from_params(params(Some("101"), None, None)).is_err());

        let err = ListingQuery::from_params(params(Some("ten"), None, None)).unwrap_err();
        assert_eq!(message(err), "page_size must be an integer");
    }

    #[test]
    fn test_token_and_directory_are_exclusive() {
        let err = ListingQuery::from_params(params(None, Some("dir"), Some("token"))).unwrap_err();
        assert!(message(err).contains("mutually exclusive"));

        let err = ListingQuery::from_params(params(Some("11"), Some("dir"), Some("token"))).unwrap_err();
        assert!(message(err).contains("mutually exclusive"));

        // Default directory and empty token are not "set"
        assert!(ListingQuery::from_params(params(None, Some(""), Some("token"))).is_ok());
        let query = ListingQuery::from_params(params(None, Some("dir"), Some(""))).unwrap();
        assert!(query.page_token.is_none());
        assert_eq!(query.directory, "dir");
    }

    #[test]
    fn test_file_type_lookup() {
        assert_eq!(GeneratedFileType::parse("Text").unwrap(), GeneratedFileType::Text);
        assert_eq!(GeneratedFileType::parse("text").unwrap(), GeneratedFileType::Text);
        assert_eq!(GeneratedFileType::parse("IMAGE").unwrap(), GeneratedFileType::Image);
        assert_eq!(GeneratedFileType::parse("text-to-speech").unwrap(), GeneratedFileType::Audio);
        assert_eq!(GeneratedFileType::parse("Audio").unwrap(), GeneratedFileType::Audio);

        let err = GeneratedFileType::parse("UnknownFileType").unwrap_err();
        assert_eq!(
            message(err),
            "Invalid file type: UnknownFileType; Expected one of: Text, Image, Text-to-Speech"
        );
    }

    #[test]
    fn test_generate_request_validation() {
        let raw = |path: &str, prompt: &str, file_type: &str| RawGenerateRequest {
            file_path: Some(path.into()),
            prompt: Some(prompt.into()),
            file_type: Some(file_type.into()),
        };

        let ok = GenerateFileRequest::validate(raw("notes/today.txt", "Write a haiku", "text")).unwrap();
        assert_eq!(ok.file_type, GeneratedFileType::Text);

        let err = GenerateFileRequest::validate(raw("notes/today.md", "Write", "Text")).unwrap_err();
        assert_eq!(message(err), "For text files, the path must end with .txt");

        let err = GenerateFileRequest::validate(raw("img/cat.pdf", "A cat", "Image")).unwrap_err();
        assert!(message(err).starts_with("For image files"));

        let err = GenerateFileRequest::validate(raw("notes/today.txt", "Say hi", "Text-to-Speech")).unwrap_err();
        assert!(message(err).starts_with("For audio files"));

        let err = GenerateFileRequest::validate(raw("notes/today.txt", "   ", "Text")).unwrap_err();
        assert_eq!(message(err), "Prompt cannot be empty.");

        assert!(GenerateFileRequest::validate(raw("IMG/CAT.JPEG", "A cat", "image")).is_ok());
    }

    #[test]
    fn test_empty_prompt_reported_before_file_type() {
        let err = GenerateFileRequest::validate(RawGenerateRequest {
            file_path: Some("a.txt".into()),
            prompt: Some(String::new()),
            file_type: Some("UnknownFileType".into()),
        })
        .unwrap_err();
        assert_eq!(message(err), "Prompt cannot be empty.");
    }

    #[test]
    fn test_missing_field_reported_first() {
        let err = GenerateFileRequest::validate(RawGenerateRequest {
            file_path: Some("a.txt".into()),
            prompt: Some("Test Prompt".into()),
            file_type: None,
        })
        .unwrap_err();
        assert_eq!(message(err), "Field required: file_type");
    }

    #[test]
    fn test_extension_helpers() {
        assert_eq!(file_extension("a/b/c.TXT").as_deref(), Some("txt"));
        assert_eq!(file_extension("dir.d/file"), None);
        assert_eq!(file_extension("trailing."), None);
        assert_eq!(guess_content_type("x/y.jpg"), Some("image/jpeg"));
        assert_eq!(guess_content_type("song.mp3"), Some("audio/mpeg"));
        assert_eq!(guess_content_type("blob.bin"), None);
    }

    #[test]
    fn test_response_messages() {
        assert_eq!(PutFileResponse::new("a.txt", true).message, "New file uploaded at path: a.txt");
        assert_eq!(PutFileResponse::new("a.txt", false).message, "Existing file updated at path: a.txt");

        let request = GenerateFileRequest {
            file_path: "s.mp3".into(),
            prompt: "hi".into(),
            file_type: GeneratedFileType::Audio,
        };
        assert_eq!(
            PostFileResponse::generated(&request).message,
            "New Text-to-Speech file generated and uploaded at path: s.mp3"
        );
        assert_eq!(request.audio_format(), "mp3");
    }
}
