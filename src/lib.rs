//! Files API - HTTP file storage over S3 with AI-generated content
//!
//! A thin REST layer that maps HTTP verbs onto object store calls, plus an
//! endpoint that generates text, images, or speech with an OpenAI-compatible
//! API and stores the result.
//!
//! # Architecture
//!
//! Requests pass through a monitoring middleware that builds a
//! [`monitoring::RequestContext`], are validated into the types in
//! [`schemas`], and are served from an [`storage::ObjectStore`]. Generation
//! goes through a [`generate::ContentGenerator`] whose API key may come from
//! the local secrets extension.
//!
//! # Features
//!
//! - Upload, download, inspect, delete, and list files
//! - Cursor-based pagination with directory prefixes
//! - S3 and in-memory storage backends
//! - Text, image, and text-to-speech generation
//! - Per-request metrics in CloudWatch embedded-metric layout

pub mod config;
pub mod error;
pub mod storage;
pub mod listing;
pub mod schemas;
pub mod secrets;
pub mod generate;
pub mod monitoring;
pub mod api;

pub use config::FilesApiConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::FilesApiConfig;
    pub use crate::error::{Error, Result};
    pub use crate::storage::{ObjectStore, MemoryObjectStore, S3ObjectStore};
    pub use crate::generate::{ContentGenerator, OpenAiGenerator, SpeechOutput};
    pub use crate::monitoring::RequestContext;
    pub use crate::schemas::{GeneratedFileType, ListingQuery, ListingPage};
    pub use crate::api::HttpServer;
}
