//! HTTP API Module
//!
//! REST surface over the object store and the generation backend.

mod http;

pub use http::{AppState, HealthResponse, HttpServer};
