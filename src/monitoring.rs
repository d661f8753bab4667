//! Request context, metrics, and cold start tracking
//!
//! Every request gets a [`RequestContext`] carrying its id, route, and a
//! [`MetricsScope`]. The context is passed explicitly to everything that
//! records metrics; at the end of the request the scope is flushed as one
//! structured log line in CloudWatch embedded-metric layout.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Metric namespace
pub const METRICS_NAMESPACE: &str = "files-api";

pub const METRIC_S3_BYTES_UPLOADED: &str = "S3BytesUploaded";
pub const METRIC_S3_BYTES_DOWNLOADED: &str = "S3BytesDownloaded";
pub const METRIC_OPENAI_TOKENS: &str = "OpenAITokensUsage";
pub const METRIC_OPENAI_IMAGES: &str = "OpenAIImageGeneratedCount";
pub const METRIC_OPENAI_SPEECH: &str = "OpenAITextToSpeechGeneratedCount";
pub const METRIC_UNHANDLED: &str = "UnhandledExceptions";

/// Metric unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Count,
    Bytes,
}

impl Unit {
    fn as_str(&self) -> &'static str {
        match self {
            Unit::Count => "Count",
            Unit::Bytes => "Bytes",
        }
    }
}

#[derive(Debug, Default)]
struct ScopeState {
    dimensions: BTreeMap<String, String>,
    properties: BTreeMap<String, Value>,
    metrics: BTreeMap<String, (Unit, Vec<f64>)>,
}

/// Metrics collected during one request
#[derive(Debug, Default)]
pub struct MetricsScope {
    state: Mutex<ScopeState>,
}

impl MetricsScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a value; repeated names accumulate
    pub fn put_metric(&self, name: &str, value: f64, unit: Unit) {
        self.lock()
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| (unit, Vec::new()))
            .1
            .push(value);
    }

    pub fn put_dimension(&self, name: &str, value: &str) {
        self.lock().dimensions.insert(name.to_string(), value.to_string());
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.lock().properties.insert(name.to_string(), value);
    }

    /// Sum of recorded values for `name`
    pub fn total(&self, name: &str) -> Option<f64> {
        self.lock().metrics.get(name).map(|(_, values)| values.iter().sum())
    }

    /// Embedded metric format document; `None` when nothing was recorded
    pub fn to_emf(&self, timestamp_ms: i64) -> Option<Value> {
        let state = self.lock();
        if state.metrics.is_empty() {
            return None;
        }

        let mut document = Map::new();
        for (name, value) in &state.properties {
            document.insert(name.clone(), value.clone());
        }
        for (name, value) in &state.dimensions {
            document.insert(name.clone(), Value::String(value.clone()));
        }

        let mut definitions = Vec::new();
        for (name, (unit, values)) in &state.metrics {
            definitions.push(json!({ "Name": name, "Unit": unit.as_str() }));
            let value = match values.as_slice() {
                [single] => json!(single),
                many => json!(many),
            };
            document.insert(name.clone(), value);
        }

        let dimension_keys: Vec<&String> = state.dimensions.keys().collect();
        document.insert(
            "_aws".to_string(),
            json!({
                "Timestamp": timestamp_ms,
                "CloudWatchMetrics": [{
                    "Namespace": METRICS_NAMESPACE,
                    "Dimensions": [dimension_keys],
                    "Metrics": definitions,
                }],
            }),
        );

        Some(Value::Object(document))
    }

    /// Emit the scope as a structured log line
    pub fn flush(&self) {
        if let Some(document) = self.to_emf(chrono::Utc::now().timestamp_millis()) {
            tracing::info!(target: "metrics", "{}", document);
        }
    }
}

/// Per-request state passed explicitly through the call chain
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub route: String,
    pub path: String,
    pub cold_start: bool,
    pub metrics: Arc<MetricsScope>,
}

impl RequestContext {
    pub fn new(method: &str, route: &str, path: &str, cold_start: bool) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        let metrics = Arc::new(MetricsScope::new());
        metrics.put_dimension("method", method);
        metrics.put_dimension("route", route);
        metrics.set_property("request_id", Value::String(request_id.clone()));

        Self {
            request_id,
            method: method.to_string(),
            route: route.to_string(),
            path: path.to_string(),
            cold_start,
            metrics,
        }
    }

    /// Context for work done outside an HTTP request (CLI, tests)
    pub fn detached() -> Self {
        Self::new("NONE", "detached", "", false)
    }

    pub fn put_metric(&self, name: &str, value: f64, unit: Unit) {
        self.metrics.put_metric(name, value, unit);
    }
}

/// Tracks whether this process has served a request yet
#[derive(Debug)]
pub struct ColdStartTracker {
    cold: AtomicBool,
}

impl Default for ColdStartTracker {
    fn default() -> Self {
        Self { cold: AtomicBool::new(true) }
    }
}

impl ColdStartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once: for the first request of the process
    pub fn observe(&self) -> bool {
        self.cold.swap(false, Ordering::AcqRel)
    }
}
