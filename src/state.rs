//! # Application State Management
//!
//! Shared state handed to every request handler and WebSocket actor:
//! configuration, the document store, the engine factory, the question pool,
//! and process-wide metrics.
//!
//! ## Thread Safety:
//! Mutable data (config, metrics) sits behind `Arc<RwLock<_>>` — many
//! readers or one writer. Immutable collaborators (document store, engine
//! factory, question pool) are plain `Arc`s. Accessors clone out of the
//! locks so no lock is held across an `.await`.

use crate::config::{AppConfig, StorageBackend};
use crate::session::{EngineFactory, QuestionPool, ScriptedEngineFactory};
use crate::storage::{BlobStore, DocumentStore, FsBlobStore, MemoryBlobStore};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (readable by every handler)
    config: Arc<RwLock<AppConfig>>,

    /// Request/session metrics, updated by the telemetry middleware
    metrics: Arc<RwLock<AppMetrics>>,

    /// Patient document store over the configured blob backend
    documents: Arc<DocumentStore>,

    /// Builds one recognition engine per session
    engine_factory: Arc<dyn EngineFactory>,

    /// Startup-loaded question pool, copied per session
    questions: Arc<QuestionPool>,

    /// When the server started
    start_time: Instant,
}

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total error responses since start
    pub error_count: u64,

    /// Currently active duplex sessions
    pub active_sessions: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    /// Build the state from validated configuration: construct the blob
    /// backend, the document store on top of it, the question pool, and the
    /// configured engine factory.
    pub fn initialize(config: AppConfig) -> Result<Self> {
        let blobs: Arc<dyn BlobStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryBlobStore::new()),
            StorageBackend::Filesystem => Arc::new(FsBlobStore::new(&config.storage.root)?),
        };
        let documents = Arc::new(DocumentStore::new(blobs, config.root_prefix()));
        let questions = Arc::new(QuestionPool::load(&config.session.questions_file));

        // "scripted" is the only built-in engine; config::validate has
        // already rejected anything else. A live STT integration registers
        // its own factory here.
        let engine_factory: Arc<dyn EngineFactory> = Arc::new(ScriptedEngineFactory::new(
            Arc::clone(&documents),
            config.session.default_script.clone(),
        ));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            documents,
            engine_factory,
            questions,
            start_time: Instant::now(),
        })
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn documents(&self) -> Arc<DocumentStore> {
        Arc::clone(&self.documents)
    }

    pub fn engine_factory(&self) -> Arc<dyn EngineFactory> {
        Arc::clone(&self.engine_factory)
    }

    pub fn questions(&self) -> Arc<QuestionPool> {
        Arc::clone(&self.questions)
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one completed request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        // Guard against underflow if teardown paths ever overlap
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Consistent copy of the metrics; cloned so no lock is held while the
    /// snapshot is serialized into a response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
