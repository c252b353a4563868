//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_STORAGE_BACKEND, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Which blob backend the document store runs on.
///
/// The remote object store of the production deployment plugs in behind the
/// same `BlobStore` trait; these are the backends shipped in-repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory map. Contents are lost on restart; intended for tests and
    /// local development.
    Memory,
    /// Local filesystem tree rooted at `storage.root`.
    Filesystem,
}

/// Blob/document storage configuration.
///
/// ## Fields:
/// - `backend`: which `BlobStore` implementation to construct at startup
/// - `root`: filesystem directory backing the `filesystem` backend
/// - `prefix`: key prefix under which all patient folders live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: String,
    pub prefix: String,
}

/// Session/engine configuration.
///
/// ## Fields:
/// - `engine`: which engine factory serves new sessions ("scripted" is the
///   built-in; a live STT integration registers its own factory)
/// - `default_patient_id`: patient used when a start frame omits `patient_id`
/// - `seed_document`: per-patient file fetched as seed context at start
/// - `default_script`: script document replayed when a start frame omits
///   `script_file`
/// - `questions_file`: local JSON file the question pool is loaded from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub engine: String,
    pub default_patient_id: String,
    pub seed_document: String,
    pub default_script: String,
    pub questions_file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                root: "./data".to_string(),
                prefix: "patient_profile".to_string(),
            },
            session: SessionConfig {
                engine: "scripted".to_string(),
                default_patient_id: "P0001".to_string(),
                seed_document: "patient_info.md".to_string(),
                default_script: "scenario_script.json".to_string(),
                questions_file: "questions.json".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, then config.toml, then APP_*
    /// environment variables, with HOST/PORT overrides for deployment
    /// platforms that set the bare variables.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup prevents runtime failures
    /// deep inside a session or a storage call.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.prefix.trim_matches('/').is_empty() {
            return Err(anyhow::anyhow!("Storage prefix cannot be empty"));
        }

        if self.storage.backend == StorageBackend::Filesystem && self.storage.root.is_empty() {
            return Err(anyhow::anyhow!(
                "Storage root is required for the filesystem backend"
            ));
        }

        if self.session.engine != "scripted" {
            return Err(anyhow::anyhow!(
                "Unknown session engine '{}' (built-in: \"scripted\")",
                self.session.engine
            ));
        }

        if self.session.seed_document.is_empty() {
            return Err(anyhow::anyhow!("Seed document name cannot be empty"));
        }

        Ok(())
    }

    /// Storage prefix with any surrounding slashes stripped, so key
    /// derivation can join segments uniformly.
    pub fn root_prefix(&self) -> String {
        self.storage.prefix.trim_matches('/').to_string()
    }
}
