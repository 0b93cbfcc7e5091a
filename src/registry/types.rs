//! Registry records: version entries, registration metadata, active pointer

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Time range of the data a model was trained on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Caller-supplied registration metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetadata {
    /// Explicit version id; allocated from the clock when absent
    pub version: Option<String>,
    /// Code hash; SHA-256 of the artifact when absent
    pub code_hash: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub config: serde_json::Value,
    pub data_span: Option<DataSpan>,
}

impl ModelMetadata {
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A registered version, as stored in the index and the metadata sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// Absolute path of the stored artifact
    pub artifact: PathBuf,
    pub code_hash: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub data_span: Option<DataSpan>,
}

impl ModelVersion {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Content of the `active` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePointer {
    pub version: String,
    pub artifact: PathBuf,
}
