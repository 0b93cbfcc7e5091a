//! On-disk model registry
//!
//! # Layout
//! ```text
//! base_dir/
//!   index.json             most-recent-first list of ModelVersion
//!   active                 {"version": .., "artifact": ..}
//!   registry.lock          write-lock marker
//!   <version>/<artifact>
//!   <version>/metadata.json
//! ```
//!
//! Writers serialize on [`RegistryLock`]. Readers never lock: `index.json`
//! and `active` are only ever replaced by renaming a fully written temp file,
//! so a reader sees either the old or the new content.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::{RegistryError, RegistryResult};
use super::lock::RegistryLock;
use super::types::{ActivePointer, ModelMetadata, ModelVersion};
use crate::config::constants::registry_lock_timeout;

pub const INDEX_FILE: &str = "index.json";
pub const ACTIVE_FILE: &str = "active";
pub const METADATA_FILE: &str = "metadata.json";
pub const LOCK_FILE: &str = "registry.lock";
const STAGING_PREFIX: &str = ".staging-";

/// Default number of versions retained in the index
pub const DEFAULT_KEEP_LAST: usize = 10;

/// Versioned artifact store with atomic activation
#[derive(Debug)]
pub struct ModelRegistry {
    base_dir: PathBuf,
    keep_last: usize,
    lock: RegistryLock,
}

impl ModelRegistry {
    /// Open (creating if needed) a registry rooted at `base_dir`
    ///
    /// `keep_last` is clamped to at least 1. The lock timeout comes from
    /// `REGISTRY_LOCK_TIMEOUT_MS`.
    pub fn open(base_dir: impl Into<PathBuf>, keep_last: usize) -> RegistryResult<Self> {
        Self::open_with_timeout(base_dir, keep_last, registry_lock_timeout())
    }

    pub fn open_with_timeout(
        base_dir: impl Into<PathBuf>,
        keep_last: usize,
        lock_timeout: Duration,
    ) -> RegistryResult<Self> {
        let base_dir = base_dir.into();
        // Artifact paths in the index and pointer are absolute
        let base_dir = if base_dir.is_absolute() {
            base_dir
        } else {
            std::env::current_dir()?.join(base_dir)
        };
        std::fs::create_dir_all(&base_dir)?;
        let lock = RegistryLock::new(base_dir.join(LOCK_FILE), lock_timeout);
        Ok(Self {
            base_dir,
            keep_last: keep_last.max(1),
            lock,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn keep_last(&self) -> usize {
        self.keep_last
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `artifact` as a new version and return its entry
    ///
    /// The artifact is staged before the lock is taken; under the lock the
    /// staging directory is renamed into place, the index is updated and
    /// pruned to `keep_last` (never removing the active version).
    pub fn register_version(
        &self,
        artifact: &Path,
        metadata: ModelMetadata,
    ) -> RegistryResult<ModelVersion> {
        let file_name = artifact
            .file_name()
            .filter(|_| artifact.is_file())
            .ok_or_else(|| {
                RegistryError::InvalidArtifact(format!("not a file: {}", artifact.display()))
            })?
            .to_os_string();
        if let Some(version) = &metadata.version {
            validate_version_id(version)?;
        }

        let bytes = std::fs::read(artifact)?;
        let code_hash = metadata
            .code_hash
            .clone()
            .unwrap_or_else(|| hex::encode(Sha256::digest(&bytes)));

        let staging = self
            .base_dir
            .join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        std::fs::create_dir(&staging)?;

        let result = write_file_synced(&staging.join(&file_name), &bytes)
            .map_err(RegistryError::from)
            .and_then(|_| self.commit_staged(&staging, &file_name, code_hash, metadata));

        if result.is_err() && staging.exists() {
            if let Err(e) = std::fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), error = %e, "[REGISTRY] Failed to clean staging directory");
            }
        }
        result
    }

    fn commit_staged(
        &self,
        staging: &Path,
        file_name: &std::ffi::OsStr,
        code_hash: String,
        metadata: ModelMetadata,
    ) -> RegistryResult<ModelVersion> {
        let _guard = self.lock.acquire()?;
        let mut index = self.read_index()?;

        let created_at = next_created_at(&index, Utc::now());
        let version = metadata
            .version
            .clone()
            .unwrap_or_else(|| version_id(created_at));

        let version_dir = self.base_dir.join(&version);
        if version_dir.exists() || index.iter().any(|v| v.version == version) {
            return Err(RegistryError::VersionExists(version));
        }

        let entry = ModelVersion {
            version: version.clone(),
            created_at,
            artifact: version_dir.join(file_name),
            code_hash,
            metrics: metadata.metrics,
            config: metadata.config,
            data_span: metadata.data_span,
        };
        write_json_atomic(&staging.join(METADATA_FILE), &entry)?;
        std::fs::rename(staging, &version_dir)?;

        index.insert(0, entry.clone());
        self.prune(&mut index)?;
        write_json_atomic(&self.base_dir.join(INDEX_FILE), &index)?;

        info!(
            version = %entry.version,
            artifact = %entry.artifact.display(),
            code_hash = %entry.code_hash,
            "[REGISTRY] Version registered"
        );
        Ok(entry)
    }

    /// Drop the oldest entries beyond `keep_last`, skipping the active one
    fn prune(&self, index: &mut Vec<ModelVersion>) -> RegistryResult<()> {
        let active = self.read_active()?.map(|p| p.version);
        let mut excess = index.len().saturating_sub(self.keep_last);
        let mut i = index.len();

        while excess > 0 && i > 0 {
            i -= 1;
            if active.as_deref() == Some(index[i].version.as_str()) {
                continue;
            }
            let removed = index.remove(i);
            excess -= 1;

            let dir = self.base_dir.join(&removed.version);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => info!(version = %removed.version, "[REGISTRY] Pruned"),
                Err(e) => warn!(
                    version = %removed.version,
                    error = %e,
                    "[REGISTRY] Pruned from index but directory removal failed"
                ),
            }
        }
        Ok(())
    }

    /// Atomically point `active` at `version`
    pub fn activate(&self, version: &str) -> RegistryResult<ModelVersion> {
        let _guard = self.lock.acquire()?;
        let index = self.read_index()?;
        self.activate_locked(&index, version)
    }

    fn activate_locked(&self, index: &[ModelVersion], version: &str) -> RegistryResult<ModelVersion> {
        let entry = index
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(version.to_string()))?;
        if !entry.artifact.is_file() {
            return Err(RegistryError::NotFound(format!(
                "{} (artifact missing: {})",
                version,
                entry.artifact.display()
            )));
        }

        let pointer = ActivePointer {
            version: entry.version.clone(),
            artifact: entry.artifact.clone(),
        };
        write_json_atomic(&self.base_dir.join(ACTIVE_FILE), &pointer)?;
        info!(version = %entry.version, "[REGISTRY] Activated");
        Ok(entry)
    }

    /// Re-activate `version`, or with `None` the newest non-active entry
    /// (the newest entry when nothing is active yet)
    pub fn rollback(&self, version: Option<&str>) -> RegistryResult<ModelVersion> {
        let _guard = self.lock.acquire()?;
        let index = self.read_index()?;

        let target = match version {
            Some(v) => v.to_string(),
            None => {
                let active = self.read_active()?.map(|p| p.version);
                index
                    .iter()
                    .find(|v| active.as_deref() != Some(v.version.as_str()))
                    .map(|v| v.version.clone())
                    .ok_or(RegistryError::NoRollbackCandidate)?
            }
        };

        let entry = self.activate_locked(&index, &target)?;
        info!(version = %entry.version, "[REGISTRY] Rolled back");
        Ok(entry)
    }

    // =========================================================================
    // Lock-free reads
    // =========================================================================

    /// All retained versions, most recent first
    pub fn list_versions(&self) -> RegistryResult<Vec<ModelVersion>> {
        self.read_index()
    }

    pub fn active_version(&self) -> RegistryResult<Option<String>> {
        Ok(self.read_active()?.map(|p| p.version))
    }

    /// The active pointer (version and artifact path), if any
    pub fn active_model(&self) -> RegistryResult<Option<ActivePointer>> {
        self.read_active()
    }

    /// Read a version's metadata sidecar
    pub fn metadata(&self, version: &str) -> RegistryResult<ModelVersion> {
        validate_version_id(version).map_err(|_| RegistryError::NotFound(version.to_string()))?;
        read_json_opt(&self.base_dir.join(version).join(METADATA_FILE))?
            .ok_or_else(|| RegistryError::NotFound(version.to_string()))
    }

    fn read_index(&self) -> RegistryResult<Vec<ModelVersion>> {
        Ok(read_json_opt(&self.base_dir.join(INDEX_FILE))?.unwrap_or_default())
    }

    fn read_active(&self) -> RegistryResult<Option<ActivePointer>> {
        read_json_opt(&self.base_dir.join(ACTIVE_FILE))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `v<yyyyMMddTHHmmss><micros>`, lexicographically sortable
pub fn version_id(created_at: DateTime<Utc>) -> String {
    format!("v{}", created_at.format("%Y%m%dT%H%M%S%6f"))
}

/// A creation time strictly after the index head
fn next_created_at(index: &[ModelVersion], now: DateTime<Utc>) -> DateTime<Utc> {
    // Ids carry microsecond precision only
    let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
    match index.first() {
        Some(head) if now <= head.created_at => head.created_at + chrono::Duration::microseconds(1),
        _ => now,
    }
}

fn validate_version_id(version: &str) -> RegistryResult<()> {
    let reserved = [INDEX_FILE, ACTIVE_FILE, METADATA_FILE, LOCK_FILE];
    let valid = !version.is_empty()
        && !version.starts_with('.')
        && !reserved.contains(&version)
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidArtifact(format!("invalid version id '{}'", version)))
    }
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Write to `<path>.tmp`, fsync, then rename over `path`
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> RegistryResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    write_file_synced(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> RegistryResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
