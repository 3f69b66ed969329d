//! Persistent per-(unit, configuration) analysis results.
//!
//! Each record is a JSON file in the build directory, named after a BLAKE3
//! digest of the unit path and configuration signature. Records are written
//! to a temporary file and renamed into place, so a reader never observes a
//! partially written record.

use crate::configuration::ConfigurationSignature;
use crate::types::Finding;
use crate::unit::{Dependency, Fingerprint, SourceUnit};
use crate::whole_program::WholeProgramPartial;

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Layout version of cache records. Bump on incompatible changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors writing the cache.
///
/// Reads never fail: an unreadable record is a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The build directory could not be created.
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A record could not be written or moved into place.
    #[error("failed to write cache record {path}: {source}")]
    Write {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("failed to encode cache record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One persisted analysis result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Record layout version.
    pub format: u32,
    /// Normalized unit path.
    pub unit: PathBuf,
    /// Configuration the unit was analyzed under.
    pub signature: ConfigurationSignature,
    /// Unit fingerprint at analysis time.
    pub fingerprint: Fingerprint,
    /// Dependency fingerprints at analysis time.
    pub dependencies: Vec<Dependency>,
    /// Checker version and settings that produced the findings.
    pub checker_version: String,
    /// Raw findings, before suppression.
    pub findings: Vec<Finding>,
    /// Whole-program observations of the pass.
    #[serde(default)]
    pub partial: WholeProgramPartial,
}

/// Build-directory cache of analysis results.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    dir: PathBuf,
    version_tag: String,
}

impl AnalysisCache {
    /// Creates a cache rooted at `dir` for the given checker version tag.
    ///
    /// The directory is created lazily on the first store.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, version_tag: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            version_tag: version_tag.into(),
        }
    }

    /// Returns the build directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for a (unit, configuration) key.
    #[must_use]
    pub fn record_path(&self, unit: &Path, signature: &ConfigurationSignature) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(unit.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(signature.as_str().as_bytes());
        self.dir.join(format!("{}.json", hasher.finalize().to_hex()))
    }

    /// Returns the record for `unit` under `signature` if it is still valid.
    ///
    /// A record is valid when the unit fingerprint, every dependency
    /// fingerprint, and the checker version tag all match. Missing, corrupt,
    /// and stale records are misses.
    #[must_use]
    pub fn lookup(&self, unit: &SourceUnit, signature: &ConfigurationSignature) -> Option<CacheEntry> {
        let path = self.record_path(&unit.path, signature);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring unreadable cache record {}: {}", path.display(), e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring corrupt cache record {}: {}", path.display(), e);
                return None;
            }
        };

        let stale = if entry.format != CACHE_FORMAT_VERSION {
            Some("record format")
        } else if entry.unit != unit.path || entry.signature != *signature {
            Some("key collision")
        } else if entry.checker_version != self.version_tag {
            Some("checker version")
        } else if entry.fingerprint != unit.fingerprint {
            Some("unit content")
        } else if entry.dependencies != unit.dependencies {
            Some("dependencies")
        } else {
            None
        };

        match stale {
            Some(reason) => {
                debug!(
                    "Stale cache record for {} [{}]: {reason} changed",
                    unit.path.display(),
                    signature
                );
                None
            }
            None => Some(entry),
        }
    }

    /// Persists the result of analyzing `unit` under `signature`, replacing
    /// any previous record for the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written. The
    /// previous record, if any, is left untouched in that case.
    pub fn store(
        &self,
        unit: &SourceUnit,
        signature: &ConfigurationSignature,
        findings: &[Finding],
        partial: &WholeProgramPartial,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            format: CACHE_FORMAT_VERSION,
            unit: unit.path.clone(),
            signature: signature.clone(),
            fingerprint: unit.fingerprint.clone(),
            dependencies: unit.dependencies.clone(),
            checker_version: self.version_tag.clone(),
            findings: findings.to_vec(),
            partial: partial.clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.record_path(&unit.path, signature);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = std::fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|()| std::fs::rename(&tmp, &path));

        if let Err(source) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(CacheError::Write { path, source });
        }

        debug!("Stored cache record {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::types::{Location, Severity};
    use crate::unit::UnitLoader;
    use std::fs;
    use tempfile::TempDir;

    fn signature(defines: &[(&str, &str)]) -> ConfigurationSignature {
        Configuration {
            defines: defines
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Configuration::default()
        }
        .signature()
    }

    fn setup() -> (TempDir, SourceUnit) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("main.c"), "#include \"dep.h\"\nint x;\n").unwrap();
        fs::write(tmp.path().join("dep.h"), "#define ONE 1\n").unwrap();
        let unit = UnitLoader::default().load(&tmp.path().join("main.c")).unwrap();
        (tmp, unit)
    }

    fn findings(unit: &SourceUnit) -> Vec<Finding> {
        vec![Finding::new(
            "someId",
            Severity::Warning,
            Location::new(unit.path.clone(), 2, 5),
            "message",
        )]
    }

    #[test]
    fn test_store_then_lookup() {
        let (tmp, unit) = setup();
        let cache = AnalysisCache::new(tmp.path().join("build"), "v1");
        let sig = signature(&[("A", "1")]);

        assert!(cache.lookup(&unit, &sig).is_none());
        let mut partial = WholeProgramPartial::new();
        partial.reference("ONE");
        cache.store(&unit, &sig, &findings(&unit), &partial).unwrap();

        let entry = cache.lookup(&unit, &sig).unwrap();
        assert_eq!(entry.findings, findings(&unit));
        assert_eq!(entry.partial, partial);
        assert!(cache.lookup(&unit, &signature(&[])).is_none());
    }

    #[test]
    fn test_dependency_change_invalidates() {
        let (tmp, unit) = setup();
        let cache = AnalysisCache::new(tmp.path().join("build"), "v1");
        let sig = signature(&[]);
        cache.store(&unit, &sig, &[], &WholeProgramPartial::new()).unwrap();

        fs::write(tmp.path().join("dep.h"), "#define ONE 2\n").unwrap();
        let reloaded = UnitLoader::default().load(&tmp.path().join("main.c")).unwrap();
        assert_eq!(reloaded.fingerprint, unit.fingerprint);
        assert!(cache.lookup(&reloaded, &sig).is_none());
    }

    #[test]
    fn test_version_change_invalidates() {
        let (tmp, unit) = setup();
        let sig = signature(&[]);
        AnalysisCache::new(tmp.path().join("build"), "v1")
            .store(&unit, &sig, &[], &WholeProgramPartial::new())
            .unwrap();
        assert!(AnalysisCache::new(tmp.path().join("build"), "v2")
            .lookup(&unit, &sig)
            .is_none());
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let (tmp, unit) = setup();
        let cache = AnalysisCache::new(tmp.path().join("build"), "v1");
        let sig = signature(&[]);
        cache.store(&unit, &sig, &[], &WholeProgramPartial::new()).unwrap();

        fs::write(cache.record_path(&unit.path, &sig), b"{\"format\": 1, trunc").unwrap();
        assert!(cache.lookup(&unit, &sig).is_none());
    }

    #[test]
    fn test_overwrite_leaves_no_temporary_files() {
        let (tmp, unit) = setup();
        let cache = AnalysisCache::new(tmp.path().join("build"), "v1");
        let sig = signature(&[]);
        cache.store(&unit, &sig, &[], &WholeProgramPartial::new()).unwrap();
        cache.store(&unit, &sig, &findings(&unit), &WholeProgramPartial::new()).unwrap();

        assert_eq!(cache.lookup(&unit, &sig).unwrap().findings.len(), 1);
        let names: Vec<_> = fs::read_dir(cache.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[test]
    fn test_store_into_unwritable_location_fails() {
        let (tmp, unit) = setup();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, "").unwrap();
        let cache = AnalysisCache::new(blocker.join("build"), "v1");
        let err = cache
            .store(&unit, &signature(&[]), &[], &WholeProgramPartial::new())
            .unwrap_err();
        assert!(matches!(err, CacheError::CreateDir { .. }));
    }
}
