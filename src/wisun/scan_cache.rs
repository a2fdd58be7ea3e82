//! # Scan Cache
//!
//! An active scan takes minutes, so the last successful scan result is kept
//! on disk and reused for up to an hour. The cache is a small JSON object of
//! the `key: value` fields the dongle reported (`Pan ID`, `Channel`, `Addr`
//! at minimum). Read failures of any kind are cache misses, never errors;
//! stale or incomplete files are deleted on sight.
//!
//! One cache file belongs to one session; concurrent sessions over the same
//! file are unsupported.

use crate::constants::{SCAN_CACHE_MAX_AGE_SECS, SCAN_REQUIRED_KEYS};
use crate::error::BRouteError;
use crate::logging::log_debug;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Scan-parameter fields as reported by the dongle, keyed by parameter name.
pub type ScanResult = BTreeMap<String, String>;

/// Returns true iff `result` carries every required key.
pub fn is_complete(result: &ScanResult) -> bool {
    SCAN_REQUIRED_KEYS.iter().all(|k| result.contains_key(*k))
}

/// Time-boxed persisted record of the last successful scan.
#[derive(Debug, Clone)]
pub struct ScanCache {
    path: PathBuf,
    max_age: Duration,
}

impl ScanCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ScanCache {
            path: path.into(),
            max_age: Duration::from_secs(SCAN_CACHE_MAX_AGE_SECS),
        }
    }

    /// Cache with a custom validity window.
    pub fn with_max_age(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        ScanCache {
            path: path.into(),
            max_age,
        }
    }

    /// Loads the cached result if it is fresh and complete.
    pub fn load(&self) -> Option<ScanResult> {
        let meta = fs::metadata(&self.path).ok()?;
        let age = meta.modified().ok()?.elapsed().ok()?;
        if age > self.max_age {
            log_debug("scan cache expired");
            self.clear();
            return None;
        }

        let text = fs::read_to_string(&self.path).ok()?;
        let result: ScanResult = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(_) => {
                log_debug("scan cache unreadable");
                self.clear();
                return None;
            }
        };

        if is_complete(&result) {
            Some(result)
        } else {
            log_debug("scan cache missing required keys");
            self.clear();
            None
        }
    }

    /// Persists a scan result. The caller guarantees the required keys are
    /// present.
    pub fn store(&self, result: &ScanResult) -> Result<(), BRouteError> {
        let text = serde_json::to_string_pretty(result)
            .map_err(|e| BRouteError::Other(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| BRouteError::Other(e.to_string()))
    }

    /// Removes the cache file. Missing files are fine.
    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
