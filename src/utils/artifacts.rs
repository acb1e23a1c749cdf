//! Artifact workspace: persistence, idempotence keys and run locking.
//!
//! Every persisted artifact gets a JSON sidecar recording the exact
//! parameters and inputs it was computed from. `force=false` reuse requires
//! a structural match of the whole key — no ad hoc file-existence checks —
//! which makes the idempotence guarantee directly testable. Unreadable or
//! mismatched sidecars are cache misses, never errors.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::ContigId;

/// Output directory for one binning run.
#[derive(Debug, Clone)]
pub struct ArtifactWorkspace {
    root: PathBuf,
}

/// Identity of a cached artifact: what it is, which schema wrote it, and the
/// full parameter/input fingerprint it depends on. Compared structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub artifact: String,
    pub schema_version: String,
    pub params: serde_json::Value,
    pub inputs: serde_json::Value,
}

pub const SCHEMA_VERSION: &str = "1";

impl ArtifactKey {
    pub fn new(artifact: impl Into<String>, params: serde_json::Value, inputs: serde_json::Value) -> Self {
        Self {
            artifact: artifact.into(),
            schema_version: SCHEMA_VERSION.to_string(),
            params,
            inputs,
        }
    }

    fn sidecar_name(&self) -> String {
        format!("{}.meta.json", self.artifact)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactSidecar {
    key: ArtifactKey,
    created_at: DateTime<Utc>,
    #[serde(default)]
    extra: serde_json::Value,
}

impl ArtifactWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create workspace at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whether a cached artifact with exactly this key exists. Any I/O or
    /// parse problem reads as "not current" (recompute), per the error
    /// design: transient failures during idempotence checks are cache
    /// misses, not errors.
    pub fn is_current(&self, key: &ArtifactKey) -> bool {
        let sidecar_path = self.path(&key.sidecar_name());
        let raw = match fs::read_to_string(&sidecar_path) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match serde_json::from_str::<ArtifactSidecar>(&raw) {
            Ok(sidecar) => {
                let current = &sidecar.key == key;
                if !current {
                    debug!(
                        artifact = %key.artifact,
                        "cached artifact exists but its key differs; recomputing"
                    );
                }
                current
            }
            Err(err) => {
                warn!(
                    artifact = %key.artifact,
                    %err,
                    "unreadable artifact sidecar treated as cache miss"
                );
                false
            }
        }
    }

    /// Record a freshly written artifact.
    pub fn record(&self, key: &ArtifactKey, extra: serde_json::Value) -> Result<()> {
        let sidecar = ArtifactSidecar {
            key: key.clone(),
            created_at: Utc::now(),
            extra,
        };
        let json = serde_json::to_string_pretty(&sidecar)?;
        atomic_write(&self.path(&key.sidecar_name()), json.as_bytes())
    }

    /// Extra metadata stored with an artifact, if its sidecar is readable.
    pub fn sidecar_extra(&self, artifact: &str) -> Option<serde_json::Value> {
        let raw = fs::read_to_string(self.path(&format!("{artifact}.meta.json"))).ok()?;
        serde_json::from_str::<ArtifactSidecar>(&raw)
            .ok()
            .map(|s| s.extra)
    }
}

/// Write via a temporary file and rename, so readers never observe a
/// half-written artifact.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

/// Persist singleton contig ids, one per line, sorted.
pub fn write_singletons(path: &Path, singletons: &[ContigId]) -> Result<()> {
    let mut sorted: Vec<&ContigId> = singletons.iter().collect();
    sorted.sort();
    let mut out = String::new();
    for id in sorted {
        out.push_str(id);
        out.push('\n');
    }
    atomic_write(path, out.as_bytes())
}

/// Load singleton ids; an absent file means no singletons were recorded.
pub fn read_singletons(path: &Path) -> Result<Vec<ContigId>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read singletons from {}", path.display()))?;
    Ok(raw
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect())
}

/// Mutual exclusion for one output path: the refinement state machine runs
/// under this lock from BUILDING through CONVERGED. Released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    pub fn acquire(workspace: &ArtifactWorkspace, name: &str) -> Result<Self> {
        let path = workspace.path(name);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Self { path }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(anyhow!(
                "another run holds the lock at {} — refinement runs must not share an output path",
                path.display()
            )),
            Err(err) => Err(err)
                .with_context(|| format!("failed to acquire lock at {}", path.display())),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to release workspace lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn key(params: serde_json::Value) -> ArtifactKey {
        ArtifactKey::new("pre_graph", params, json!(["c1", "c2"]))
    }

    #[test]
    fn matching_key_is_current_after_record() {
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();
        let k = key(json!({"n_frags": 30}));
        assert!(!ws.is_current(&k));
        ws.record(&k, json!({"edges": 5})).unwrap();
        assert!(ws.is_current(&k));
        assert_eq!(ws.sidecar_extra("pre_graph").unwrap()["edges"], 5);
    }

    #[test]
    fn changed_params_invalidate_the_cache() {
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();
        ws.record(&key(json!({"n_frags": 30})), json!({})).unwrap();
        assert!(!ws.is_current(&key(json!({"n_frags": 10}))));
    }

    #[test]
    fn corrupt_sidecar_is_a_cache_miss() {
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();
        fs::write(ws.path("pre_graph.meta.json"), b"not json").unwrap();
        assert!(!ws.is_current(&key(json!({}))));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let ws = ArtifactWorkspace::new(dir.path()).unwrap();
        let lock = WorkspaceLock::acquire(&ws, "refine.lock").unwrap();
        assert!(WorkspaceLock::acquire(&ws, "refine.lock").is_err());
        drop(lock);
        WorkspaceLock::acquire(&ws, "refine.lock").unwrap();
    }

    #[test]
    fn singletons_roundtrip_sorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("singletons.txt");
        write_singletons(&path, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(read_singletons(&path).unwrap(), vec!["a", "b"]);
        // absent file means none
        assert!(read_singletons(&dir.path().join("nope.txt"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.tsv");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }
}
