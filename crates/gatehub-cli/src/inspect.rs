//! Filesystem inspector for the determinism verifier.
//!
//! Describes a built artifact directory (or single file) structurally:
//! every entry's relative path, size, and content hash, sorted by path.
//! Variants map to subdirectories of the artifact path; the default
//! variant inspects the path itself.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gatehub_core::determinism::{ArtifactInspector, InspectError, DEFAULT_VARIANT};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub struct PathInspector;

impl PathInspector {
    fn variant_root(artifact_ref: &str, variant: &str) -> PathBuf {
        let base = PathBuf::from(artifact_ref);
        if variant == DEFAULT_VARIANT {
            base
        } else {
            base.join(variant)
        }
    }
}

#[async_trait]
impl ArtifactInspector for PathInspector {
    async fn inspect(&self, artifact_ref: &str, variant: &str) -> Result<Value, InspectError> {
        let root = Self::variant_root(artifact_ref, variant);
        if !root.exists() {
            return Err(InspectError::Unavailable(format!(
                "{} does not exist",
                root.display()
            )));
        }

        let mut entries = Vec::new();
        describe(&root, &root, &mut entries)
            .map_err(|e| InspectError::Malformed(e.to_string()))?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let entries: Vec<Value> = entries
            .into_iter()
            .map(|(path, size, sha256)| json!({"path": path, "size": size, "sha256": sha256}))
            .collect();
        Ok(json!({
            "artifact": artifact_ref,
            "variant": variant,
            "entries": entries,
        }))
    }
}

fn describe(
    root: &Path,
    path: &Path,
    entries: &mut Vec<(String, u64, String)>,
) -> std::io::Result<()> {
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            describe(root, &entry?.path(), entries)?;
        }
        return Ok(());
    }
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();
    entries.push((relative, bytes.len() as u64, hex(&hasher.finalize())));
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
