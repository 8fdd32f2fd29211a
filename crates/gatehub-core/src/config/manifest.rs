//! Hub manifest: the root document naming units and their layer stacks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigLayer, LayerSource};

/// Root manifest for one hub: global settings plus the managed units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubManifest {
    /// Hub-wide settings.
    pub hub: HubSection,

    /// Managed units, one per target repository.
    #[serde(default)]
    pub units: Vec<UnitEntry>,
}

/// Hub-wide settings section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSection {
    /// Path to the shared defaults layer, relative to the manifest.
    pub defaults: PathBuf,

    /// Directory where run records, result records, and verdicts land.
    #[serde(default = "default_evidence_dir")]
    pub evidence_dir: PathBuf,

    /// Cap on simultaneously running dispatches.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("evidence")
}

const fn default_max_concurrent() -> usize {
    4
}

/// One managed unit and its override layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitEntry {
    /// Unit name; must match the `unit` identity field its layers set.
    pub name: String,

    /// Ordered override layer paths, relative to the manifest. Later paths
    /// take precedence.
    #[serde(default)]
    pub layers: Vec<PathBuf>,
}

impl HubManifest {
    /// Load a manifest from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            name: path.display().to_string(),
            source,
        })
    }

    /// Names of all managed units, in manifest order.
    #[must_use]
    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }
}

/// Filesystem-backed layer source: defaults layer first, then the unit's
/// override layers in manifest order.
#[derive(Debug, Clone)]
pub struct FsLayerSource {
    root: PathBuf,
    manifest: HubManifest,
}

impl FsLayerSource {
    /// Create a source resolving layer paths relative to `root` (normally
    /// the manifest's directory).
    #[must_use]
    pub fn new(root: PathBuf, manifest: HubManifest) -> Self {
        Self { root, manifest }
    }

    fn load_layer(&self, path: &Path) -> Result<ConfigLayer, ConfigError> {
        let full = self.root.join(path);
        let content = std::fs::read_to_string(&full)?;
        ConfigLayer::from_toml(&full.display().to_string(), &content)
    }
}

impl LayerSource for FsLayerSource {
    fn layers_for(&self, unit: &str) -> Result<Vec<ConfigLayer>, ConfigError> {
        let entry = self
            .manifest
            .units
            .iter()
            .find(|u| u.name == unit)
            .ok_or_else(|| ConfigError::UnknownUnit {
                name: unit.to_string(),
            })?;

        let mut layers = vec![self.load_layer(&self.manifest.hub.defaults)?];
        for path in &entry.layers {
            layers.push(self.load_layer(path)?);
        }
        Ok(layers)
    }
}
