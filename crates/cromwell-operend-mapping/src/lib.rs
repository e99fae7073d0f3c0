#![forbid(unsafe_code)]
//! Mapping manifests and the checks that run before anything is posted.

mod manifest;
mod validate;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub use manifest::{FieldMapping, ManifestError, MappingManifest, MappingRole};
pub use validate::{ValidationError, Validator};

/// Load a mapping manifest JSON file from disk.
///
/// # Errors
/// Returns an error when the file cannot be read, is not JSON, or is not a
/// valid manifest.
pub fn load_manifest_from_path(path: &Path) -> Result<MappingManifest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading manifest {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("manifest {} is not valid JSON", path.display()))?;
    Ok(MappingManifest::from_json(&raw)?)
}
