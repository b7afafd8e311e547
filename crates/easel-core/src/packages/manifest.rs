//! Package manifest (`package.json`)

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::PackageError;

/// Manifest file name looked up in every package directory
pub const MANIFEST_FILE: &str = "package.json";

/// Parsed package manifest
///
/// Fields the loader doesn't interpret (`panel`, `description`, ...) are kept
/// in `extra` and survive a rewrite of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    pub name: String,

    pub version: String,

    /// Package name to version range
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// Host name to version range
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hosts: BTreeMap<String, String>,

    /// Entry module, relative to the package (or build) directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Whether the package must be built before loading
    #[serde(default, deserialize_with = "truthy", skip_serializing_if = "is_false")]
    pub build: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Canonical package directory; identity of the package
    #[serde(skip)]
    pub path: PathBuf,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accepts any JSON value for flags, the way hand-written manifests use them
fn truthy<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

impl PackageManifest {
    /// Read and validate `<dir>/package.json`
    pub fn load(dir: &Path) -> Result<Self, PackageError> {
        let file = dir.join(MANIFEST_FILE);
        if !file.is_file() {
            return Err(PackageError::ManifestNotFound(dir.to_path_buf()));
        }

        let raw = fs::read_to_string(&file).map_err(|e| PackageError::io(&file, e))?;
        let mut manifest = Self::parse(&raw).map_err(|reason| PackageError::InvalidManifest {
            path: file.clone(),
            reason,
        })?;
        manifest.path = fs::canonicalize(dir).map_err(|e| PackageError::io(dir, e))?;
        Ok(manifest)
    }

    /// Parse manifest text; `path` is left empty
    pub fn parse(raw: &str) -> Result<Self, String> {
        let manifest: Self = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.name.contains(|c: char| c == '/' || c == '\\') {
            return Err(format!("name '{}' must not contain path separators", self.name));
        }
        if self.version.trim().is_empty() {
            return Err("version must not be empty".to_string());
        }
        if let Some(main) = &self.main {
            if main.trim().is_empty() {
                return Err("main must not be empty when present".to_string());
            }
        }
        Ok(())
    }

    /// Manifest written into the build output: same fields, `build` stripped
    pub fn to_built(&self) -> Value {
        let mut built = self.clone();
        built.build = false;
        serde_json::to_value(&built).unwrap_or(Value::Null)
    }

    /// Extra manifest field, e.g. `panel`
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
