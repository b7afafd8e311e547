//! Package system
//!
//! A package is a directory holding a `package.json` manifest and, usually,
//! a main module. This module provides:
//! - `manifest`: manifest parsing and validation
//! - `discovery`: scanning search paths for packages
//! - `host`: the seams to the module host and the build collaborator
//! - `loader`: dependency resolution, build-on-demand and load/unload

pub mod discovery;
pub mod host;
pub mod loader;
pub mod manifest;

pub use discovery::{discover, PackageIndex};
pub use host::{ModuleHost, PackageBuilder, PackageModule};
pub use loader::{LoadedPackage, PackageLoader, PackageState, PACKAGE_LOADED, PACKAGE_UNLOADED};
pub use manifest::{PackageManifest, MANIFEST_FILE};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering, building or loading packages
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("No {} in {}", MANIFEST_FILE, .0.display())]
    ManifestNotFound(PathBuf),

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Package '{package}' depends on '{dependency}', which was not found")]
    MissingDependency { package: String, dependency: String },

    #[error("Dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("Package '{package}' requires unsupported host '{host}'")]
    UnsupportedHost { package: String, host: String },

    #[error("Duplicate package '{name}' in {} and {}", .first.display(), .second.display())]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Build of '{package}' failed: {reason}")]
    BuildFailed { package: String, reason: String },

    #[error("Main module of '{package}' failed: {reason}")]
    MainModule { package: String, reason: String },

    #[error("Package not loaded: {}", .0.display())]
    NotLoaded(PathBuf),

    #[error("Unknown package: {0}")]
    UnknownPackage(String),
}

impl PackageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackageError::Io {
            path: path.into(),
            source,
        }
    }
}
