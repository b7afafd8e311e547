//! Seams to the module host and the build step
//!
//! The loader never evaluates code or runs build tools itself. A
//! [`ModuleHost`] loads a package's main module and reports which modules
//! are resident; a [`PackageBuilder`] produces build output.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;

use super::manifest::PackageManifest;

/// A loaded main module with optional lifecycle hooks
pub trait PackageModule: Send + Sync {
    fn on_load(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn on_unload(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Loads and evicts main modules
pub trait ModuleHost: Send + Sync {
    /// Identifiers of every module currently resident
    fn loaded_modules(&self) -> BTreeSet<String>;

    /// Load the module at `entry` for `manifest`
    fn load_main(
        &self,
        manifest: &PackageManifest,
        entry: &Path,
    ) -> Result<Box<dyn PackageModule>, String>;

    /// Drop the given modules from the host's cache
    fn evict(&self, modules: &BTreeSet<String>);
}

/// Builds a package into `dest`
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    async fn build(&self, manifest: &PackageManifest, dest: &Path) -> Result<(), String>;
}
