//! Module host and builder used outside the GUI
//!
//! The CLI can't evaluate package code, so its host only checks that a main
//! module exists and tracks it as resident. Builds run the configured build
//! command, or copy the package sources when none is set.

use async_trait::async_trait;
use easel_core::packages::{ModuleHost, PackageBuilder, PackageManifest, PackageModule};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, info};

/// Tracks main modules by path
#[derive(Default)]
pub struct FileModuleHost {
    resident: Mutex<BTreeSet<String>>,
}

struct FileModule {
    package: String,
    entry: PathBuf,
}

impl PackageModule for FileModule {
    fn on_load(&mut self) -> Result<(), String> {
        debug!("{} ready ({})", self.package, self.entry.display());
        Ok(())
    }

    fn on_unload(&mut self) -> Result<(), String> {
        debug!("{} released", self.package);
        Ok(())
    }
}

impl ModuleHost for FileModuleHost {
    fn loaded_modules(&self) -> BTreeSet<String> {
        self.resident
            .lock()
            .map(|resident| resident.clone())
            .unwrap_or_default()
    }

    fn load_main(
        &self,
        manifest: &PackageManifest,
        entry: &Path,
    ) -> Result<Box<dyn PackageModule>, String> {
        if !entry.is_file() {
            return Err(format!("main module not found: {}", entry.display()));
        }
        self.resident
            .lock()
            .map_err(|e| e.to_string())?
            .insert(entry.display().to_string());

        Ok(Box::new(FileModule {
            package: manifest.name.clone(),
            entry: entry.to_path_buf(),
        }))
    }

    fn evict(&self, modules: &BTreeSet<String>) {
        if let Ok(mut resident) = self.resident.lock() {
            resident.retain(|m| !modules.contains(m));
        }
    }
}

/// Runs `build_command` in the package directory
///
/// The command sees `EASEL_PACKAGE_DIR`, `EASEL_BUILD_DIR` and
/// `EASEL_PACKAGE_VERSION`.
pub struct ScriptBuilder {
    command: Vec<String>,
}

impl ScriptBuilder {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PackageBuilder for ScriptBuilder {
    async fn build(&self, manifest: &PackageManifest, dest: &Path) -> Result<(), String> {
        let Some((program, args)) = self.command.split_first() else {
            let src = manifest.path.clone();
            let dest = dest.to_path_buf();
            return tokio::task::spawn_blocking(move || copy_dir(&src, &dest))
                .await
                .map_err(|e| format!("copy task failed: {e}"))?
                .map_err(|e| format!("copy failed: {e}"));
        };

        info!("Running {} for {}", program, manifest.name);
        let output = Command::new(program)
            .args(args)
            .current_dir(&manifest.path)
            .env("EASEL_PACKAGE_DIR", &manifest.path)
            .env("EASEL_BUILD_DIR", dest)
            .env("EASEL_PACKAGE_VERSION", &manifest.version)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to spawn '{program}': {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!("'{program}' exited with {}: {}", output.status, stderr.trim()))
        }
    }
}

/// Copy a directory tree; the destination's own contents are left alone
fn copy_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from == dest {
            continue;
        }
        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
