//! Package loader
//!
//! Loads a package after its dependencies (depth-first, memoized by path),
//! builds it when its build output is stale, runs its main module through
//! the [`ModuleHost`] and records which modules that pulled in so unloading
//! can evict exactly those.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::discovery::{self, PackageIndex};
use super::host::{ModuleHost, PackageBuilder, PackageModule};
use super::manifest::{PackageManifest, MANIFEST_FILE};
use super::PackageError;
use crate::config::PackageConfig;
use crate::events::EventSink;
use crate::ipc::Address;

/// Broadcast after a package is registered; args `[name, path]`
pub const PACKAGE_LOADED: &str = "package:loaded";

/// Broadcast after a package is removed; args `[name, path]`
pub const PACKAGE_UNLOADED: &str = "package:unloaded";

/// Lifecycle state of a package directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    Discovered,
    Resolving,
    Building,
    Loading,
    Loaded,
    Unloading,
    Unloaded,
    Errored,
}

/// A registered package
pub struct LoadedPackage {
    pub manifest: PackageManifest,
    /// Modules the main module pulled into the host
    pub modules: BTreeSet<String>,
    pub loaded_at: DateTime<Utc>,
    module: Option<Box<dyn PackageModule>>,
}

/// Loads and unloads packages for one process
pub struct PackageLoader {
    config: PackageConfig,
    host: Arc<dyn ModuleHost>,
    builder: Arc<dyn PackageBuilder>,
    sink: Arc<dyn EventSink>,
    index: PackageIndex,
    loaded: HashMap<PathBuf, LoadedPackage>,
    names: HashMap<String, PathBuf>,
    /// Load order, used for listing and reverse unloading
    order: Vec<PathBuf>,
    states: HashMap<PathBuf, PackageState>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

fn key_for(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl PackageLoader {
    pub fn new(
        config: PackageConfig,
        host: Arc<dyn ModuleHost>,
        builder: Arc<dyn PackageBuilder>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            host,
            builder,
            sink,
            index: PackageIndex::default(),
            loaded: HashMap::new(),
            names: HashMap::new(),
            order: Vec::new(),
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PackageConfig {
        &self.config
    }

    /// Rescan the search paths; returns the number of packages found
    pub fn discover(&mut self) -> Result<usize, PackageError> {
        self.index = discovery::discover(&self.config.search_paths)?;
        for manifest in self.index.manifests() {
            self.states
                .entry(manifest.path.clone())
                .or_insert(PackageState::Discovered);
        }
        info!("Discovered {} package(s)", self.index.len());
        Ok(self.index.len())
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    /// Load the package at `path` and, first, everything it depends on
    pub async fn load(&mut self, path: &Path) -> Result<PackageManifest, PackageError> {
        let mut stack = Vec::new();
        self.load_inner(path.to_path_buf(), &mut stack).await
    }

    /// Load a discovered package by name
    pub async fn load_by_name(&mut self, name: &str) -> Result<PackageManifest, PackageError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| PackageError::UnknownPackage(name.to_string()))?;
        self.load(&path).await
    }

    /// Load every discovered package; failures are collected, not fatal
    pub async fn load_all(&mut self) -> Vec<(String, PackageError)> {
        let names: Vec<String> = self.index.names().map(str::to_string).collect();
        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.load_by_name(&name).await {
                warn!("Failed to load {}: {}", name, e);
                failures.push((name, e));
            }
        }
        failures
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.names
            .get(name)
            .cloned()
            .or_else(|| self.index.path_of(name).map(Path::to_path_buf))
    }

    fn set_state(&mut self, path: &Path, state: PackageState) {
        self.states.insert(path.to_path_buf(), state);
    }

    fn load_inner<'a>(
        &'a mut self,
        dir: PathBuf,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<PackageManifest, PackageError>> {
        Box::pin(async move {
            let manifest = match PackageManifest::load(&dir) {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!("Failed to read package at {}: {}", dir.display(), e);
                    self.set_state(&key_for(&dir), PackageState::Errored);
                    return Err(e);
                }
            };
            let key = manifest.path.clone();

            if let Some(existing) = self.loaded.get(&key) {
                return Ok(existing.manifest.clone());
            }

            if let Some(start) = stack.iter().position(|name| *name == manifest.name) {
                let mut chain = stack[start..].to_vec();
                chain.push(manifest.name.clone());
                self.set_state(&key, PackageState::Errored);
                return Err(PackageError::DependencyCycle { chain });
            }

            stack.push(manifest.name.clone());
            let result = self.load_resolved(manifest, stack).await;
            stack.pop();

            if let Err(e) = &result {
                error!("Failed to load package at {}: {}", key.display(), e);
                self.set_state(&key, PackageState::Errored);
            }
            result
        })
    }

    async fn load_resolved(
        &mut self,
        manifest: PackageManifest,
        stack: &mut Vec<String>,
    ) -> Result<PackageManifest, PackageError> {
        let key = manifest.path.clone();
        self.set_state(&key, PackageState::Resolving);

        if let Some(other) = self.names.get(&manifest.name) {
            return Err(PackageError::DuplicatePackage {
                name: manifest.name.clone(),
                first: other.clone(),
                second: key,
            });
        }

        for dependency in manifest.dependencies.keys() {
            let path = self
                .resolve(dependency)
                .ok_or_else(|| PackageError::MissingDependency {
                    package: manifest.name.clone(),
                    dependency: dependency.clone(),
                })?;
            debug!("{} requires {}", manifest.name, dependency);
            self.load_inner(path, stack).await?;
        }

        for host in manifest.hosts.keys() {
            if !self.config.hosts.contains_key(host) && !self.names.contains_key(host) {
                return Err(PackageError::UnsupportedHost {
                    package: manifest.name.clone(),
                    host: host.clone(),
                });
            }
        }

        let root = if manifest.build {
            self.set_state(&key, PackageState::Building);
            self.build_if_stale(&manifest).await?
        } else {
            key.clone()
        };

        self.set_state(&key, PackageState::Loading);
        let (module, modules) = self.load_main(&manifest, &root)?;

        self.loaded.insert(
            key.clone(),
            LoadedPackage {
                manifest: manifest.clone(),
                modules,
                loaded_at: Utc::now(),
                module,
            },
        );
        self.names.insert(manifest.name.clone(), key.clone());
        self.order.push(key.clone());
        self.set_state(&key, PackageState::Loaded);
        info!("Loaded package {}@{}", manifest.name, manifest.version);

        self.broadcast(PACKAGE_LOADED, &manifest).await;
        Ok(manifest)
    }

    /// Directory holding build output for `manifest`
    pub fn build_dir(&self, manifest: &PackageManifest) -> PathBuf {
        self.config.build_root.join(&manifest.name)
    }

    fn built_version(dest: &Path) -> Option<String> {
        let raw = fs::read_to_string(dest.join(MANIFEST_FILE)).ok()?;
        let value: Value = serde_json::from_str(&raw).ok()?;
        value.get("version")?.as_str().map(str::to_string)
    }

    async fn build_if_stale(&self, manifest: &PackageManifest) -> Result<PathBuf, PackageError> {
        let dest = self.build_dir(manifest);
        let current = Self::built_version(&dest).as_deref() == Some(manifest.version.as_str());
        if current && !self.config.force_build {
            debug!("Build of {} is up to date", manifest.name);
            return Ok(dest);
        }
        self.run_build(manifest, &dest).await?;
        Ok(dest)
    }

    async fn run_build(&self, manifest: &PackageManifest, dest: &Path) -> Result<(), PackageError> {
        info!("Building {} into {}", manifest.name, dest.display());
        fs::create_dir_all(dest).map_err(|e| PackageError::io(dest, e))?;

        self.builder
            .build(manifest, dest)
            .await
            .map_err(|reason| PackageError::BuildFailed {
                package: manifest.name.clone(),
                reason,
            })?;

        let built = serde_json::to_string_pretty(&manifest.to_built()).map_err(|e| {
            PackageError::BuildFailed {
                package: manifest.name.clone(),
                reason: e.to_string(),
            }
        })?;
        let file = dest.join(MANIFEST_FILE);
        fs::write(&file, built).map_err(|e| PackageError::io(&file, e))
    }

    /// Build a package regardless of its `build` flag or recorded version
    pub async fn build(&mut self, path: &Path) -> Result<PathBuf, PackageError> {
        let manifest = PackageManifest::load(path)?;
        let dest = self.build_dir(&manifest);
        self.set_state(&manifest.path, PackageState::Building);
        match self.run_build(&manifest, &dest).await {
            Ok(()) => {
                let state = if self.loaded.contains_key(&manifest.path) {
                    PackageState::Loaded
                } else {
                    PackageState::Discovered
                };
                self.set_state(&manifest.path, state);
                Ok(dest)
            }
            Err(e) => {
                self.set_state(&manifest.path, PackageState::Errored);
                Err(e)
            }
        }
    }

    /// Run the main module; host and hook panics stop here
    #[allow(clippy::type_complexity)]
    fn load_main(
        &self,
        manifest: &PackageManifest,
        root: &Path,
    ) -> Result<(Option<Box<dyn PackageModule>>, BTreeSet<String>), PackageError> {
        let Some(main) = &manifest.main else {
            return Ok((None, BTreeSet::new()));
        };
        let entry = root.join(main);
        let host = self.host.clone();
        let before = host.loaded_modules();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut module = host.load_main(manifest, &entry)?;
            module.on_load()?;
            Ok::<_, String>(module)
        }))
        .unwrap_or_else(|payload| Err(panic_message(payload)));

        let after = host.loaded_modules();
        let modules: BTreeSet<String> = after.difference(&before).cloned().collect();

        match outcome {
            Ok(module) => Ok((Some(module), modules)),
            Err(reason) => {
                host.evict(&modules);
                Err(PackageError::MainModule {
                    package: manifest.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Unload one package; packages depending on it stay loaded
    pub async fn unload(&mut self, path: &Path) -> Result<PackageManifest, PackageError> {
        let key = key_for(path);
        let Some(mut package) = self.loaded.remove(&key) else {
            return Err(PackageError::NotLoaded(key));
        };
        self.set_state(&key, PackageState::Unloading);

        if let Some(module) = package.module.as_mut() {
            let hook = panic::catch_unwind(AssertUnwindSafe(|| module.on_unload()))
                .unwrap_or_else(|payload| Err(panic_message(payload)));
            if let Err(reason) = hook {
                warn!("Unload hook of {} failed: {}", package.manifest.name, reason);
            }
        }

        self.names.remove(&package.manifest.name);
        self.order.retain(|p| *p != key);
        self.host.evict(&package.modules);
        self.set_state(&key, PackageState::Unloaded);
        info!("Unloaded package {}", package.manifest.name);

        self.broadcast(PACKAGE_UNLOADED, &package.manifest).await;
        Ok(package.manifest)
    }

    /// Unload everything, most recently loaded first
    pub async fn unload_all(&mut self) -> Vec<(PathBuf, PackageError)> {
        let mut failures = Vec::new();
        while let Some(path) = self.order.last().cloned() {
            if let Err(e) = self.unload(&path).await {
                self.order.retain(|p| *p != path);
                failures.push((path, e));
            }
        }
        failures
    }

    async fn broadcast(&self, channel: &str, manifest: &PackageManifest) {
        let args = vec![
            Value::from(manifest.name.as_str()),
            Value::from(manifest.path.display().to_string()),
        ];
        if let Err(e) = self.sink.emit(Address::AllWindows, channel, args).await {
            warn!("Failed to broadcast {}: {}", channel, e);
        }
    }

    /// Loaded manifests in load order
    pub fn loaded(&self) -> Vec<&PackageManifest> {
        self.order
            .iter()
            .filter_map(|path| self.loaded.get(path))
            .map(|p| &p.manifest)
            .collect()
    }

    pub fn get(&self, path: &Path) -> Option<&LoadedPackage> {
        self.loaded.get(&key_for(path))
    }

    /// Loaded package by name
    pub fn find(&self, name: &str) -> Option<&PackageManifest> {
        let path = self.names.get(name)?;
        self.loaded.get(path).map(|p| &p.manifest)
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.loaded.contains_key(&key_for(path))
    }

    pub fn state(&self, path: &Path) -> Option<PackageState> {
        self.states.get(&key_for(path)).copied()
    }
}
