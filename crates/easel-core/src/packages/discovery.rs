//! Search-path scanning

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::manifest::{PackageManifest, MANIFEST_FILE};
use super::PackageError;

/// Packages found on the search paths, by name
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    by_name: BTreeMap<String, PackageManifest>,
}

impl PackageIndex {
    pub fn get(&self, name: &str) -> Option<&PackageManifest> {
        self.by_name.get(name)
    }

    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.by_name.get(name).map(|m| m.path.as_path())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn manifests(&self) -> impl Iterator<Item = &PackageManifest> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn insert(&mut self, manifest: PackageManifest) -> Result<(), PackageError> {
        if let Some(existing) = self.by_name.get(&manifest.name) {
            if existing.path != manifest.path {
                return Err(PackageError::DuplicatePackage {
                    name: manifest.name.clone(),
                    first: existing.path.clone(),
                    second: manifest.path,
                });
            }
            return Ok(());
        }
        self.by_name.insert(manifest.name.clone(), manifest);
        Ok(())
    }
}

/// Scan every root one level deep for `<dir>/package.json`
///
/// Missing roots and malformed manifests are logged and skipped; the same
/// name appearing in two directories is an error.
pub fn discover(roots: &[PathBuf]) -> Result<PackageIndex, PackageError> {
    let mut index = PackageIndex::default();

    for root in roots {
        if !root.is_dir() {
            warn!("Package search path does not exist: {}", root.display());
            continue;
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(root)
            .map_err(|e| PackageError::io(root, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .collect();
        dirs.sort();

        for dir in dirs {
            match PackageManifest::load(&dir) {
                Ok(manifest) => {
                    debug!("Discovered {} at {}", manifest.name, manifest.path.display());
                    index.insert(manifest)?;
                }
                Err(e) => warn!("Skipping {}: {}", dir.display(), e),
            }
        }
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_package(root: &Path, dir: &str, body: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn test_discover_one_level_deep() {
        let root = tempfile::tempdir().unwrap();
        write_package(root.path(), "a", r#"{"name": "alpha", "version": "1"}"#);
        write_package(root.path(), "b", r#"{"name": "beta", "version": "1"}"#);
        write_package(root.path(), "b/nested", r#"{"name": "nested", "version": "1"}"#);
        fs::create_dir_all(root.path().join("empty")).unwrap();

        let index = discover(&[root.path().to_path_buf()]).unwrap();
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert!(index.get("nested").is_none());
        assert_eq!(
            index.path_of("alpha").unwrap(),
            fs::canonicalize(root.path().join("a")).unwrap()
        );
    }

    #[test]
    fn test_discover_skips_bad_manifests_and_missing_roots() {
        let root = tempfile::tempdir().unwrap();
        write_package(root.path(), "good", r#"{"name": "good", "version": "1"}"#);
        write_package(root.path(), "bad", "{ nope");

        let index = discover(&[
            root.path().join("does-not-exist"),
            root.path().to_path_buf(),
        ])
        .unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get("good").is_some());
    }

    #[test]
    fn test_duplicate_names_across_roots() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_package(first.path(), "p", r#"{"name": "same", "version": "1"}"#);
        write_package(second.path(), "p", r#"{"name": "same", "version": "2"}"#);

        let err = discover(&[first.path().to_path_buf(), second.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, PackageError::DuplicatePackage { ref name, .. } if name == "same"));
    }

    #[test]
    fn test_same_root_twice_is_not_a_duplicate() {
        let root = tempfile::tempdir().unwrap();
        write_package(root.path(), "p", r#"{"name": "p", "version": "1"}"#);

        let roots = vec![root.path().to_path_buf(), root.path().to_path_buf()];
        assert_eq!(discover(&roots).unwrap().len(), 1);
    }
}
