//! Mod discovery from well-known paths.
//!
//! Mods are discovered from the following locations (in order):
//!
//! 1. `$XDG_DATA_HOME/modforge/mods/` (user mods)
//! 2. Any additional directories supplied by the host
//!
//! Each mod is a directory containing a `mod.toml` file.

use crate::error::{RuntimeError, RuntimeResult};
use crate::manifest::{ModManifest, MANIFEST_FILE};
use crate::unit::{MetadataProvider, ModUnit};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Information about a discovered mod.
#[derive(Debug, Clone)]
pub struct ModPath {
    /// Path to the mod directory.
    pub path: PathBuf,

    /// Parsed manifest.
    pub manifest: ModManifest,
}

impl ModPath {
    /// Get the mod ID.
    pub fn id(&self) -> &str {
        &self.manifest.metadata.id
    }

    /// Get the mod version.
    pub fn version(&self) -> &str {
        &self.manifest.metadata.version
    }

    /// Get the path to the manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Convert into a [`ModUnit`] rooted at the mod directory.
    pub fn into_unit(self) -> RuntimeResult<ModUnit> {
        let manifest_path = self.manifest_path();
        let mut unit = self.manifest.into_unit()?;
        unit.root = Some(self.path);
        unit.manifest_path = Some(manifest_path);
        Ok(unit)
    }
}

/// Get the user mods directory.
pub fn user_mods_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "raibid-labs", "modforge")
        .map(|dirs| dirs.data_dir().join("mods"))
}

/// Discover all mods from the user directory and `extra_dirs`.
///
/// Fails with [`RuntimeError::Discovery`] listing every unreadable manifest
/// and every id found more than once.
pub fn discover_mods(extra_dirs: &[PathBuf]) -> RuntimeResult<Vec<ModPath>> {
    let mut dirs = Vec::with_capacity(extra_dirs.len() + 1);
    if let Some(user_dir) = user_mods_dir() {
        dirs.push(user_dir);
    }
    dirs.extend(extra_dirs.iter().cloned());
    scan_directories(&dirs)
}

fn scan_directories(dirs: &[PathBuf]) -> RuntimeResult<Vec<ModPath>> {
    let mut mods = Vec::new();
    let mut seen_ids = HashMap::new();
    let mut problems = Vec::new();

    for dir in dirs {
        debug!("Scanning mods directory: {:?}", dir);
        discover_in_directory(dir, &mut mods, &mut seen_ids, &mut problems);
    }

    if !problems.is_empty() {
        return Err(RuntimeError::Discovery(problems));
    }

    info!("Discovered {} mods", mods.len());
    Ok(mods)
}

/// Discover mods in a specific directory.
///
/// Mods are appended to `mods`. Broken manifests and ids already present in
/// `seen_ids` are appended to `problems` instead.
pub fn discover_in_directory(
    dir: &Path,
    mods: &mut Vec<ModPath>,
    seen_ids: &mut HashMap<String, PathBuf>,
    problems: &mut Vec<String>,
) {
    if !dir.exists() {
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Failed to read mods directory {:?}: {}", dir, e);
            problems.push(format!("{}: {}", dir.display(), e));
            return;
        }
    };

    // read_dir order is platform dependent
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if !path.is_dir() {
            continue;
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            debug!("Skipping {:?}: no {}", path, MANIFEST_FILE);
            continue;
        }

        match ModManifest::from_file(&manifest_path) {
            Ok(manifest) => {
                let id = manifest.metadata.id.clone();

                if let Some(first) = seen_ids.get(&id) {
                    warn!("Duplicate mod id '{}' at {:?}", id, path);
                    problems.push(format!(
                        "duplicate mod id '{}' in {} and {}",
                        id,
                        first.display(),
                        path.display()
                    ));
                    continue;
                }

                info!(
                    "Discovered mod: {} v{} at {:?}",
                    manifest.metadata.name, manifest.metadata.version, path
                );

                seen_ids.insert(id, path.clone());
                mods.push(ModPath { path, manifest });
            }
            Err(e) => {
                warn!("Failed to load manifest from {:?}: {}", manifest_path, e);
                problems.push(format!("{}: {}", manifest_path.display(), e));
            }
        }
    }
}

/// Discover a single mod from a path.
pub fn discover_mod(path: &Path) -> RuntimeResult<ModPath> {
    let manifest_path = path.join(MANIFEST_FILE);
    let manifest = ModManifest::from_file(&manifest_path)?;

    Ok(ModPath {
        path: path.to_path_buf(),
        manifest,
    })
}

/// Metadata provider backed by mod directories on disk.
#[derive(Debug, Clone, Default)]
pub struct DirectoryProvider {
    dirs: Vec<PathBuf>,
    include_user_dir: bool,
}

impl DirectoryProvider {
    /// Scan only the given directories.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            include_user_dir: false,
        }
    }

    /// Also scan the user mods directory, ahead of the configured ones.
    pub fn with_user_dir(mut self) -> Self {
        self.include_user_dir = true;
        self
    }
}

impl MetadataProvider for DirectoryProvider {
    fn provide(&self) -> RuntimeResult<Vec<ModUnit>> {
        let discovered = if self.include_user_dir {
            discover_mods(&self.dirs)?
        } else {
            scan_directories(&self.dirs)?
        };

        let mut units = Vec::with_capacity(discovered.len());
        let mut problems = Vec::new();
        for mod_path in discovered {
            let manifest_path = mod_path.manifest_path();
            match mod_path.into_unit() {
                Ok(unit) => units.push(unit),
                Err(e) => problems.push(format!("{}: {}", manifest_path.display(), e)),
            }
        }

        // One unreadable mod aborts the whole batch
        if !problems.is_empty() {
            return Err(RuntimeError::Discovery(problems));
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_mod(dir: &Path, id: &str) {
        let mod_dir = dir.join(id);
        std::fs::create_dir_all(&mod_dir).unwrap();

        let manifest = format!(
            r#"
[mod]
id = "{id}"
name = "Test Mod {id}"
version = "0.1.0"
permissions = ["network"]

[entrypoints]
main = ["{id}.Main"]
"#
        );

        let manifest_path = mod_dir.join(MANIFEST_FILE);
        let mut file = std::fs::File::create(manifest_path).unwrap();
        file.write_all(manifest.as_bytes()).unwrap();
    }

    #[test]
    fn test_discover_in_directory() {
        let temp_dir = TempDir::new().unwrap();

        create_test_mod(temp_dir.path(), "mod-a");
        create_test_mod(temp_dir.path(), "mod-b");

        let mut mods = Vec::new();
        let mut seen = HashMap::new();
        let mut problems = Vec::new();

        discover_in_directory(temp_dir.path(), &mut mods, &mut seen, &mut problems);

        assert!(problems.is_empty());
        assert_eq!(mods.len(), 2);
        assert!(seen.contains_key("mod-a"));
        assert!(seen.contains_key("mod-b"));
        assert_eq!(mods[0].id(), "mod-a");
    }

    #[test]
    fn test_duplicate_id_is_reported() {
        let temp_dir = TempDir::new().unwrap();

        let dir1 = temp_dir.path().join("dir1");
        let dir2 = temp_dir.path().join("dir2");
        std::fs::create_dir_all(&dir1).unwrap();
        std::fs::create_dir_all(&dir2).unwrap();

        create_test_mod(&dir1, "same-id");
        create_test_mod(&dir2, "same-id");

        let mut mods = Vec::new();
        let mut seen = HashMap::new();
        let mut problems = Vec::new();

        discover_in_directory(&dir1, &mut mods, &mut seen, &mut problems);
        discover_in_directory(&dir2, &mut mods, &mut seen, &mut problems);

        assert_eq!(mods.len(), 1);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("same-id"));
    }

    #[test]
    fn test_directory_provider_sets_root() {
        let temp_dir = TempDir::new().unwrap();
        create_test_mod(temp_dir.path(), "rooted");

        let units = DirectoryProvider::new(vec![temp_dir.path().to_path_buf()])
            .provide()
            .unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].root.as_deref(), Some(temp_dir.path().join("rooted").as_path()));
        assert!(units[0].manifest_path.as_ref().unwrap().ends_with(MANIFEST_FILE));
    }
}
