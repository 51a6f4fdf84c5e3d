//! Mod manifest parsing.
//!
//! Each mod directory carries a `mod.toml` that describes its identity,
//! relations, permissions, ordering constraints and entry groups. The
//! manifest is converted into a [`ModUnit`], which is all the rest of the
//! runtime sees.

use crate::error::{RuntimeError, RuntimeResult};
use crate::unit::{LoadConstraint, ModUnit, Relation, RelationKind};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the manifest inside a mod directory.
pub const MANIFEST_FILE: &str = "mod.toml";

/// Mod manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModManifest {
    /// Mod metadata.
    #[serde(rename = "mod")]
    pub metadata: ModMetadata,

    /// Declared relations to other mods.
    #[serde(default)]
    pub relations: Vec<RelationEntry>,

    /// Ordering directives.
    #[serde(default)]
    pub load: LoadSection,

    /// Entry groups: group name to fully qualified type names.
    #[serde(default)]
    pub entrypoints: BTreeMap<String, Vec<String>>,
}

/// Mod metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModMetadata {
    /// Unique identifier for the mod.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Version string (semver).
    pub version: String,

    /// Alternate ids this mod answers to.
    #[serde(default)]
    pub provides: Vec<String>,

    /// Mod description.
    #[serde(default)]
    pub description: Option<String>,

    /// Mod author(s).
    #[serde(default)]
    pub authors: Vec<String>,

    /// License identifier.
    #[serde(default)]
    pub license: Option<String>,

    /// Requested permission ids.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Compiled code units, relative to the mod directory.
    #[serde(default)]
    pub code: Vec<String>,
}

/// One `[[relations]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEntry {
    pub kind: RelationKind,
    pub id: String,
    /// Version requirement; any version when absent.
    #[serde(default)]
    pub version: Option<String>,
}

/// The `[load]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSection {
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

impl ModManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a manifest from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> RuntimeResult<Self> {
        let manifest: ModManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    fn validate(&self) -> RuntimeResult<()> {
        if self.metadata.id.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Mod ID cannot be empty".to_string(),
            ));
        }

        if self.metadata.name.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Mod name cannot be empty".to_string(),
            ));
        }

        Version::parse(&self.metadata.version).map_err(|e| {
            RuntimeError::InvalidManifest(format!(
                "Invalid version '{}' for mod '{}': {}",
                self.metadata.version, self.metadata.id, e
            ))
        })?;

        for relation in &self.relations {
            if relation.id == self.metadata.id {
                return Err(RuntimeError::InvalidManifest(format!(
                    "Mod '{}' declares a {} relation on itself",
                    self.metadata.id,
                    relation.kind.as_str()
                )));
            }
            if let Some(req) = &relation.version {
                VersionReq::parse(req).map_err(|e| {
                    RuntimeError::InvalidManifest(format!(
                        "Invalid version requirement '{}' on {}: {}",
                        req, relation.id, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Convert the manifest into a [`ModUnit`].
    pub fn into_unit(self) -> RuntimeResult<ModUnit> {
        let version = Version::parse(&self.metadata.version)?;
        let mut unit = ModUnit::new(self.metadata.id, version);
        unit.name = self.metadata.name;
        unit.description = self.metadata.description;
        unit.provides = self.metadata.provides;
        unit.permissions = self.metadata.permissions.into_iter().collect();
        unit.code_units = self.metadata.code;
        unit.entry_groups = self.entrypoints;

        for entry in self.relations {
            let version = match entry.version {
                Some(req) => VersionReq::parse(&req)?,
                None => VersionReq::STAR,
            };
            unit.relations.push(Relation {
                kind: entry.kind,
                target: entry.id,
                version,
            });
        }

        if self.load.first {
            unit.load_constraints.push(LoadConstraint::First);
        }
        if self.load.last {
            unit.load_constraints.push(LoadConstraint::Last);
        }
        unit.load_constraints
            .extend(self.load.before.into_iter().map(LoadConstraint::Before));
        unit.load_constraints
            .extend(self.load.after.into_iter().map(LoadConstraint::After));

        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let toml = r#"
[mod]
id = "better-maps"
name = "Better Maps"
version = "1.4.2"
provides = ["maps"]
permissions = ["network.http", "filesystem.read"]
code = ["better_maps.mfc"]

[[relations]]
kind = "depends"
id = "core-lib"
version = ">=1.0.0"

[[relations]]
kind = "breaks"
id = "old-maps"

[load]
first = true
after = ["core-lib"]

[entrypoints]
main = ["BetterMaps.Main"]
client = ["BetterMaps.Hud", "BetterMaps.Minimap"]
"#;

        let manifest = ModManifest::from_str(toml).unwrap();
        assert_eq!(manifest.metadata.id, "better-maps");
        assert_eq!(manifest.relations.len(), 2);

        let unit = manifest.into_unit().unwrap();
        assert_eq!(unit.id(), "better-maps");
        assert_eq!(unit.version(), &Version::new(1, 4, 2));
        assert!(unit.answers_to("maps"));
        assert!(unit.permissions.contains("network.http"));
        assert!(unit.is_flagged_first());
        assert!(!unit.is_flagged_last());
        assert!(unit
            .load_constraints
            .contains(&LoadConstraint::After("core-lib".to_string())));
        assert_eq!(unit.entry_groups["client"].len(), 2);

        let breaks = unit.relations_of(RelationKind::Breaks).next().unwrap();
        assert_eq!(breaks.target, "old-maps");
        assert_eq!(breaks.version, VersionReq::STAR);
    }

    #[test]
    fn test_invalid_manifest() {
        let toml = r#"
[mod]
id = ""
name = "Test"
version = "0.1.0"
"#;

        let result = ModManifest::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_version_requirement() {
        let toml = r#"
[mod]
id = "a"
name = "A"
version = "0.1.0"

[[relations]]
kind = "depends"
id = "b"
version = "not a range"
"#;

        assert!(matches!(
            ModManifest::from_str(toml),
            Err(RuntimeError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_self_relation_rejected() {
        let toml = r#"
[mod]
id = "a"
name = "A"
version = "0.1.0"

[[relations]]
kind = "conflicts"
id = "a"
"#;

        assert!(ModManifest::from_str(toml).is_err());
    }
}
