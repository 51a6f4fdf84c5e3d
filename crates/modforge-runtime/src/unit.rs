//! The mod data model.
//!
//! A [`ModUnit`] is the parsed, format-independent description of one mod:
//! its identity, its declared relations to other mods, the permissions it
//! asks for, ordering directives and the entry groups the lifecycle drives.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Kind of a declared relation between two mods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The target must be present for this mod to load.
    Depends,
    /// The target is recommended but optional.
    Recommends,
    /// The target is suggested but optional.
    Suggests,
    /// This mod cannot be loaded together with the target.
    Breaks,
    /// This mod is known to misbehave alongside the target.
    Conflicts,
}

impl RelationKind {
    /// Convert relation kind to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Depends => "depends",
            RelationKind::Recommends => "recommends",
            RelationKind::Suggests => "suggests",
            RelationKind::Breaks => "breaks",
            RelationKind::Conflicts => "conflicts",
        }
    }
}

/// A typed edge from one mod to a target id and version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: String,
    pub version: VersionReq,
}

impl Relation {
    /// Create a relation matching any version of the target.
    pub fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            version: VersionReq::STAR,
        }
    }

    /// Restrict the relation to a version requirement.
    pub fn with_version(mut self, version: VersionReq) -> Self {
        self.version = version;
        self
    }

    /// Check whether a unit satisfies this relation's target.
    pub fn is_satisfied_by(&self, unit: &ModUnit) -> bool {
        unit.answers_to(&self.target) && self.version.matches(&unit.version)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == VersionReq::STAR {
            write!(f, "{} {}", self.kind.as_str(), self.target)
        } else {
            write!(f, "{} {}@{}", self.kind.as_str(), self.target, self.version)
        }
    }
}

/// An ordering-only directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoadConstraint {
    /// Load before every unflagged mod.
    First,
    /// Load after every unflagged mod.
    Last,
    /// Load before the target.
    Before(String),
    /// Load after the target.
    After(String),
}

/// One independently versioned, loadable mod.
#[derive(Debug, Clone)]
pub struct ModUnit {
    id: String,
    version: Version,
    pub provides: Vec<String>,
    pub name: String,
    pub description: Option<String>,
    pub relations: Vec<Relation>,
    pub permissions: BTreeSet<String>,
    pub load_constraints: Vec<LoadConstraint>,
    /// Group name to ordered, fully qualified type names.
    pub entry_groups: BTreeMap<String, Vec<String>>,
    /// Compiled code units, relative to `root`.
    pub code_units: Vec<String>,
    /// Mod directory, when discovered from disk.
    pub root: Option<PathBuf>,
    /// Manifest the unit was read from, used to refresh metadata on reload.
    pub manifest_path: Option<PathBuf>,
}

impl ModUnit {
    /// Create a bare unit with the given identity.
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version,
            provides: Vec::new(),
            description: None,
            relations: Vec::new(),
            permissions: BTreeSet::new(),
            load_constraints: Vec::new(),
            entry_groups: BTreeMap::new(),
            code_units: Vec::new(),
            root: None,
            manifest_path: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Check whether `id` names this unit, either directly or as an alias.
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.provides.iter().any(|p| p == id)
    }

    /// Every id this unit answers to, primary id first.
    pub fn all_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.provides.iter().map(String::as_str))
    }

    /// Relations of one kind.
    pub fn relations_of(&self, kind: RelationKind) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    /// Check whether this unit declares a `depends` relation on `other`.
    pub fn depends_on(&self, other: &ModUnit) -> bool {
        self.relations_of(RelationKind::Depends)
            .any(|r| r.is_satisfied_by(other))
    }

    pub fn is_flagged_first(&self) -> bool {
        self.load_constraints.contains(&LoadConstraint::First)
    }

    pub fn is_flagged_last(&self) -> bool {
        self.load_constraints.contains(&LoadConstraint::Last)
    }

    pub fn with_provides(mut self, alias: impl Into<String>) -> Self {
        self.provides.push(alias.into());
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_constraint(mut self, constraint: LoadConstraint) -> Self {
        self.load_constraints.push(constraint);
        self
    }

    pub fn with_entry_group<I, S>(mut self, group: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_groups
            .insert(group.into(), types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_code_unit(mut self, file: impl Into<String>) -> Self {
        self.code_units.push(file.into());
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }
}

impl fmt::Display for ModUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Source of parsed mod records.
pub trait MetadataProvider {
    /// Produce every mod this provider knows about.
    fn provide(&self) -> crate::RuntimeResult<Vec<ModUnit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, version: &str) -> ModUnit {
        ModUnit::new(id, Version::parse(version).unwrap())
    }

    #[test]
    fn test_answers_to_alias() {
        let u = unit("core-lib", "1.0.0").with_provides("corelib");
        assert!(u.answers_to("core-lib"));
        assert!(u.answers_to("corelib"));
        assert!(!u.answers_to("other"));
        assert_eq!(u.all_ids().collect::<Vec<_>>(), vec!["core-lib", "corelib"]);
    }

    #[test]
    fn test_relation_version_match() {
        let dep = Relation::new(RelationKind::Depends, "core-lib")
            .with_version(VersionReq::parse(">=1.0.0").unwrap());

        assert!(dep.is_satisfied_by(&unit("core-lib", "1.2.0")));
        assert!(!dep.is_satisfied_by(&unit("core-lib", "0.9.0")));
        assert!(!dep.is_satisfied_by(&unit("other", "1.2.0")));
        assert_eq!(dep.to_string(), "depends core-lib@>=1.0.0");
    }

    #[test]
    fn test_depends_on() {
        let base = unit("base", "2.0.0");
        let addon = unit("addon", "1.0.0")
            .with_relation(Relation::new(RelationKind::Depends, "base"));
        assert!(addon.depends_on(&base));
        assert!(!base.depends_on(&addon));
    }
}
