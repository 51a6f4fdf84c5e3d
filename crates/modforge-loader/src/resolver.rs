//! Dependency validation and load ordering.
//!
//! Resolution runs in three steps:
//!
//! 1. Every candidate is checked against the other candidates and the
//!    already loaded mods: duplicates, missing dependencies and `breaks`
//!    are errors, `conflicts` are warnings.
//! 2. Candidates without errors are sorted topologically using only their
//!    `before`/`after` constraints. Cycles are reported as warnings and the
//!    nodes caught in them are appended in input order.
//! 3. Mods flagged `first` are moved to the front and mods flagged `last`
//!    to the back, each keeping its relative order.
//!
//! Dependencies are checked for presence but never add ordering edges.

use modforge_runtime::{LoadConstraint, ModUnit, Relation, RelationKind};
use semver::{Version, VersionReq};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use thiserror::Error;
use tracing::debug;

/// A problem found during resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionIssue {
    #[error("Mod '{id}' is already loaded")]
    AlreadyLoaded { id: String },

    #[error("Mod '{id}' appears more than once in the batch")]
    DuplicateCandidate { id: String },

    #[error("Mod '{id}' depends on '{dependency}' {requirement}{}", found_suffix(.found))]
    MissingDependency {
        id: String,
        dependency: String,
        requirement: VersionReq,
        found: Option<Version>,
    },

    #[error("Mod '{breaker}' breaks '{broken}'")]
    Breaks { breaker: String, broken: String },

    #[error("Mod '{id}' conflicts with '{other}'")]
    Conflicts { id: String, other: String },

    #[error("Load order cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Mod '{id}' is flagged both first and last; loading it in place")]
    AmbiguousPlacement { id: String },
}

fn found_suffix(found: &Option<Version>) -> String {
    match found {
        Some(version) => format!(" (found {})", version),
        None => " (not found)".to_string(),
    }
}

impl ResolutionIssue {
    /// The mod the issue is reported against.
    pub fn mod_id(&self) -> Option<&str> {
        match self {
            ResolutionIssue::AlreadyLoaded { id }
            | ResolutionIssue::DuplicateCandidate { id }
            | ResolutionIssue::MissingDependency { id, .. }
            | ResolutionIssue::Conflicts { id, .. }
            | ResolutionIssue::AmbiguousPlacement { id } => Some(id),
            ResolutionIssue::Breaks { broken, .. } => Some(broken),
            ResolutionIssue::Cycle { .. } => None,
        }
    }
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    /// Candidates that passed validation, in load order.
    pub order: Vec<ModUnit>,
    /// Fatal issues; a batch with any of these loads nothing.
    pub errors: Vec<ResolutionIssue>,
    pub warnings: Vec<ResolutionIssue>,
}

impl ResolutionResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Ids in load order.
    pub fn ids(&self) -> Vec<&str> {
        self.order.iter().map(|u| u.id()).collect()
    }
}

/// Validates and orders batches of mods.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, candidates: &[ModUnit], loaded: &[ModUnit]) -> ResolutionResult {
        let mut result = ResolutionResult::default();

        let valid = self.validate(candidates, loaded, &mut result);
        let nodes: Vec<&ModUnit> = valid.iter().map(|&i| &candidates[i]).collect();

        let sorted = topological_order(&nodes, &mut result.warnings);
        let placed = partition_first_last(&nodes, sorted, &mut result.warnings);

        result.order = placed.into_iter().map(|i| nodes[i].clone()).collect();
        debug!(
            "Resolved {} of {} candidates: {:?}",
            result.order.len(),
            candidates.len(),
            result.ids()
        );
        result
    }

    /// Check every candidate; returns the indices of those without errors.
    fn validate(
        &self,
        candidates: &[ModUnit],
        loaded: &[ModUnit],
        result: &mut ResolutionResult,
    ) -> Vec<usize> {
        let mut valid = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut reported_conflicts = HashSet::new();
        let mut reported_breaks = HashSet::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let errors_before = result.errors.len();
            // A break reported while checking the other side still counts
            let mut broken_pair = false;
            let id = candidate.id();

            if !seen_ids.insert(id) {
                result.errors.push(ResolutionIssue::DuplicateCandidate { id: id.to_string() });
                continue;
            }

            if loaded
                .iter()
                .any(|l| candidate.all_ids().any(|alias| l.answers_to(alias)))
            {
                result.errors.push(ResolutionIssue::AlreadyLoaded { id: id.to_string() });
            }

            let others: Vec<&ModUnit> = candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, u)| u)
                .chain(loaded.iter())
                .collect();

            for relation in &candidate.relations {
                match relation.kind {
                    RelationKind::Depends => {
                        if let Some(issue) = check_dependency(candidate, relation, &others) {
                            result.errors.push(issue);
                        }
                    }
                    RelationKind::Recommends | RelationKind::Suggests => {
                        if find_satisfying(relation, &others).is_none() {
                            debug!(
                                mod_id = %id,
                                "Optional relation not present: {}",
                                relation
                            );
                        }
                    }
                    RelationKind::Breaks => {
                        if let Some(other) = find_satisfying(relation, &others) {
                            broken_pair = true;
                            if reported_breaks.insert((id.to_string(), other.id().to_string())) {
                                result.errors.push(ResolutionIssue::Breaks {
                                    breaker: id.to_string(),
                                    broken: other.id().to_string(),
                                });
                            }
                        }
                    }
                    RelationKind::Conflicts => {
                        if let Some(other) = find_satisfying(relation, &others) {
                            let pair = ordered_pair(id, other.id());
                            if reported_conflicts.insert(pair) {
                                result.warnings.push(ResolutionIssue::Conflicts {
                                    id: id.to_string(),
                                    other: other.id().to_string(),
                                });
                            }
                        }
                    }
                }
            }

            // Relations declared by others against this candidate
            for other in &others {
                for relation in &other.relations {
                    if !candidate.answers_to(&relation.target) || !relation.is_satisfied_by(candidate)
                    {
                        continue;
                    }
                    match relation.kind {
                        RelationKind::Breaks => {
                            broken_pair = true;
                            if reported_breaks.insert((other.id().to_string(), id.to_string())) {
                                result.errors.push(ResolutionIssue::Breaks {
                                    breaker: other.id().to_string(),
                                    broken: id.to_string(),
                                });
                            }
                        }
                        RelationKind::Conflicts => {
                            let pair = ordered_pair(id, other.id());
                            if reported_conflicts.insert(pair) {
                                result.warnings.push(ResolutionIssue::Conflicts {
                                    id: other.id().to_string(),
                                    other: id.to_string(),
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }

            if result.errors.len() == errors_before && !broken_pair {
                valid.push(index);
            }
        }

        valid
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn find_satisfying<'a>(relation: &Relation, others: &[&'a ModUnit]) -> Option<&'a ModUnit> {
    others
        .iter()
        .copied()
        .find(|u| u.answers_to(&relation.target) && relation.is_satisfied_by(u))
}

fn check_dependency(
    candidate: &ModUnit,
    relation: &Relation,
    others: &[&ModUnit],
) -> Option<ResolutionIssue> {
    if find_satisfying(relation, others).is_some() {
        return None;
    }
    let found = others
        .iter()
        .find(|u| u.answers_to(&relation.target))
        .map(|u| u.version().clone());
    Some(ResolutionIssue::MissingDependency {
        id: candidate.id().to_string(),
        dependency: relation.target.clone(),
        requirement: relation.version.clone(),
        found,
    })
}

/// Kahn's algorithm over `before`/`after` edges.
///
/// The ready queue is a min-heap of input positions, so the result is the
/// topological order closest to input order.
fn topological_order(nodes: &[&ModUnit], warnings: &mut Vec<ResolutionIssue>) -> Vec<usize> {
    let n = nodes.len();
    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();

    let targets = |target: &str| -> Vec<usize> {
        (0..n).filter(|&j| nodes[j].answers_to(target)).collect()
    };

    for (i, node) in nodes.iter().enumerate() {
        for constraint in &node.load_constraints {
            let (target, before) = match constraint {
                LoadConstraint::Before(t) => (t, true),
                LoadConstraint::After(t) => (t, false),
                LoadConstraint::First | LoadConstraint::Last => continue,
            };
            let matched = targets(target);
            if matched.is_empty() {
                debug!(
                    mod_id = %node.id(),
                    "Ignoring ordering constraint on absent mod '{}'",
                    target
                );
            }
            for j in matched.into_iter().filter(|&j| j != i) {
                edges.insert(if before { (i, j) } else { (j, i) });
            }
        }
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for &(from, to) in &edges {
        adjacency[from].push(to);
        in_degree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut sorted = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        sorted.push(i);
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if sorted.len() < n {
        let consumed: HashSet<usize> = sorted.iter().copied().collect();
        let remaining: Vec<usize> = (0..n).filter(|i| !consumed.contains(i)).collect();

        for cycle in find_cycles(&adjacency, &remaining) {
            warnings.push(ResolutionIssue::Cycle {
                path: cycle.iter().map(|&i| nodes[i].id().to_string()).collect(),
            });
        }
        sorted.extend(remaining);
    }

    sorted
}

/// Depth-first search for cycles among `remaining`, each reported once.
fn find_cycles(adjacency: &[Vec<usize>], remaining: &[usize]) -> Vec<Vec<usize>> {
    let in_scope: HashSet<usize> = remaining.iter().copied().collect();
    let mut visited = HashSet::new();
    let mut seen = HashSet::new();
    let mut cycles = Vec::new();

    fn visit(
        node: usize,
        adjacency: &[Vec<usize>],
        in_scope: &HashSet<usize>,
        stack: &mut Vec<usize>,
        visited: &mut HashSet<usize>,
        seen: &mut HashSet<Vec<usize>>,
        cycles: &mut Vec<Vec<usize>>,
    ) {
        visited.insert(node);
        stack.push(node);

        for &next in &adjacency[node] {
            if !in_scope.contains(&next) {
                continue;
            }
            if let Some(pos) = stack.iter().position(|&s| s == next) {
                let mut cycle = stack[pos..].to_vec();
                // Canonical rotation starts at the smallest index
                if let Some(min_pos) = cycle
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, v)| *v)
                    .map(|(p, _)| p)
                {
                    cycle.rotate_left(min_pos);
                }
                if seen.insert(cycle.clone()) {
                    cycles.push(cycle);
                }
            } else if !visited.contains(&next) {
                visit(next, adjacency, in_scope, stack, visited, seen, cycles);
            }
        }

        stack.pop();
    }

    for &start in remaining {
        if !visited.contains(&start) {
            let mut stack = Vec::new();
            visit(
                start,
                adjacency,
                &in_scope,
                &mut stack,
                &mut visited,
                &mut seen,
                &mut cycles,
            );
        }
    }

    cycles
}

fn partition_first_last(
    nodes: &[&ModUnit],
    sorted: Vec<usize>,
    warnings: &mut Vec<ResolutionIssue>,
) -> Vec<usize> {
    let mut first = Vec::new();
    let mut middle = Vec::new();
    let mut last = Vec::new();

    for i in sorted {
        let node = nodes[i];
        match (node.is_flagged_first(), node.is_flagged_last()) {
            (true, true) => {
                warnings.push(ResolutionIssue::AmbiguousPlacement {
                    id: node.id().to_string(),
                });
                middle.push(i);
            }
            (true, false) => first.push(i),
            (false, true) => last.push(i),
            (false, false) => middle.push(i),
        }
    }

    first.extend(middle);
    first.extend(last);
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use modforge_runtime::Relation;

    fn unit(id: &str) -> ModUnit {
        ModUnit::new(id, Version::new(1, 0, 0))
    }

    fn ids(result: &ResolutionResult) -> Vec<&str> {
        result.ids()
    }

    #[test]
    fn test_stable_without_edges() {
        let candidates = vec![unit("c"), unit("a"), unit("b")];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert!(result.is_ok());
        assert_eq!(ids(&result), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_before_and_after() {
        let candidates = vec![
            unit("a").with_constraint(LoadConstraint::After("c".to_string())),
            unit("b"),
            unit("c").with_constraint(LoadConstraint::Before("b".to_string())),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert_eq!(ids(&result), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_two_node_cycle_warns() {
        let candidates = vec![
            unit("x"),
            unit("a").with_constraint(LoadConstraint::Before("b".to_string())),
            unit("b").with_constraint(LoadConstraint::Before("a".to_string())),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);

        assert!(result.is_ok());
        assert_eq!(ids(&result), vec!["x", "a", "b"]);
        let cycles: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| matches!(w, ResolutionIssue::Cycle { .. }))
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(
            cycles[0],
            &ResolutionIssue::Cycle {
                path: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_first_and_last_partition() {
        let candidates = vec![
            unit("A").with_constraint(LoadConstraint::Last),
            unit("B"),
            unit("C"),
            unit("D").with_constraint(LoadConstraint::First),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert_eq!(ids(&result), vec!["D", "B", "C", "A"]);
    }

    #[test]
    fn test_first_and_last_both_is_warning() {
        let candidates = vec![
            unit("a"),
            unit("b")
                .with_constraint(LoadConstraint::First)
                .with_constraint(LoadConstraint::Last),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert!(result.is_ok());
        assert_eq!(ids(&result), vec!["a", "b"]);
        assert!(matches!(
            result.warnings[0],
            ResolutionIssue::AmbiguousPlacement { .. }
        ));
    }

    #[test]
    fn test_missing_dependency() {
        let candidates = vec![
            unit("a").with_relation(Relation::new(RelationKind::Depends, "lib")),
            unit("b"),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert!(!result.is_ok());
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[test]
    fn test_dependency_version_mismatch() {
        let candidates = vec![unit("a").with_relation(
            Relation::new(RelationKind::Depends, "lib")
                .with_version(VersionReq::parse(">=2.0").unwrap()),
        )];
        let loaded = vec![unit("lib")];
        let result = DependencyResolver::new().resolve(&candidates, &loaded);

        match &result.errors[0] {
            ResolutionIssue::MissingDependency { found, .. } => {
                assert_eq!(found.as_ref(), Some(&Version::new(1, 0, 0)));
            }
            other => panic!("unexpected issue: {:?}", other),
        }
    }

    #[test]
    fn test_dependency_satisfied_by_alias() {
        let candidates = vec![
            unit("a").with_relation(Relation::new(RelationKind::Depends, "maps")),
            unit("better-maps").with_provides("maps"),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_breaks_is_symmetric() {
        let loaded = vec![unit("old").with_relation(Relation::new(RelationKind::Breaks, "new"))];
        let candidates = vec![unit("new")];
        let result = DependencyResolver::new().resolve(&candidates, &loaded);

        assert_eq!(
            result.errors,
            vec![ResolutionIssue::Breaks {
                breaker: "old".to_string(),
                broken: "new".to_string()
            }]
        );
    }

    #[test]
    fn test_breaks_between_candidates_reported_once() {
        let candidates = vec![
            unit("a").with_relation(Relation::new(RelationKind::Breaks, "b")),
            unit("b"),
            unit("c"),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);

        assert_eq!(
            result.errors,
            vec![ResolutionIssue::Breaks {
                breaker: "a".to_string(),
                broken: "b".to_string()
            }]
        );
        assert_eq!(result.ids(), vec!["c"]);
    }

    #[test]
    fn test_breaks_against_loaded() {
        let loaded = vec![unit("old")];
        let candidates = vec![unit("new").with_relation(Relation::new(RelationKind::Breaks, "old"))];
        let result = DependencyResolver::new().resolve(&candidates, &loaded);
        assert!(!result.is_ok());
        assert!(result.order.is_empty());
    }

    #[test]
    fn test_conflict_is_warning_reported_once() {
        let candidates = vec![
            unit("a").with_relation(Relation::new(RelationKind::Conflicts, "b")),
            unit("b").with_relation(Relation::new(RelationKind::Conflicts, "a")),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert!(result.is_ok());
        assert_eq!(result.order.len(), 2);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_already_loaded_and_duplicate() {
        let loaded = vec![unit("a")];
        let candidates = vec![unit("a"), unit("b"), unit("b")];
        let result = DependencyResolver::new().resolve(&candidates, &loaded);

        assert_eq!(
            result.errors,
            vec![
                ResolutionIssue::AlreadyLoaded { id: "a".to_string() },
                ResolutionIssue::DuplicateCandidate { id: "b".to_string() },
            ]
        );
    }

    #[test]
    fn test_constraint_on_absent_mod_ignored() {
        let candidates = vec![
            unit("a").with_constraint(LoadConstraint::After("ghost".to_string())),
            unit("b"),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert_eq!(ids(&result), vec!["a", "b"]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_three_node_cycle_reported_once() {
        let candidates = vec![
            unit("a").with_constraint(LoadConstraint::Before("b".to_string())),
            unit("b").with_constraint(LoadConstraint::Before("c".to_string())),
            unit("c").with_constraint(LoadConstraint::Before("a".to_string())),
        ];
        let result = DependencyResolver::new().resolve(&candidates, &[]);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].to_string(), "Load order cycle: a -> b -> c");
    }
}
