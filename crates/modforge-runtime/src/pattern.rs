//! Glob patterns over qualified symbol names.
//!
//! Patterns use glob syntax (`*`, `?`, `[..]`, `{a,b}`) against dotted
//! names such as `std.net.TcpStream` or `std.env::set_var`. `*` crosses
//! `.` boundaries. Namespace matching also accepts any child namespace of a
//! matched one, so `std.process` covers `std.process.child`.

use crate::error::{RuntimeError, RuntimeResult};
use globset::{GlobBuilder, GlobMatcher};
use std::fmt;

/// A compiled symbol pattern.
#[derive(Clone)]
pub struct SymbolPattern {
    raw: String,
    matcher: GlobMatcher,
}

impl SymbolPattern {
    /// Compile a pattern, rejecting malformed input.
    pub fn new(raw: &str) -> RuntimeResult<Self> {
        if raw.is_empty() {
            return Err(RuntimeError::Config("pattern cannot be empty".to_string()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(RuntimeError::Config(format!(
                "pattern '{}' contains whitespace",
                raw
            )));
        }

        let glob = GlobBuilder::new(raw)
            .literal_separator(false)
            .build()
            .map_err(|e| RuntimeError::Config(format!("invalid pattern '{}': {}", raw, e)))?;

        Ok(Self {
            raw: raw.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a full symbol name.
    pub fn matches(&self, symbol: &str) -> bool {
        self.matcher.is_match(symbol)
    }

    /// Match a namespace or any of its parent namespaces.
    pub fn matches_namespace(&self, namespace: &str) -> bool {
        let mut current = namespace;
        loop {
            if self.matches(current) {
                return true;
            }
            match current.rsplit_once('.') {
                Some((parent, _)) => current = parent,
                None => return false,
            }
        }
    }
}

impl fmt::Debug for SymbolPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SymbolPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for SymbolPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for SymbolPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// An ordered list of compiled patterns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternSet {
    patterns: Vec<SymbolPattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every pattern; the first malformed one fails the whole set.
    pub fn compile<I, S>(raw: I) -> RuntimeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = raw
            .into_iter()
            .map(|p| SymbolPattern::new(p.as_ref()))
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Add a pattern unless an identical one is present.
    pub fn insert(&mut self, pattern: SymbolPattern) -> bool {
        if self.patterns.contains(&pattern) {
            return false;
        }
        self.patterns.push(pattern);
        true
    }

    /// Remove a pattern by its source text.
    pub fn remove(&mut self, raw: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.as_str() != raw);
        self.patterns.len() != before
    }

    /// First pattern matching `symbol`.
    pub fn find(&self, symbol: &str) -> Option<&SymbolPattern> {
        self.patterns.iter().find(|p| p.matches(symbol))
    }

    /// First pattern matching `namespace` or one of its parents.
    pub fn find_namespace(&self, namespace: &str) -> Option<&SymbolPattern> {
        self.patterns.iter().find(|p| p.matches_namespace(namespace))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards_cross_dots() {
        let p = SymbolPattern::new("runtime.interop.*").unwrap();
        assert!(p.matches("runtime.interop.Marshal"));
        assert!(p.matches("runtime.interop.Marshal::copy"));
        assert!(!p.matches("runtime.reflect.Type"));
    }

    #[test]
    fn test_namespace_matches_children() {
        let p = SymbolPattern::new("std.process").unwrap();
        assert!(p.matches_namespace("std.process"));
        assert!(p.matches_namespace("std.process.child"));
        assert!(!p.matches_namespace("std.processing"));
        assert!(!p.matches_namespace("std"));
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(matches!(SymbolPattern::new(""), Err(RuntimeError::Config(_))));
        assert!(matches!(
            SymbolPattern::new("std. net"),
            Err(RuntimeError::Config(_))
        ));
        assert!(matches!(
            SymbolPattern::new("std.[net"),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn test_pattern_set_insert_remove() {
        let mut set = PatternSet::compile(["a.*"]).unwrap();
        assert!(!set.insert(SymbolPattern::new("a.*").unwrap()));
        assert!(set.insert(SymbolPattern::new("b.C").unwrap()));
        assert_eq!(set.find("b.C").map(|p| p.as_str()), Some("b.C"));
        assert!(set.remove("a.*"));
        assert!(set.find("a.x").is_none());
    }
}
