//! Identifier scopes and lookup.
//!
//! Each scope maps IDs to declaration entries and chains to a parent;
//! lookup walks outward toward the root. An entry flagged external was
//! brought in by an import and resolves only if the target declaration is
//! public or is a type declaration (types stay universally visible so
//! out-of-module hooks can name them). A stop marker shadows all outer
//! scopes for its ID.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::ast::node::{DeclarationIndex, ScopeId};

/// One scope entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEntry {
    /// A declaration visible under the entry's ID.
    Declaration {
        index: DeclarationIndex,
        /// Set for entries created by imports.
        external: bool,
    },
    /// Shadows the ID: lookup stops here with no results.
    Stop,
}

/// A mapping from (possibly dotted) IDs to declarations, chained to a
/// parent scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    entries: IndexMap<String, SmallVec<[ScopeEntry; 1]>>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            entries: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, index: DeclarationIndex) {
        self.entries
            .entry(id.into())
            .or_default()
            .push(ScopeEntry::Declaration { index, external: false });
    }

    pub fn insert_external(&mut self, id: impl Into<String>, index: DeclarationIndex) {
        self.entries
            .entry(id.into())
            .or_default()
            .push(ScopeEntry::Declaration { index, external: true });
    }

    pub fn insert_stop(&mut self, id: impl Into<String>) {
        self.entries.entry(id.into()).or_default().push(ScopeEntry::Stop);
    }

    pub fn entries_for(&self, id: &str) -> Option<&[ScopeEntry]> {
        self.entries.get(id).map(SmallVec::as_slice)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a lookup: the matching declarations, innermost scope first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupResult {
    pub matches: Vec<Resolved>,
}

/// One lookup match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub index: DeclarationIndex,
    pub external: bool,
}

impl LookupResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// The unique match, if exactly one exists.
    pub fn single(&self) -> Option<Resolved> {
        match self.matches.as_slice() {
            [one] => Some(*one),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_accumulate_per_id() {
        let mut scope = Scope::new(None);
        scope.insert("f", DeclarationIndex::new(1));
        scope.insert("f", DeclarationIndex::new(2));
        assert_eq!(scope.entries_for("f").unwrap().len(), 2);
        assert!(scope.entries_for("g").is_none());
    }

    #[test]
    fn stop_marker_recorded() {
        let mut scope = Scope::new(None);
        scope.insert_stop("hidden");
        assert_eq!(scope.entries_for("hidden").unwrap(), &[ScopeEntry::Stop]);
    }
}
