//! Compile-time diagnostics.
//!
//! Errors and warnings attach to the context as they are found; nothing
//! unwinds. A final sweep deduplicates to at most one error per source
//! location, with normal-priority errors suppressing low-priority ones at
//! the same location, so one root cause does not cascade into a wall of
//! follow-on messages.

use std::fmt;

use ahash::AHashMap;
use strum::Display;

use crate::ast::node::Location;

/// Diagnostic severity. Warnings never fail compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Severity {
    Error,
    Warning,
}

/// Tie-breaking priority for errors at the same location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Priority {
    Low,
    Normal,
}

/// One diagnostic attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub priority: Priority,
    pub message: String,
    pub location: Location,
    /// Extra lines shown after the message (candidate lists and the like).
    pub context: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, location: Location) -> Self {
        Self {
            severity: Severity::Error,
            priority: Priority::Normal,
            message: message.into(),
            location,
            context: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>, location: Location) -> Self {
        Self {
            severity: Severity::Warning,
            priority: Priority::Normal,
            message: message.into(),
            location,
            context: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{loc}: {sev}: {msg}",
            loc = self.location,
            sev = match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            },
            msg = self.message
        )?;
        for line in &self.context {
            write!(f, "\n    {line}")?;
        }
        Ok(())
    }
}

/// Collects diagnostics during compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, location: Location) {
        self.push(Diagnostic::error(message, location));
    }

    pub fn warning(&mut self, message: impl Into<String>, location: Location) {
        self.push(Diagnostic::warning(message, location));
    }

    /// True if any error (not warning) was recorded.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// The user-facing error list: at most one error per source location,
    /// normal priority suppressing low, in recording order. Warnings pass
    /// through untouched.
    pub fn emitted(&self) -> Vec<Diagnostic> {
        let mut best: AHashMap<Location, usize> = AHashMap::new();
        let mut out: Vec<Option<Diagnostic>> = Vec::new();
        for diag in &self.entries {
            if diag.severity == Severity::Warning {
                out.push(Some(diag.clone()));
                continue;
            }
            match best.get(&diag.location) {
                Some(&slot) => {
                    let keep = out[slot].as_ref().expect("slot filled");
                    if diag.priority > keep.priority {
                        out[slot] = Some(diag.clone());
                    }
                }
                None => {
                    best.insert(diag.location.clone(), out.len());
                    out.push(Some(diag.clone()));
                }
            }
        }
        out.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_error_per_location() {
        let mut diags = Diagnostics::new();
        let loc = Location::new("m.sdl", 1, 1);
        diags.error("first", loc.clone());
        diags.error("second", loc.clone());
        diags.error("elsewhere", Location::new("m.sdl", 2, 1));
        let emitted = diags.emitted();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].message, "first");
    }

    #[test]
    fn normal_priority_beats_low() {
        let mut diags = Diagnostics::new();
        let loc = Location::new("m.sdl", 1, 1);
        diags.push(Diagnostic::error("vague", loc.clone()).with_priority(Priority::Low));
        diags.push(Diagnostic::error("precise", loc));
        let emitted = diags.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].message, "precise");
    }

    #[test]
    fn warnings_do_not_fail_compilation() {
        let mut diags = Diagnostics::new();
        diags.warning("deprecated form", Location::none());
        assert!(!diags.has_errors());
        assert_eq!(diags.emitted().len(), 1);
    }
}
