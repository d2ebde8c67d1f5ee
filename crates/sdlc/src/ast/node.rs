//! Node identity: arena indices and source locations.
//!
//! Every AST entity lives in a per-kind arena owned by the context
//! (declarations, types, expressions, statements, unit items, hooks,
//! scopes). Cross-references are copyable index newtypes; nothing in the
//! tree is shared-ownership. Stable references across node replacement go
//! through `DeclarationIndex`/`TypeIndex` instead (see the context's
//! registration tables).

use std::{fmt, rc::Rc};

/// Declares an arena index newtype over `u32`.
macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect("arena index overflow"))
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of an expression in the context's expression arena.
    ExprId
);
arena_id!(
    /// Index of a statement in the context's statement arena.
    StmtId
);
arena_id!(
    /// Index of a declaration node in the context's declaration arena.
    /// Distinct from `DeclarationIndex`, which is a registration handle.
    DeclId
);
arena_id!(
    /// Index of an unqualified type node in the context's type arena.
    /// Distinct from `TypeIndex`, which is a registration handle.
    TypeId
);
arena_id!(
    /// Index of a unit item in the context's item arena.
    ItemId
);
arena_id!(
    /// Index of a hook in the context's hook arena.
    HookId
);
arena_id!(
    /// Index of a scope in the context's scope arena.
    ScopeId
);
arena_id!(
    /// Index of a module in the context's module list.
    ModuleId
);

/// Registration handle for a declaration. Zero means "none"; every
/// registered declaration receives a positive value that survives node
/// replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeclarationIndex(u32);

impl DeclarationIndex {
    pub const NONE: Self = Self(0);

    pub(crate) fn new(value: u32) -> Self {
        debug_assert!(value > 0, "declaration index 0 is reserved");
        Self(value)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    pub(crate) fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeclarationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl#{}", self.0)
    }
}

/// Registration handle for an unqualified type. Zero means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeIndex(u32);

impl TypeIndex {
    pub const NONE: Self = Self(0);

    pub(crate) fn new(value: u32) -> Self {
        debug_assert!(value > 0, "type index 0 is reserved");
        Self(value)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    pub(crate) fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// A source position: file, 1-based line, 1-based column.
///
/// The path is reference-counted so locations clone cheaply into
/// diagnostics and generated-code metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    path: Rc<str>,
    line: u32,
    column: u32,
}

impl Location {
    pub fn new(path: impl Into<Rc<str>>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }

    /// A location for synthesized nodes with no source counterpart.
    pub fn none() -> Self {
        Self {
            path: Rc::from("<generated>"),
            line: 0,
            column: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn is_none(&self) -> bool {
        self.line == 0
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}:{}", self.path, self.line, self.column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_zero_means_none() {
        assert!(DeclarationIndex::NONE.is_none());
        assert!(TypeIndex::NONE.is_none());
        assert!(DeclarationIndex::new(1).is_set());
    }

    #[test]
    fn location_renders_path_line_column() {
        let loc = Location::new("proto.sdl", 3, 9);
        assert_eq!(loc.to_string(), "proto.sdl:3:9");
        assert_eq!(Location::none().to_string(), "<generated>");
    }
}
