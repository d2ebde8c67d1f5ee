//! Declarations.

use strum::Display;

use crate::ast::{
    node::{DeclId, DeclarationIndex, ExprId, Location, ModuleId, ScopeId, StmtId, TypeId},
    types::{Constness, FunctionFlavor},
    unit::AttributeSet,
};

/// Visibility of a declaration across modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum Linkage {
    #[default]
    Private,
    Public,
    /// Public, and additionally pinned for the host application's ABI.
    Export,
}

/// A function declaration's callable parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub flavor: FunctionFlavor,
    /// Parameter declarations, in order.
    pub params: Vec<DeclId>,
    pub result: TypeId,
    pub result_constness: Constness,
    /// Absent for externally-provided (`&cxxname`) functions.
    pub body: Option<StmtId>,
}

/// Declaration kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Constant {
        ty: Option<TypeId>,
        value: ExprId,
    },
    GlobalVariable {
        ty: Option<TypeId>,
        init: Option<ExprId>,
    },
    LocalVariable {
        ty: Option<TypeId>,
        init: Option<ExprId>,
    },
    Parameter {
        ty: TypeId,
        inout: bool,
        default: Option<ExprId>,
    },
    Function(Function),
    Type {
        ty: TypeId,
    },
    ImportedModule {
        /// Filled once the import resolves.
        module: Option<ModuleId>,
        search_scope: Option<String>,
    },
    Property {
        value: Option<ExprId>,
    },
    /// A struct field. Unit fields are unit items instead; the optimizer
    /// sees both through the same liveness lens.
    Field {
        ty: TypeId,
        default: Option<ExprId>,
    },
}

impl DeclKind {
    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::GlobalVariable { .. } => "global variable",
            Self::LocalVariable { .. } => "local variable",
            Self::Parameter { .. } => "parameter",
            Self::Function(_) => "function",
            Self::Type { .. } => "type",
            Self::ImportedModule { .. } => "imported module",
            Self::Property { .. } => "property",
            Self::Field { .. } => "field",
        }
    }
}

/// A declaration node.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: String,
    /// Fully-qualified unique name, assigned at registration.
    pub canonical_id: String,
    pub kind: DeclKind,
    pub linkage: Linkage,
    pub attributes: AttributeSet,
    /// Assigned on registration; `NONE` until then.
    pub index: DeclarationIndex,
    pub location: Location,
    /// Scope introduced by this declaration (functions, types).
    pub scope: Option<ScopeId>,
    /// The node this one replaced, kept readable for diagnostics.
    pub original: Option<DeclId>,
}

impl Declaration {
    pub fn new(id: impl Into<String>, kind: DeclKind, linkage: Linkage, location: Location) -> Self {
        Self {
            id: id.into(),
            canonical_id: String::new(),
            kind,
            linkage,
            attributes: AttributeSet::default(),
            index: DeclarationIndex::NONE,
            location,
            scope: None,
            original: None,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, DeclKind::Type { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, DeclKind::Function(_))
    }
}
