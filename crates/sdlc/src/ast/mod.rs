//! The typed, context-owned AST.

pub mod context;
pub mod decl;
pub mod expr;
pub mod node;
pub mod scope;
pub mod stmt;
pub mod types;
pub mod unit;

pub use context::{AstContext, Dialect, Module, ModuleUid, StandardTypes};
pub use decl::{DeclKind, Declaration, Function, Linkage};
pub use expr::{Ctor, Expr, ExprKind, Operands};
pub use node::{
    DeclId, DeclarationIndex, ExprId, HookId, ItemId, Location, ModuleId, ScopeId, StmtId, TypeId, TypeIndex,
};
pub use scope::{LookupResult, Resolved, Scope, ScopeEntry};
pub use stmt::{Catch, Stmt, StmtKind, SwitchCase};
pub use types::{
    BitRange, BitfieldType, Constness, EnumType, FunctionFlavor, FunctionParam, FunctionType, QualifiedType, Side,
    StructType, Ty, TypeNode, TypeTag, UnitType,
};
pub use unit::{
    Attribute, AttributeKind, AttributeSet, Hook, HookFlavor, PropertyKind, SpecialHook, UnitField, UnitItem,
    UnitSwitch, UnitSwitchCase,
};
