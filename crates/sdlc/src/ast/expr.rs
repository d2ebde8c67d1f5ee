//! Expressions and constructor (literal) values.

use smallvec::SmallVec;

use crate::{
    ast::node::{ExprId, DeclarationIndex, Location, TypeId},
    ast::types::QualifiedType,
    operators::{OperatorId, OperatorKind},
    runtime::net::{Address, Port},
};

/// Operand list of an operator expression, stored inline.
pub type Operands = SmallVec<[ExprId; 3]>;

/// A constructor: a literal value known at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Ctor {
    Bool(bool),
    Unsigned { value: u64, width: u16 },
    Signed { value: i64, width: u16 },
    Real(f64),
    String(String),
    Bytes(Vec<u8>),
    RegExp(Vec<String>),
    Null,
    Error(String),
    Address(Address),
    Port(Port),
    Optional { ty: TypeId, value: Option<ExprId> },
    Result { ty: TypeId, value: Option<ExprId> },
    Tuple(Vec<ExprId>),
    List { elem: TypeId, elems: Vec<ExprId> },
    Vector { elem: TypeId, elems: Vec<ExprId> },
    Set { elem: TypeId, elems: Vec<ExprId> },
    Map { key: TypeId, value: TypeId, entries: Vec<(ExprId, ExprId)> },
    Struct { ty: TypeId, fields: Vec<(String, ExprId)> },
    Enum { ty: TypeId, label: String },
    Bitfield { ty: TypeId, values: Vec<(String, u64)> },
}

impl Ctor {
    /// True for scalar ctors whose value needs no further evaluation.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool(_)
                | Self::Unsigned { .. }
                | Self::Signed { .. }
                | Self::Real(_)
                | Self::String(_)
                | Self::Bytes(_)
                | Self::RegExp(_)
                | Self::Null
                | Self::Error(_)
                | Self::Address(_)
                | Self::Port(_)
                | Self::Enum { .. }
        )
    }
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// An identifier reference; `resolved` is stamped by name resolution.
    Name {
        id: String,
        resolved: DeclarationIndex,
    },
    /// A member-name operand (the `f` of `x.f`).
    Member { id: String },
    /// A literal value.
    Ctor(Ctor),
    /// An operator application awaiting resolution.
    UnresolvedOperator {
        op: OperatorKind,
        operands: Operands,
    },
    /// A resolved operator application; `op` identifies the registry entry.
    ResolvedOperator {
        op: OperatorId,
        operands: Operands,
    },
    /// A resolved call to a declared function or hook.
    ResolvedCall {
        function: DeclarationIndex,
        args: Vec<ExprId>,
    },
    /// Parenthesized grouping.
    Grouping(ExprId),
    /// Short-circuiting conjunction.
    LogicalAnd(ExprId, ExprId),
    /// Short-circuiting disjunction.
    LogicalOr(ExprId, ExprId),
    LogicalNot(ExprId),
    Ternary {
        cond: ExprId,
        then: ExprId,
        alt: ExprId,
    },
    Assign {
        target: ExprId,
        source: ExprId,
    },
    /// A coercion applied by the resolver; the target type is the
    /// expression's own type.
    Coerced(ExprId),
    /// A type used in expression position (cast targets, type-constructor
    /// callees).
    TypeExpr(TypeId),
    /// `[output for id in input if cond]`.
    ListComprehension {
        input: ExprId,
        output: ExprId,
        var: String,
        cond: Option<ExprId>,
    },
    /// The `$$` value inside hooks and attribute expressions.
    Dollar,
    /// `self` inside unit hooks and expressions.
    SelfRef,
}

/// An expression node: kind, computed type, location, provenance.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    /// The expression's type as far as resolution has determined it;
    /// starts as the context's `unknown` type.
    pub ty: QualifiedType,
    pub location: Location,
    /// The node this one replaced, kept readable for diagnostics.
    pub original: Option<ExprId>,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: QualifiedType, location: Location) -> Self {
        Self {
            kind,
            ty,
            location,
            original: None,
        }
    }

    pub fn is_resolved_name(&self) -> bool {
        match &self.kind {
            ExprKind::Name { resolved, .. } => resolved.is_set(),
            _ => true,
        }
    }

    pub fn as_ctor(&self) -> Option<&Ctor> {
        match &self.kind {
            ExprKind::Ctor(ctor) => Some(ctor),
            _ => None,
        }
    }
}
