//! Statements.

use crate::ast::node::{DeclId, ExprId, Location, ScopeId, StmtId};

/// One `catch` clause of a `try` statement. A missing parameter marks the
/// default catch.
#[derive(Debug, Clone, PartialEq)]
pub struct Catch {
    pub param: Option<DeclId>,
    pub body: StmtId,
}

/// One case of a `switch` statement; an empty expression list marks the
/// default case.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub exprs: Vec<ExprId>,
    pub body: StmtId,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Vec<StmtId>),
    Expression(ExprId),
    /// A local declaration in statement position.
    Declaration(DeclId),
    If {
        init: Option<DeclId>,
        cond: ExprId,
        then: StmtId,
        alt: Option<StmtId>,
    },
    While {
        cond: ExprId,
        body: StmtId,
    },
    For {
        var: DeclId,
        sequence: ExprId,
        body: StmtId,
    },
    Switch {
        cond: ExprId,
        cases: Vec<SwitchCase>,
    },
    Try {
        body: StmtId,
        catches: Vec<Catch>,
    },
    Throw(Option<ExprId>),
    Return(Option<ExprId>),
    Break,
    Continue,
    Assert {
        cond: ExprId,
        message: Option<ExprId>,
    },
    Yield,
}

/// A statement node.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub location: Location,
    /// Blocks carry their own scope for the locals they declare.
    pub scope: Option<ScopeId>,
}

impl Stmt {
    pub fn new(kind: StmtKind, location: Location) -> Self {
        Self {
            kind,
            location,
            scope: None,
        }
    }
}
