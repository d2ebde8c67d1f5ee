//! Tree traversal helpers shared by the compiler passes.
//!
//! Passes work on node IDs, so traversal collects IDs rather than holding
//! borrows; a pass can then mutate nodes one at a time through the context.

use crate::ast::{
    context::AstContext,
    decl::DeclKind,
    expr::{Ctor, ExprKind},
    node::{DeclId, ExprId, StmtId},
    stmt::StmtKind,
};

/// Collects `root` and every expression reachable from it, pre-order.
pub fn collect_exprs(ctx: &AstContext, root: ExprId, out: &mut Vec<ExprId>) {
    out.push(root);
    let kind = ctx.expr(root).kind.clone();
    match kind {
        ExprKind::Name { .. }
        | ExprKind::Member { .. }
        | ExprKind::TypeExpr(_)
        | ExprKind::Dollar
        | ExprKind::SelfRef => {}
        ExprKind::Ctor(ctor) => collect_ctor_exprs(ctx, &ctor, out),
        ExprKind::UnresolvedOperator { operands, .. } | ExprKind::ResolvedOperator { operands, .. } => {
            for op in operands {
                collect_exprs(ctx, op, out);
            }
        }
        ExprKind::ResolvedCall { args, .. } => {
            for arg in args {
                collect_exprs(ctx, arg, out);
            }
        }
        ExprKind::Grouping(inner) | ExprKind::LogicalNot(inner) | ExprKind::Coerced(inner) => {
            collect_exprs(ctx, inner, out);
        }
        ExprKind::LogicalAnd(a, b) | ExprKind::LogicalOr(a, b) => {
            collect_exprs(ctx, a, out);
            collect_exprs(ctx, b, out);
        }
        ExprKind::Ternary { cond, then, alt } => {
            collect_exprs(ctx, cond, out);
            collect_exprs(ctx, then, out);
            collect_exprs(ctx, alt, out);
        }
        ExprKind::Assign { target, source } => {
            collect_exprs(ctx, target, out);
            collect_exprs(ctx, source, out);
        }
        ExprKind::ListComprehension { input, output, cond, .. } => {
            collect_exprs(ctx, input, out);
            collect_exprs(ctx, output, out);
            if let Some(cond) = cond {
                collect_exprs(ctx, cond, out);
            }
        }
    }
}

fn collect_ctor_exprs(ctx: &AstContext, ctor: &Ctor, out: &mut Vec<ExprId>) {
    match ctor {
        Ctor::Bool(_)
        | Ctor::Unsigned { .. }
        | Ctor::Signed { .. }
        | Ctor::Real(_)
        | Ctor::String(_)
        | Ctor::Bytes(_)
        | Ctor::RegExp(_)
        | Ctor::Null
        | Ctor::Error(_)
        | Ctor::Address(_)
        | Ctor::Port(_)
        | Ctor::Enum { .. }
        | Ctor::Bitfield { .. } => {}
        Ctor::Optional { value, .. } | Ctor::Result { value, .. } => {
            if let Some(value) = value {
                collect_exprs(ctx, *value, out);
            }
        }
        Ctor::Tuple(elems) | Ctor::List { elems, .. } | Ctor::Vector { elems, .. } | Ctor::Set { elems, .. } => {
            for &e in elems {
                collect_exprs(ctx, e, out);
            }
        }
        Ctor::Map { entries, .. } => {
            for &(k, v) in entries {
                collect_exprs(ctx, k, out);
                collect_exprs(ctx, v, out);
            }
        }
        Ctor::Struct { fields, .. } => {
            for &(_, e) in fields {
                collect_exprs(ctx, e, out);
            }
        }
    }
}

/// Collects every expression root appearing in a statement tree.
pub fn collect_stmt_exprs(ctx: &AstContext, root: StmtId, out: &mut Vec<ExprId>) {
    let kind = ctx.stmt(root).kind.clone();
    match kind {
        StmtKind::Block(stmts) => {
            for s in stmts {
                collect_stmt_exprs(ctx, s, out);
            }
        }
        StmtKind::Expression(e) => collect_exprs(ctx, e, out),
        StmtKind::Declaration(decl) => collect_decl_exprs(ctx, decl, out),
        StmtKind::If { init, cond, then, alt } => {
            if let Some(init) = init {
                collect_decl_exprs(ctx, init, out);
            }
            collect_exprs(ctx, cond, out);
            collect_stmt_exprs(ctx, then, out);
            if let Some(alt) = alt {
                collect_stmt_exprs(ctx, alt, out);
            }
        }
        StmtKind::While { cond, body } => {
            collect_exprs(ctx, cond, out);
            collect_stmt_exprs(ctx, body, out);
        }
        StmtKind::For { sequence, body, .. } => {
            collect_exprs(ctx, sequence, out);
            collect_stmt_exprs(ctx, body, out);
        }
        StmtKind::Switch { cond, cases } => {
            collect_exprs(ctx, cond, out);
            for case in cases {
                for e in case.exprs {
                    collect_exprs(ctx, e, out);
                }
                collect_stmt_exprs(ctx, case.body, out);
            }
        }
        StmtKind::Try { body, catches } => {
            collect_stmt_exprs(ctx, body, out);
            for catch in catches {
                collect_stmt_exprs(ctx, catch.body, out);
            }
        }
        StmtKind::Throw(value) | StmtKind::Return(value) => {
            if let Some(value) = value {
                collect_exprs(ctx, value, out);
            }
        }
        StmtKind::Assert { cond, message } => {
            collect_exprs(ctx, cond, out);
            if let Some(message) = message {
                collect_exprs(ctx, message, out);
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Yield => {}
    }
}

/// Collects the expressions held directly by a declaration.
pub fn collect_decl_exprs(ctx: &AstContext, decl: DeclId, out: &mut Vec<ExprId>) {
    match &ctx.decl(decl).kind {
        DeclKind::Constant { value, .. } => collect_exprs(ctx, *value, out),
        DeclKind::GlobalVariable { init, .. } | DeclKind::LocalVariable { init, .. } => {
            if let Some(init) = *init {
                collect_exprs(ctx, init, out);
            }
        }
        DeclKind::Parameter { default, .. } => {
            if let Some(default) = *default {
                collect_exprs(ctx, default, out);
            }
        }
        DeclKind::Field { default, .. } => {
            if let Some(default) = *default {
                collect_exprs(ctx, default, out);
            }
        }
        DeclKind::Function(_) | DeclKind::Type { .. } | DeclKind::ImportedModule { .. } | DeclKind::Property { .. } => {}
    }
}
