//! The constant folder: a small recursive interpreter over the ctor
//! subset of expressions.
//!
//! Used by the code generator to materialize literal values (sizes,
//! counts, expected field constants) and by the optimizer to inline
//! feature constants. Numeric overflow raises `OutOfRange`, which the
//! caller surfaces as a compile-time error.

use crate::{
    ast::{
        context::AstContext,
        decl::DeclKind,
        expr::{Ctor, ExprKind},
        node::{ExprId, Location},
        types::Ty,
    },
    operators::{OperatorKind, Registry},
};

/// Style flags selecting which optional foldings apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldStyle {
    /// Fold `cond ? a : b` when the condition is a ctor bool and both arms
    /// are ctors.
    pub fold_ternary: bool,
    /// Fold resolved names to their constant's value.
    pub inline_feature_constants: bool,
    /// Fold resolved names of boolean constants.
    pub inline_boolean_constants: bool,
    /// Allow folding a name at the top level of the requested expression;
    /// the optimizer opts in selectively.
    pub fold_top_level_names: bool,
}

impl FoldStyle {
    /// Everything on; used when materializing codegen constants.
    pub fn full() -> Self {
        Self {
            fold_ternary: true,
            inline_feature_constants: true,
            inline_boolean_constants: true,
            fold_top_level_names: true,
        }
    }
}

/// A folding failure that is a user error (overflow, division by zero).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldError {
    pub message: String,
    pub location: Location,
}

/// Folds `expr` to a ctor if it is constant under `style`. `Ok(None)`
/// means "not foldable", which is never an error by itself.
pub fn fold(
    ctx: &AstContext,
    registry: &Registry,
    expr: ExprId,
    style: FoldStyle,
) -> Result<Option<Ctor>, FoldError> {
    fold_inner(ctx, registry, expr, style, true)
}

fn fold_inner(
    ctx: &AstContext,
    registry: &Registry,
    expr: ExprId,
    style: FoldStyle,
    top_level: bool,
) -> Result<Option<Ctor>, FoldError> {
    let e = ctx.expr(expr);
    match &e.kind {
        ExprKind::Ctor(ctor) => Ok(Some(ctor.clone())),
        ExprKind::Grouping(inner) | ExprKind::Coerced(inner) => {
            let folded = fold_inner(ctx, registry, *inner, style, false)?;
            match folded {
                Some(ctor) => reinterpret(ctx, ctor, ctx.resolve_type(e.ty.ty), &e.location).map(Some),
                None => Ok(None),
            }
        }
        ExprKind::LogicalNot(inner) => match fold_inner(ctx, registry, *inner, style, false)? {
            Some(Ctor::Bool(b)) => Ok(Some(Ctor::Bool(!b))),
            _ => Ok(None),
        },
        ExprKind::LogicalAnd(a, b) => fold_bool_pair(ctx, registry, *a, *b, style, |x, y| x && y),
        ExprKind::LogicalOr(a, b) => fold_bool_pair(ctx, registry, *a, *b, style, |x, y| x || y),
        ExprKind::Ternary { cond, then, alt } => {
            if !style.fold_ternary {
                return Ok(None);
            }
            match fold_inner(ctx, registry, *cond, style, false)? {
                Some(Ctor::Bool(c)) => {
                    let then = fold_inner(ctx, registry, *then, style, false)?;
                    let alt = fold_inner(ctx, registry, *alt, style, false)?;
                    // Both arms must be ctors for the fold to apply.
                    match (then, alt) {
                        (Some(t), Some(a)) => Ok(Some(if c { t } else { a })),
                        _ => Ok(None),
                    }
                }
                _ => Ok(None),
            }
        }
        ExprKind::Name { resolved, .. } => {
            if top_level && !style.fold_top_level_names {
                return Ok(None);
            }
            if !resolved.is_set() {
                return Ok(None);
            }
            let decl = ctx.lookup_declaration(*resolved);
            let DeclKind::Constant { value, .. } = &decl.kind else {
                return Ok(None);
            };
            let folded = fold_inner(ctx, registry, *value, style, false)?;
            match folded {
                Some(ctor @ Ctor::Bool(_)) if style.inline_boolean_constants => Ok(Some(ctor)),
                Some(ctor) if style.inline_feature_constants => Ok(Some(ctor)),
                _ => Ok(None),
            }
        }
        ExprKind::UnresolvedOperator { op, operands } => fold_operator(ctx, registry, *op, operands, style, &e.location),
        ExprKind::ResolvedOperator { op, operands } => {
            let kind = registry.op(*op).kind;
            fold_operator(ctx, registry, kind, operands, style, &e.location)
        }
        _ => Ok(None),
    }
}

fn fold_bool_pair(
    ctx: &AstContext,
    registry: &Registry,
    a: ExprId,
    b: ExprId,
    style: FoldStyle,
    f: impl Fn(bool, bool) -> bool,
) -> Result<Option<Ctor>, FoldError> {
    let a = fold_inner(ctx, registry, a, style, false)?;
    let b = fold_inner(ctx, registry, b, style, false)?;
    match (a, b) {
        (Some(Ctor::Bool(x)), Some(Ctor::Bool(y))) => Ok(Some(Ctor::Bool(f(x, y)))),
        _ => Ok(None),
    }
}

fn fold_operator(
    ctx: &AstContext,
    registry: &Registry,
    kind: OperatorKind,
    operands: &[ExprId],
    style: FoldStyle,
    location: &Location,
) -> Result<Option<Ctor>, FoldError> {
    match kind {
        OperatorKind::SignNeg => {
            let inner = fold_inner(ctx, registry, operands[0], style, false)?;
            match inner {
                Some(Ctor::Signed { value, width }) => {
                    let negated = value.checked_neg().ok_or_else(|| FoldError {
                        message: "integer overflow in negation".into(),
                        location: location.clone(),
                    })?;
                    check_signed(negated, width, location)?;
                    Ok(Some(Ctor::Signed { value: negated, width }))
                }
                Some(Ctor::Unsigned { value, width }) => {
                    let signed = i64::try_from(value).ok().and_then(i64::checked_neg).ok_or_else(|| FoldError {
                        message: "integer overflow in negation".into(),
                        location: location.clone(),
                    })?;
                    check_signed(signed, width, location)?;
                    Ok(Some(Ctor::Signed { value: signed, width }))
                }
                Some(Ctor::Real(value)) => Ok(Some(Ctor::Real(-value))),
                _ => Ok(None),
            }
        }
        OperatorKind::SignPos => fold_inner(ctx, registry, operands[0], style, false),
        // A type-constructor call: `uint8(x)` and friends.
        OperatorKind::Cast if operands.len() == 2 => {
            let ExprKind::TypeExpr(target) = ctx.expr(operands[1]).kind else {
                return Ok(None);
            };
            let Some(ctor) = fold_inner(ctx, registry, operands[0], style, false)? else {
                return Ok(None);
            };
            reinterpret(ctx, ctor, ctx.resolve_type(target), location).map(Some)
        }
        _ => Ok(None),
    }
}

/// Converts a folded ctor into the representation `target` demands,
/// checking numeric ranges.
fn reinterpret(ctx: &AstContext, ctor: Ctor, target: crate::ast::node::TypeId, location: &Location) -> Result<Ctor, FoldError> {
    match (ctor, ctx.ty(target)) {
        (Ctor::Unsigned { value, .. }, Ty::UnsignedInteger(w)) => {
            check_unsigned(value, *w, location)?;
            Ok(Ctor::Unsigned { value, width: *w })
        }
        (Ctor::Unsigned { value, .. }, Ty::SignedInteger(w)) => {
            let signed = i64::try_from(value).map_err(|_| out_of_range(*w, location))?;
            check_signed(signed, *w, location)?;
            Ok(Ctor::Signed { value: signed, width: *w })
        }
        (Ctor::Signed { value, .. }, Ty::SignedInteger(w)) => {
            check_signed(value, *w, location)?;
            Ok(Ctor::Signed { value, width: *w })
        }
        (Ctor::Signed { value, .. }, Ty::UnsignedInteger(w)) => {
            let unsigned = u64::try_from(value).map_err(|_| out_of_range(*w, location))?;
            check_unsigned(unsigned, *w, location)?;
            Ok(Ctor::Unsigned { value: unsigned, width: *w })
        }
        (Ctor::Unsigned { value, .. }, Ty::Real) => Ok(Ctor::Real(value as f64)),
        (Ctor::Signed { value, .. }, Ty::Real) => Ok(Ctor::Real(value as f64)),
        (Ctor::Unsigned { value, .. }, Ty::Bool) => Ok(Ctor::Bool(value != 0)),
        (Ctor::Signed { value, .. }, Ty::Bool) => Ok(Ctor::Bool(value != 0)),
        (Ctor::String(s), Ty::Bytes) => Ok(Ctor::Bytes(s.into_bytes())),
        (other, _) => Ok(other),
    }
}

fn out_of_range(width: u16, location: &Location) -> FoldError {
    FoldError {
        message: format!("value out of range for {width}-bit integer"),
        location: location.clone(),
    }
}

fn check_unsigned(value: u64, width: u16, location: &Location) -> Result<(), FoldError> {
    let max = match width {
        8 => u64::from(u8::MAX),
        16 => u64::from(u16::MAX),
        32 => u64::from(u32::MAX),
        _ => u64::MAX,
    };
    if value > max {
        return Err(out_of_range(width, location));
    }
    Ok(())
}

fn check_signed(value: i64, width: u16, location: &Location) -> Result<(), FoldError> {
    let (lo, hi) = match width {
        8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
        16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        _ => (i64::MIN, i64::MAX),
    };
    if value < lo || value > hi {
        return Err(out_of_range(width, location));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::ast::context::Dialect;

    fn folded_const(source: &str, style: FoldStyle) -> Result<Option<Ctor>, FoldError> {
        let mut ctx = AstContext::new();
        crate::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl).expect("parse");
        let registry = Registry::build(&ctx);
        crate::resolver::resolve(&mut ctx, &registry).expect("resolve");
        let (_, module) = ctx.modules().next().expect("module");
        let last = *module.decls.last().expect("decl");
        let DeclKind::Constant { value, .. } = ctx.decl(last).kind else { panic!("expected constant") };
        fold(&ctx, &registry, value, style)
    }

    #[test]
    fn folds_type_constructor_call() {
        let got = folded_const("module M;\nconst X = uint8(200);", FoldStyle::default()).unwrap();
        assert_eq!(got, Some(Ctor::Unsigned { value: 200, width: 8 }));
    }

    #[test]
    fn out_of_range_ctor_raises() {
        let err = folded_const("module M;\nconst X = uint8(300);", FoldStyle::default()).unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn folds_logic_on_ctor_bools() {
        let got = folded_const("module M;\nconst X = True && !False;", FoldStyle::default()).unwrap();
        assert_eq!(got, Some(Ctor::Bool(true)));
    }

    #[test]
    fn ternary_folds_only_with_flag() {
        let src = "module M;\nconst X = True ? b\"a\" : b\"b\";";
        assert_eq!(folded_const(src, FoldStyle::default()).unwrap(), None);
        let got = folded_const(
            src,
            FoldStyle {
                fold_ternary: true,
                ..FoldStyle::default()
            },
        )
        .unwrap();
        assert_eq!(got, Some(Ctor::Bytes(b"a".to_vec())));
    }

    #[test]
    fn top_level_names_fold_only_on_opt_in() {
        let src = "module M;\nconst A = True;\nconst X = A;";
        assert_eq!(folded_const(src, FoldStyle::default()).unwrap(), None);
        let style = FoldStyle {
            inline_boolean_constants: true,
            fold_top_level_names: true,
            ..FoldStyle::default()
        };
        assert_eq!(folded_const(src, style).unwrap(), Some(Ctor::Bool(true)));
    }
}
