//! The coercion engine.
//!
//! Decides whether an expression of one type may become a value of another
//! under a given style, and rewrites the expression when the conversion
//! needs a syntactic change (wrapping into an optional, re-typing a ctor,
//! dereferencing). Styles are bitmasks; every rule is gated on a style bit,
//! which keeps coercion monotonic under style widening.

use std::{fmt, ops::BitOr};

use crate::{
    ast::{
        context::AstContext,
        expr::{Ctor, Expr, ExprKind},
        node::{ExprId, TypeId},
        types::{Constness, QualifiedType, Ty, TypeTag},
    },
    operators::{Operand, OperandMatcher, ParamSpec},
};

/// A set of permitted conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoercionStyle(u32);

impl CoercionStyle {
    /// Only identical types match.
    pub const TRY_EXACT_MATCH: Self = Self(1);
    /// Allow non-const to const.
    pub const TRY_CONST_PROMOTION: Self = Self(1 << 1);
    /// Allow value-level coercions (widening, deref, wrapping, re-typing).
    pub const TRY_COERCION: Self = Self(1 << 2);
    /// Prefer candidates matching the expression's original type.
    pub const PREFER_ORIGINAL_TYPE: Self = Self(1 << 3);
    /// Matching an operator operand (enables member-name operands).
    pub const OPERAND_MATCHING: Self = Self(1 << 4);
    /// Integer-to-bool for conditions and similar contexts.
    pub const CONTEXTUAL_CONVERSION: Self = Self(1 << 5);
    /// Forbid type-changing conversions (cast disambiguation).
    pub const DISALLOW_TYPE_CHANGES: Self = Self(1 << 6);

    /// Preset for assignments.
    pub fn try_all_for_assignment() -> Self {
        Self::TRY_EXACT_MATCH | Self::TRY_CONST_PROMOTION | Self::TRY_COERCION
    }

    /// Preset for operand matching.
    pub fn try_all_for_matching() -> Self {
        Self::TRY_EXACT_MATCH | Self::TRY_CONST_PROMOTION | Self::TRY_COERCION | Self::OPERAND_MATCHING
    }

    /// Preset for function calls.
    pub fn try_all_for_function_call() -> Self {
        Self::TRY_EXACT_MATCH | Self::TRY_CONST_PROMOTION | Self::TRY_COERCION | Self::OPERAND_MATCHING
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_superset_of(self, other: Self) -> bool {
        self.contains(other)
    }
}

impl BitOr for CoercionStyle {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CoercionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (bit, name) in [
            (Self::TRY_EXACT_MATCH, "exact"),
            (Self::TRY_CONST_PROMOTION, "const-promotion"),
            (Self::TRY_COERCION, "coercion"),
            (Self::PREFER_ORIGINAL_TYPE, "prefer-original"),
            (Self::OPERAND_MATCHING, "operand-matching"),
            (Self::CONTEXTUAL_CONVERSION, "contextual"),
            (Self::DISALLOW_TYPE_CHANGES, "no-type-changes"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        write!(f, "[{}]", names.join(","))
    }
}

/// Outcome of a coercion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionResult {
    /// Whether a conversion was found.
    pub coerced: bool,
    /// A replacement expression, when the conversion needs a syntactic
    /// change; `None` when the value is usable as-is.
    pub nexpr: Option<ExprId>,
}

impl CoercionResult {
    pub fn unchanged() -> Self {
        Self {
            coerced: true,
            nexpr: None,
        }
    }

    pub fn rewritten(expr: ExprId) -> Self {
        Self {
            coerced: true,
            nexpr: Some(expr),
        }
    }

    pub fn failed() -> Self {
        Self {
            coerced: false,
            nexpr: None,
        }
    }
}

/// Structural type equality, following name references.
pub fn types_equal(ctx: &AstContext, a: TypeId, b: TypeId) -> bool {
    let a = ctx.resolve_type(a);
    let b = ctx.resolve_type(b);
    if a == b {
        return true;
    }
    match (ctx.ty(a), ctx.ty(b)) {
        (Ty::Optional(x), Ty::Optional(y)) | (Ty::Result(x), Ty::Result(y)) => types_equal(ctx, *x, *y),
        (Ty::Vector(x), Ty::Vector(y)) | (Ty::List(x), Ty::List(y)) | (Ty::Set(x), Ty::Set(y)) => {
            types_equal(ctx, *x, *y)
        }
        (Ty::Map(xk, xv), Ty::Map(yk, yv)) => types_equal(ctx, *xk, *yk) && types_equal(ctx, *xv, *yv),
        (Ty::StrongReference(x), Ty::StrongReference(y))
        | (Ty::WeakReference(x), Ty::WeakReference(y))
        | (Ty::ValueReference(x), Ty::ValueReference(y)) => types_equal(ctx, *x, *y),
        (Ty::Tuple(xs), Ty::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| types_equal(ctx, *x, *y))
        }
        (x, y) => x == y,
    }
}

/// Whether a pure type-level coercion from `from` to `to` exists under
/// `style` (no expression rewriting considered).
pub fn coerce_type(ctx: &AstContext, from: TypeId, to: TypeId, style: CoercionStyle) -> bool {
    let from = ctx.resolve_type(from);
    let to = ctx.resolve_type(to);
    if types_equal(ctx, from, to) {
        return true;
    }
    if style.contains(CoercionStyle::DISALLOW_TYPE_CHANGES) {
        return false;
    }
    if !style.contains(CoercionStyle::TRY_COERCION) {
        return false;
    }
    match (ctx.ty(from), ctx.ty(to)) {
        (_, Ty::Any | Ty::Auto) => true,
        (Ty::UnsignedInteger(a), Ty::UnsignedInteger(b)) | (Ty::SignedInteger(a), Ty::SignedInteger(b)) => b >= a,
        (Ty::UnsignedInteger(a), Ty::SignedInteger(b)) => b > a,
        (Ty::UnsignedInteger(_) | Ty::SignedInteger(_), Ty::Real) => true,
        (Ty::Null, Ty::Optional(_)) => true,
        (_, Ty::Optional(inner)) => coerce_type(ctx, from, *inner, style),
        (Ty::Error, Ty::Result(_)) => true,
        (_, Ty::Result(inner)) => coerce_type(ctx, from, *inner, style),
        (Ty::StrongReference(inner) | Ty::WeakReference(inner) | Ty::ValueReference(inner), _) => {
            types_equal(ctx, *inner, to)
        }
        (Ty::String, Ty::Bytes) => true,
        (Ty::UnsignedInteger(_) | Ty::SignedInteger(_), Ty::Bool) => {
            style.contains(CoercionStyle::CONTEXTUAL_CONVERSION)
        }
        (Ty::Stream, Ty::StreamView) => true,
        _ => false,
    }
}

/// Attempts to make `expr` usable at `target` under `style`.
pub fn coerce_expression(
    ctx: &mut AstContext,
    expr: ExprId,
    target: QualifiedType,
    style: CoercionStyle,
) -> CoercionResult {
    let from = ctx.expr(expr).ty;
    let from_ty = ctx.resolve_type(from.ty);
    let to_ty = ctx.resolve_type(target.ty);

    // Identity: types match, constness compatible.
    if types_equal(ctx, from_ty, to_ty) {
        return match constness_ok(from.constness, target.constness, style) {
            true => CoercionResult::unchanged(),
            false => CoercionResult::failed(),
        };
    }

    if matches!(ctx.ty(to_ty), Ty::Any | Ty::Auto) {
        return CoercionResult::unchanged();
    }

    if style.contains(CoercionStyle::DISALLOW_TYPE_CHANGES) || !style.contains(CoercionStyle::TRY_COERCION) {
        return CoercionResult::failed();
    }

    // Ctor re-typing: literals take the representation the target demands.
    if let Some(result) = retype_ctor(ctx, expr, to_ty, target, style) {
        return result;
    }

    // Integer widening.
    let widened = match (ctx.ty(from_ty), ctx.ty(to_ty)) {
        (Ty::UnsignedInteger(a), Ty::UnsignedInteger(b)) | (Ty::SignedInteger(a), Ty::SignedInteger(b)) => b >= a,
        (Ty::UnsignedInteger(a), Ty::SignedInteger(b)) => b > a,
        (Ty::UnsignedInteger(_) | Ty::SignedInteger(_), Ty::Real) => true,
        _ => false,
    };
    if widened {
        let coerced = wrap_coerced(ctx, expr, target);
        return CoercionResult::rewritten(coerced);
    }

    // Optional and result wrapping.
    match ctx.ty(to_ty) {
        Ty::Optional(inner) => {
            let inner = *inner;
            if matches!(ctx.ty(from_ty), Ty::Null) || coerce_type(ctx, from_ty, inner, style) {
                let coerced = wrap_coerced(ctx, expr, target);
                return CoercionResult::rewritten(coerced);
            }
        }
        Ty::Result(inner) => {
            let inner = *inner;
            if matches!(ctx.ty(from_ty), Ty::Error) || coerce_type(ctx, from_ty, inner, style) {
                let coerced = wrap_coerced(ctx, expr, target);
                return CoercionResult::rewritten(coerced);
            }
        }
        _ => {}
    }

    // Reference deref.
    if let Some(inner) = ctx.ty(from_ty).dereferenced() {
        if ctx.ty(from_ty).is_reference() && types_equal(ctx, inner, to_ty) {
            let coerced = wrap_coerced(ctx, expr, target);
            return CoercionResult::rewritten(coerced);
        }
    }

    // Tuple to struct, positionally.
    if let (Ty::Tuple(_), Ty::Struct(_)) = (ctx.ty(from_ty), ctx.ty(to_ty)) {
        if tuple_matches_struct(ctx, from_ty, to_ty, style) {
            let coerced = wrap_coerced(ctx, expr, target);
            return CoercionResult::rewritten(coerced);
        }
    }

    // Contextual integer-to-bool.
    if matches!(ctx.ty(to_ty), Ty::Bool)
        && ctx.ty(from_ty).is_integer()
        && style.contains(CoercionStyle::CONTEXTUAL_CONVERSION)
    {
        let coerced = wrap_coerced(ctx, expr, target);
        return CoercionResult::rewritten(coerced);
    }

    // Stream to view.
    if matches!((ctx.ty(from_ty), ctx.ty(to_ty)), (Ty::Stream, Ty::StreamView)) {
        let coerced = wrap_coerced(ctx, expr, target);
        return CoercionResult::rewritten(coerced);
    }

    CoercionResult::failed()
}

fn constness_ok(from: Constness, to: Constness, style: CoercionStyle) -> bool {
    match (from, to) {
        (Constness::Const, Constness::Const) | (Constness::Mutable, Constness::Mutable) => true,
        (Constness::Mutable, Constness::Const) => {
            style.contains(CoercionStyle::TRY_CONST_PROMOTION) || style.contains(CoercionStyle::TRY_COERCION)
        }
        // Value copies shed constness only under full coercion.
        (Constness::Const, Constness::Mutable) => style.contains(CoercionStyle::TRY_COERCION),
    }
}

/// Re-types a ctor literal when the target demands a different
/// representation: string to bytes, in-range integer narrowing, list to
/// vector, element-wise container re-typing.
fn retype_ctor(
    ctx: &mut AstContext,
    expr: ExprId,
    to_ty: TypeId,
    target: QualifiedType,
    style: CoercionStyle,
) -> Option<CoercionResult> {
    let ctor = ctx.expr(expr).as_ctor()?.clone();
    let location = ctx.expr(expr).location.clone();
    let new_ctor = match (&ctor, ctx.ty(to_ty)) {
        (Ctor::String(s), Ty::Bytes) => Some(Ctor::Bytes(s.clone().into_bytes())),
        (Ctor::Unsigned { value, .. }, Ty::UnsignedInteger(w)) => {
            let fits = *value <= unsigned_max(*w);
            fits.then(|| Ctor::Unsigned { value: *value, width: *w })
        }
        (Ctor::Unsigned { value, .. }, Ty::SignedInteger(w)) => {
            let (lo, hi) = signed_range(*w);
            i64::try_from(*value)
                .ok()
                .filter(|v| *v >= lo && *v <= hi)
                .map(|v| Ctor::Signed { value: v, width: *w })
        }
        (Ctor::Signed { value, .. }, Ty::SignedInteger(w)) => {
            let (lo, hi) = signed_range(*w);
            (*value >= lo && *value <= hi).then(|| Ctor::Signed { value: *value, width: *w })
        }
        (Ctor::Signed { value, .. }, Ty::UnsignedInteger(w)) => u64::try_from(*value)
            .ok()
            .filter(|v| *v <= unsigned_max(*w))
            .map(|v| Ctor::Unsigned { value: v, width: *w }),
        (Ctor::Unsigned { value, .. }, Ty::Real) => Some(Ctor::Real(*value as f64)),
        (Ctor::Signed { value, .. }, Ty::Real) => Some(Ctor::Real(*value as f64)),
        (Ctor::List { elems, .. }, Ty::Vector(elem)) => Some(Ctor::Vector {
            elem: *elem,
            elems: elems.clone(),
        }),
        (Ctor::List { elems, .. }, Ty::Set(elem)) => Some(Ctor::Set {
            elem: *elem,
            elems: elems.clone(),
        }),
        (Ctor::List { elems, .. }, Ty::List(elem)) => Some(Ctor::List {
            elem: *elem,
            elems: elems.clone(),
        }),
        (Ctor::Null, Ty::Optional(inner)) => Some(Ctor::Optional {
            ty: *inner,
            value: None,
        }),
        _ => None,
    }?;

    // Element re-typing still has to type-check the elements.
    if let Ctor::Vector { elem, elems } | Ctor::Set { elem, elems } | Ctor::List { elem, elems } = &new_ctor {
        for &e in elems {
            let ety = ctx.expr(e).ty.ty;
            if !coerce_type(ctx, ety, *elem, style) {
                return Some(CoercionResult::failed());
            }
        }
    }

    let new_expr = ctx.new_expr(Expr::new(
        ExprKind::Ctor(new_ctor),
        QualifiedType {
            ty: to_ty,
            constness: Constness::Const,
            side: target.side,
        },
        location,
    ));
    Some(CoercionResult::rewritten(new_expr))
}

fn tuple_matches_struct(ctx: &AstContext, from: TypeId, to: TypeId, style: CoercionStyle) -> bool {
    let Ty::Tuple(elems) = ctx.ty(from) else { return false };
    let Ty::Struct(st) = ctx.ty(to) else { return false };
    if elems.len() != st.fields.len() {
        return false;
    }
    elems.iter().zip(&st.fields).all(|(elem, field)| {
        match &ctx.decl(*field).kind {
            crate::ast::decl::DeclKind::Field { ty, .. } => coerce_type(ctx, *elem, *ty, style),
            _ => false,
        }
    })
}

/// Wraps `expr` in a coercion marker carrying the target type.
fn wrap_coerced(ctx: &mut AstContext, expr: ExprId, target: QualifiedType) -> ExprId {
    let location = ctx.expr(expr).location.clone();
    ctx.new_expr(Expr::new(ExprKind::Coerced(expr), target, location))
}

fn unsigned_max(width: u16) -> u64 {
    match width {
        8 => u64::from(u8::MAX),
        16 => u64::from(u16::MAX),
        32 => u64::from(u32::MAX),
        _ => u64::MAX,
    }
}

fn signed_range(width: u16) -> (i64, i64) {
    match width {
        8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
        16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        _ => (i64::MIN, i64::MAX),
    }
}

/// Matches call/operator operands against an operator signature, returning
/// the (possibly rewritten) operand list on success.
pub fn coerce_operands(
    ctx: &mut AstContext,
    operands: &[ExprId],
    signature: &[Operand],
    style: CoercionStyle,
) -> Option<Vec<ExprId>> {
    if operands.len() != signature.len() {
        return None;
    }
    let mut out = Vec::with_capacity(operands.len());
    for (&expr, operand) in operands.iter().zip(signature) {
        if operand.mutable && ctx.expr(expr).ty.is_const() {
            return None;
        }
        let matched = match_operand(ctx, expr, &operand.matcher, operands, style)?;
        out.push(matched.unwrap_or(expr));
    }
    Some(out)
}

/// Matches one operand. Returns `None` on mismatch, `Some(None)` when the
/// operand is usable as-is, `Some(Some(e))` when it was rewritten.
fn match_operand(
    ctx: &mut AstContext,
    expr: ExprId,
    matcher: &OperandMatcher,
    all: &[ExprId],
    style: CoercionStyle,
) -> Option<Option<ExprId>> {
    let ty = ctx.resolve_type(ctx.expr(expr).ty.ty);
    match matcher {
        OperandMatcher::Type(target) => {
            let result = coerce_expression(ctx, expr, QualifiedType::const_rhs(*target), style);
            result.coerced.then_some(result.nexpr)
        }
        OperandMatcher::Kind(tag) => (ctx.ty(ty).tag() == *tag).then_some(None),
        OperandMatcher::AnyInteger => ctx.ty(ty).is_integer().then_some(None),
        OperandMatcher::AnyIterable => matches!(
            ctx.ty(ty).tag(),
            TypeTag::Vector | TypeTag::List | TypeTag::Set | TypeTag::Map | TypeTag::Bytes | TypeTag::Stream | TypeTag::StreamView
        )
        .then_some(None),
        OperandMatcher::AnyReference => ctx.ty(ty).is_reference().then_some(None),
        OperandMatcher::Member(required) => {
            if !style.contains(CoercionStyle::OPERAND_MATCHING) {
                return None;
            }
            match &ctx.expr(expr).kind {
                ExprKind::Member { id } => match required {
                    Some(name) => (id.as_str() == *name).then_some(None),
                    None => Some(None),
                },
                _ => None,
            }
        }
        OperandMatcher::TypeExpr => matches!(ctx.expr(expr).kind, ExprKind::TypeExpr(_)).then_some(None),
        OperandMatcher::Params(specs) => match_params(ctx, expr, specs, style),
        OperandMatcher::SameAs(i) => {
            let other = ctx.resolve_type(ctx.expr(all[*i]).ty.ty);
            if types_equal(ctx, ty, other) {
                return Some(None);
            }
            // The pinned operand still admits expression-level coercion
            // (literal narrowing, widening) toward its partner's type.
            let result = coerce_expression(ctx, expr, QualifiedType::const_rhs(other), style);
            result.coerced.then_some(result.nexpr)
        }
        OperandMatcher::Any => Some(None),
    }
}

/// Matches a call-argument tuple against named parameters, positionally.
fn match_params(
    ctx: &mut AstContext,
    expr: ExprId,
    specs: &[ParamSpec],
    style: CoercionStyle,
) -> Option<Option<ExprId>> {
    let args = match ctx.expr(expr).as_ctor() {
        Some(Ctor::Tuple(args)) => args.clone(),
        _ => return None,
    };
    let required = specs.iter().filter(|s| !s.optional).count();
    if args.len() < required || args.len() > specs.len() {
        return None;
    }
    let mut rewritten = Vec::with_capacity(args.len());
    let mut changed = false;
    for (arg, spec) in args.iter().zip(specs) {
        match match_operand(ctx, *arg, &spec.matcher, &args, style)? {
            Some(new_arg) => {
                rewritten.push(new_arg);
                changed = true;
            }
            None => rewritten.push(*arg),
        }
    }
    if !changed {
        return Some(None);
    }
    let ty = ctx.expr(expr).ty;
    let location = ctx.expr(expr).location.clone();
    let new_tuple = ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::Tuple(rewritten)), ty, location));
    Some(Some(new_tuple))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::node::Location;

    fn uint_ctor(ctx: &mut AstContext, value: u64, width: u16) -> ExprId {
        let ty = ctx.standard().unsigned(width).unwrap();
        ctx.new_expr(Expr::new(
            ExprKind::Ctor(Ctor::Unsigned { value, width }),
            QualifiedType::const_rhs(ty),
            Location::none(),
        ))
    }

    #[test]
    fn coercion_is_reflexive() {
        let mut ctx = AstContext::new();
        let expr = uint_ctor(&mut ctx, 7, 8);
        for style in [
            CoercionStyle::TRY_EXACT_MATCH,
            CoercionStyle::try_all_for_assignment(),
            CoercionStyle::try_all_for_matching(),
        ] {
            let target = QualifiedType::const_rhs(ctx.standard().uint8);
            let result = coerce_expression(&mut ctx, expr, target, style);
            assert!(result.coerced, "reflexive coercion failed under {style}");
            assert!(result.nexpr.is_none());
        }
    }

    #[test]
    fn widening_needs_the_coercion_bit() {
        let mut ctx = AstContext::new();
        let expr = uint_ctor(&mut ctx, 7, 8);
        let target = QualifiedType::const_rhs(ctx.standard().uint32);
        let strict = coerce_expression(&mut ctx, expr, target, CoercionStyle::TRY_EXACT_MATCH);
        assert!(!strict.coerced);
        let loose = coerce_expression(&mut ctx, expr, target, CoercionStyle::try_all_for_assignment());
        assert!(loose.coerced);
        assert!(loose.nexpr.is_some());
    }

    #[test]
    fn literal_narrowing_checks_range() {
        let mut ctx = AstContext::new();
        let fits = uint_ctor(&mut ctx, 200, 64);
        let target = QualifiedType::const_rhs(ctx.standard().uint8);
        let ok = coerce_expression(&mut ctx, fits, target, CoercionStyle::try_all_for_assignment());
        assert!(ok.coerced);

        let too_big = uint_ctor(&mut ctx, 300, 64);
        let bad = coerce_expression(&mut ctx, too_big, target, CoercionStyle::try_all_for_assignment());
        assert!(!bad.coerced);
    }

    #[test]
    fn string_ctor_retypes_to_bytes() {
        let mut ctx = AstContext::new();
        let s = ctx.new_expr(Expr::new(
            ExprKind::Ctor(Ctor::String("HELLO".into())),
            QualifiedType::const_rhs(ctx.standard().string),
            Location::none(),
        ));
        let target = QualifiedType::const_rhs(ctx.standard().bytes);
        let result = coerce_expression(&mut ctx, s, target, CoercionStyle::try_all_for_assignment());
        assert!(result.coerced);
        let new = result.nexpr.unwrap();
        assert_eq!(ctx.expr(new).as_ctor(), Some(&Ctor::Bytes(b"HELLO".to_vec())));
    }

    #[test]
    fn optional_accepts_inner_and_null() {
        let mut ctx = AstContext::new();
        let inner_ty = ctx.standard().uint8;
        let opt = ctx.new_type(Ty::Optional(inner_ty), Location::none());
        let target = QualifiedType::const_rhs(opt);

        let value = uint_ctor(&mut ctx, 1, 8);
        assert!(coerce_expression(&mut ctx, value, target, CoercionStyle::try_all_for_assignment()).coerced);

        let null = ctx.new_expr(Expr::new(
            ExprKind::Ctor(Ctor::Null),
            QualifiedType::const_rhs(ctx.standard().null),
            Location::none(),
        ));
        assert!(coerce_expression(&mut ctx, null, target, CoercionStyle::try_all_for_assignment()).coerced);
    }

    #[test]
    fn integer_to_bool_is_contextual_only() {
        let mut ctx = AstContext::new();
        let expr = uint_ctor(&mut ctx, 1, 32);
        let target = QualifiedType::const_rhs(ctx.standard().bool_);
        let plain = coerce_expression(&mut ctx, expr, target, CoercionStyle::try_all_for_assignment());
        assert!(!plain.coerced);
        let contextual = coerce_expression(
            &mut ctx,
            expr,
            target,
            CoercionStyle::try_all_for_assignment() | CoercionStyle::CONTEXTUAL_CONVERSION,
        );
        assert!(contextual.coerced);
    }

    #[test]
    fn monotonic_under_style_widening() {
        // Anything allowed at a style stays allowed at any superset.
        let mut ctx = AstContext::new();
        let base = CoercionStyle::TRY_EXACT_MATCH;
        let wider = base | CoercionStyle::TRY_CONST_PROMOTION | CoercionStyle::TRY_COERCION;
        let expr = uint_ctor(&mut ctx, 3, 16);
        let target = QualifiedType::const_rhs(ctx.standard().uint16);
        assert!(coerce_expression(&mut ctx, expr, target, base).coerced);
        assert!(coerce_expression(&mut ctx, expr, target, wider).coerced);
        assert!(wider.is_superset_of(base));
    }
}
