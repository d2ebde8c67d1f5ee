//! Tests for the resolver fixed-point loop, coercion properties, and
//! normalization.

use std::path::Path;

use sdlc::{
    ast::{decl::DeclKind, expr::ExprKind, types::Ty},
    coercion::{self, CoercionStyle},
    AstContext, Dialect, Registry,
};

fn resolve(source: &str) -> Result<AstContext, Vec<String>> {
    let mut ctx = AstContext::new();
    sdlc::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl)
        .map_err(|()| emitted(&ctx))?;
    let registry = Registry::build(&ctx);
    match sdlc::resolver::resolve(&mut ctx, &registry) {
        Ok(()) => Ok(ctx),
        Err(()) => Err(emitted(&ctx)),
    }
}

fn emitted(ctx: &AstContext) -> Vec<String> {
    ctx.diagnostics.emitted().iter().map(ToString::to_string).collect()
}

// =============================================================================
// 1. Convergence and name resolution
// =============================================================================

/// A successfully resolved program has no unresolved names left: every
/// constant's value expression carries a concrete type.
#[test]
fn resolved_programs_have_no_unresolved_names() {
    let ctx = resolve(
        "module M;\nconst A = 1 + 2;\nconst B = A * 3;\ntype U = unit { n: uint8; body: bytes &size=n; };",
    )
    .unwrap_or_else(|errors| panic!("{errors:?}"));
    let (_, module) = ctx.modules().next().expect("module");
    for &decl in &module.decls {
        if let DeclKind::Constant { value, .. } = ctx.decl(decl).kind {
            let e = ctx.expr(value);
            assert!(e.is_resolved_name(), "unresolved name in {:?}", e.kind);
            assert!(
                !matches!(ctx.ty(ctx.resolve_type(e.ty.ty)), Ty::Unknown),
                "constant type stayed unknown"
            );
        }
    }
}

/// Resolution terminates with an error, not a hang, on unresolvable input.
#[test]
fn unresolvable_input_terminates_with_errors() {
    let errors = resolve("module M;\nconst A = missing_name;").expect_err("must fail");
    assert!(errors.iter().any(|e| e.contains("missing_name")), "{errors:?}");

    let errors = resolve("module M;\ntype U = unit { f: NoSuchType; };").expect_err("must fail");
    assert!(errors.iter().any(|e| e.contains("NoSuchType")), "{errors:?}");
}

/// Forward references resolve through the declaration table.
#[test]
fn forward_references_resolve() {
    let ctx = resolve("module M;\nconst A = B + 1;\nconst B = 2;").unwrap_or_else(|errors| panic!("{errors:?}"));
    let (_, module) = ctx.modules().next().expect("module");
    let DeclKind::Constant { value, .. } = ctx.decl(module.decls[0]).kind else { panic!() };
    assert!(matches!(ctx.expr(value).kind, ExprKind::ResolvedOperator { .. }));
}

// =============================================================================
// 2. Normalization idempotence
// =============================================================================

/// A second normalization pass rewrites nothing.
#[test]
fn normalization_is_idempotent_after_one_pass() {
    let mut ctx = AstContext::new();
    let module = sdlc::parse::parse_module(
        &mut ctx,
        "module M;\n%byte-order = Big;\ntype U = unit { : void &size=2; x: uint16; %error { } };",
        Path::new("t.sdl"),
        Dialect::Sdl,
    )
    .expect("parse");
    assert!(sdlc::normalizer::normalize_module(&mut ctx, module));
    assert!(!sdlc::normalizer::normalize_module(&mut ctx, module));
}

// =============================================================================
// 3. Coercion properties
// =============================================================================

/// Coercion is reflexive: T -> T succeeds under every style.
#[test]
fn coercion_is_reflexive() {
    let ctx = AstContext::new();
    let std = ctx.standard();
    for ty in [std.bool_, std.bytes, std.uint8, std.int64, std.stream, std.real] {
        for style in [
            CoercionStyle::TRY_EXACT_MATCH,
            CoercionStyle::try_all_for_assignment(),
            CoercionStyle::try_all_for_matching(),
            CoercionStyle::try_all_for_function_call(),
        ] {
            assert!(
                coercion::coerce_type(&ctx, ty, ty, style),
                "reflexivity failed under {style}"
            );
        }
    }
}

/// A coercion allowed at style S stays allowed at any superset of S.
#[test]
fn coercion_is_monotonic_under_style_widening() {
    let ctx = AstContext::new();
    let std = ctx.standard();
    let base = CoercionStyle::TRY_EXACT_MATCH | CoercionStyle::TRY_COERCION;
    let wider = base | CoercionStyle::TRY_CONST_PROMOTION | CoercionStyle::CONTEXTUAL_CONVERSION;
    assert!(wider.is_superset_of(base));

    let pairs = [
        (std.uint8, std.uint32),
        (std.uint16, std.int64),
        (std.string, std.bytes),
        (std.int8, std.real),
        (std.stream, std.view),
    ];
    for (from, to) in pairs {
        if coercion::coerce_type(&ctx, from, to, base) {
            assert!(
                coercion::coerce_type(&ctx, from, to, wider),
                "widening lost a coercion"
            );
        }
    }
}

/// Narrowing integers is rejected at the type level.
#[test]
fn integer_narrowing_is_rejected() {
    let ctx = AstContext::new();
    let std = ctx.standard();
    assert!(!coercion::coerce_type(
        &ctx,
        std.uint64,
        std.uint8,
        CoercionStyle::try_all_for_assignment()
    ));
}

// =============================================================================
// 4. Unit field typing
// =============================================================================

/// Field types flow: the parse type comes from the declaration, the item
/// type from `&convert`, and containers wrap the element type.
#[test]
fn field_type_derivation() {
    let ctx = resolve("module M;\ntype U = unit { n: bytes &size=2 &convert=$$.to_uint(10); ws: uint16[3]; };")
        .unwrap_or_else(|errors| panic!("{errors:?}"));
    let (_, module) = ctx.modules().next().expect("module");
    let DeclKind::Type { ty } = ctx.decl(module.decls[0]).kind else { panic!() };
    let Ty::Unit(unit) = ctx.ty(ctx.resolve_type(ty)) else { panic!() };

    let n = ctx.item(unit.items[0]).as_field().expect("field n");
    assert!(matches!(ctx.ty(ctx.resolve_type(n.parse_ty.unwrap())), Ty::Bytes));
    assert!(matches!(
        ctx.ty(ctx.resolve_type(n.item_ty.unwrap())),
        Ty::UnsignedInteger(64)
    ));

    let ws = ctx.item(unit.items[1]).as_field().expect("field ws");
    let Ty::Vector(elem) = ctx.ty(ctx.resolve_type(ws.item_ty.unwrap())) else {
        panic!("container item type is not a vector")
    };
    assert!(matches!(ctx.ty(ctx.resolve_type(*elem)), Ty::UnsignedInteger(16)));
}

/// `self` members work both explicitly and as bare field names.
#[test]
fn bare_field_names_resolve_as_self_members() {
    let ctx = resolve("module M;\ntype U = unit { n: uint8; a: bytes &size=n; b: bytes &size=self.n; };")
        .unwrap_or_else(|errors| panic!("{errors:?}"));
    drop(ctx);
}
