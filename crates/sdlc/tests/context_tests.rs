//! Tests for the AST context's registration tables and module registry.

use std::path::Path;

use pretty_assertions::assert_eq;
use sdlc::{
    ast::{
        decl::{DeclKind, Declaration, Linkage},
        expr::{Ctor, Expr, ExprKind},
        node::Location,
        types::{QualifiedType, Ty},
    },
    AstContext, Dialect,
};

fn bool_const(ctx: &mut AstContext, id: &str) -> sdlc::ast::node::DeclId {
    let value = ctx.new_expr(Expr::new(
        ExprKind::Ctor(Ctor::Bool(true)),
        QualifiedType::const_rhs(ctx.standard().bool_),
        Location::none(),
    ));
    ctx.new_decl(Declaration::new(
        id,
        DeclKind::Constant { ty: None, value },
        Linkage::Private,
        Location::none(),
    ))
}

// =============================================================================
// 1. Registration
// =============================================================================

/// Registering the same node twice yields equal indices.
#[test]
fn double_registration_returns_same_index() {
    let mut ctx = AstContext::new();
    let decl = bool_const(&mut ctx, "x");
    assert_eq!(ctx.register_declaration(decl), ctx.register_declaration(decl));

    let ty = ctx.new_type(Ty::Bytes, Location::none());
    assert_eq!(ctx.register_type(ty), ctx.register_type(ty));
}

/// A registered index always resolves to a node.
#[test]
fn lookup_of_registered_index_never_dangles() {
    let mut ctx = AstContext::new();
    let decl = bool_const(&mut ctx, "x");
    let index = ctx.register_declaration(decl);
    assert_eq!(ctx.lookup_declaration(index).id, "x");
}

// =============================================================================
// 2. Replacement
// =============================================================================

/// `replace(old, new)` re-points lookups; the old node's stored index is
/// untouched and stays readable.
#[test]
fn replace_updates_lookup_but_not_old_node() {
    let mut ctx = AstContext::new();
    let old = bool_const(&mut ctx, "old");
    let index = ctx.register_declaration(old);
    let new = bool_const(&mut ctx, "new");
    ctx.replace_declaration(index, new);

    assert_eq!(ctx.lookup_declaration(index).id, "new");
    assert_eq!(ctx.decl(old).index, index, "old node keeps its stored index");
    assert_eq!(ctx.decl(old).id, "old", "old node stays readable");
}

/// Replacing a type declaration's type carries the declaration index over
/// to the new type.
#[test]
fn type_replacement_carries_declaration_index() {
    let mut ctx = AstContext::new();
    let old_ty = ctx.new_type(Ty::Bytes, Location::none());
    let index = ctx.register_type(old_ty);

    let decl = bool_const(&mut ctx, "T");
    let decl_index = ctx.register_declaration(decl);
    ctx.type_node_mut(old_ty).declaration = decl_index;

    let new_ty = ctx.new_type(Ty::Stream, Location::none());
    ctx.replace_type(index, new_ty);

    assert_eq!(ctx.lookup_type(index).ty, Ty::Stream);
    assert_eq!(ctx.type_node(new_ty).declaration, decl_index);
}

// =============================================================================
// 3. Modules
// =============================================================================

#[test]
fn module_uids_are_unique_per_path() {
    let mut ctx = AstContext::new();
    let first =
        sdlc::parse::parse_module(&mut ctx, "module A;", Path::new("a.sdl"), Dialect::Sdl).expect("parse a");
    let second =
        sdlc::parse::parse_module(&mut ctx, "module B;", Path::new("b.sdl"), Dialect::Sdl).expect("parse b");
    assert_ne!(ctx.module(first).uid, ctx.module(second).uid);
    assert_eq!(ctx.module_by_path(Path::new("a.sdl")), Some(first));
    assert_eq!(ctx.module_by_id("B", None), Some(second));
}

#[test]
fn dependencies_follow_imports() {
    let mut ctx = AstContext::new();
    let lib =
        sdlc::parse::parse_module(&mut ctx, "module Lib;\npublic const X = 1;", Path::new("lib.sdl"), Dialect::Sdl)
            .expect("parse lib");
    sdlc::parse::parse_module(
        &mut ctx,
        "module App;\nimport Lib;\nconst Y = Lib::X;",
        Path::new("app.sdl"),
        Dialect::Sdl,
    )
    .expect("parse app");
    let registry = sdlc::Registry::build(&ctx);
    sdlc::resolver::resolve(&mut ctx, &registry).unwrap_or_else(|()| {
        panic!(
            "resolution failed: {:?}",
            ctx.diagnostics.emitted().iter().map(ToString::to_string).collect::<Vec<_>>()
        )
    });
    let app_uid = ctx.modules().find(|(_, m)| m.id == "App").map(|(_, m)| m.uid.clone()).unwrap();
    let deps = ctx.dependencies(&app_uid, false);
    assert_eq!(deps, vec![ctx.module(lib).uid.clone()]);
}

// =============================================================================
// 4. Canonical IDs
// =============================================================================

#[test]
fn canonical_ids_are_monotonically_unique() {
    let mut ctx = AstContext::new();
    let a = ctx.unique_canonical_id("name");
    let b = ctx.unique_canonical_id("name");
    let c = ctx.unique_canonical_id("name");
    assert_eq!(a, "name");
    assert_ne!(a, b);
    assert_ne!(b, c);
}
