//! One-shot normalization of freshly parsed modules.
//!
//! Runs once per module before the resolver iterates. The rewrites here
//! put the surface forms the parser tolerates into the single shape the
//! rest of the pipeline expects:
//!
//! - module-level properties are copied into every unit that does not
//!   override them;
//! - legacy `void`-with-attributes fields become `skip bytes` fields, with
//!   a deprecation warning;
//! - `%error` hooks without a parameter gain `(__except: string)`;
//! - `%print` hooks gain their `optional<string>` result type;
//! - transient fields (anonymous or `skip`) are marked;
//! - anonymous bitfield fields get a synthesized name, and accesses to
//!   their bit ranges through `self` are rewritten to go through it;
//! - assignment targets are marked as left-hand sides.
//!
//! The standard runtime types live in the context's root scope, so no
//! import rewriting is needed to make them visible.

use ahash::AHashMap;

use crate::{
    ast::{
        context::AstContext,
        decl::{DeclKind, Declaration, Linkage},
        expr::{Expr, ExprKind},
        node::{ExprId, ItemId, Location, ModuleId, TypeId},
        types::{QualifiedType, Side, Ty},
        unit::{PropertyKind, SpecialHook, UnitItem},
    },
    operators::OperatorKind,
    visit,
};

/// Normalizes one module. Returns `true` if anything was rewritten; the
/// second and later calls are no-ops.
pub fn normalize_module(ctx: &mut AstContext, module: ModuleId) -> bool {
    if ctx.module(module).normalized {
        return false;
    }
    tracing::debug!(module = %ctx.module(module).uid, "normalizing module");

    let module_properties = ctx.module(module).properties.clone();
    let decls = ctx.module(module).decls.clone();
    let module_hooks = ctx.module(module).hooks.clone();

    for decl in decls {
        let DeclKind::Type { ty } = ctx.decl(decl).kind else { continue };
        let ty = ctx.resolve_type(ty);
        if !matches!(ctx.ty(ty), Ty::Unit(_)) {
            continue;
        }
        copy_module_properties(ctx, ty, &module_properties);
        normalize_unit_items(ctx, ty);
        let unit_id = match ctx.ty(ty) {
            Ty::Unit(u) => u.id.clone(),
            _ => unreachable!("checked above"),
        };
        let renamed = rename_anonymous_bitfields(ctx, ty);
        if !renamed.is_empty() {
            rewrite_bitfield_accesses(ctx, ty, &unit_id, &renamed, &module_hooks);
        }
        apply_unit_properties(ctx, ty);
    }

    normalize_hooks(ctx, module);
    mark_assignment_targets(ctx, module);

    ctx.module_mut(module).normalized = true;
    true
}

/// Copies module-level properties into units that do not override them.
fn copy_module_properties(ctx: &mut AstContext, unit_ty: TypeId, properties: &[(PropertyKind, Option<ExprId>)]) {
    let Ty::Unit(unit) = ctx.ty(unit_ty) else { return };
    let present: Vec<PropertyKind> = unit
        .items
        .iter()
        .filter_map(|&i| match ctx.item(i) {
            UnitItem::Property { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    let mut new_items = Vec::new();
    for (kind, value) in properties {
        if !present.contains(kind) {
            new_items.push(ctx.new_item(UnitItem::Property {
                kind: *kind,
                value: *value,
                location: Location::none(),
            }));
        }
    }
    if new_items.is_empty() {
        return;
    }
    let Ty::Unit(unit) = &mut ctx.type_node_mut(unit_ty).ty else { return };
    unit.items.extend(new_items);
}

/// Legacy `void`-with-attributes fields and transient marking.
fn normalize_unit_items(ctx: &mut AstContext, unit_ty: TypeId) {
    let items = match ctx.ty(unit_ty) {
        Ty::Unit(unit) => unit.items.clone(),
        _ => return,
    };
    for item in items {
        normalize_field(ctx, item, false);
    }
}

fn normalize_field(ctx: &mut AstContext, item: ItemId, parent_transient: bool) {
    // Nested switch cases inherit transiency from their parent field.
    if let UnitItem::Switch(sw) = ctx.item(item) {
        let nested: Vec<ItemId> = sw.cases.iter().flat_map(|c| c.items.clone()).collect();
        for inner in nested {
            normalize_field(ctx, inner, parent_transient);
        }
        return;
    }

    let Some(field) = ctx.item(item).as_field() else { return };
    let location = field.location.clone();
    let is_void = field
        .original_ty
        .map(|t| matches!(ctx.ty(ctx.resolve_type(t)), Ty::Void));
    let has_attrs = !field.attributes.is_empty();

    if is_void == Some(true) && has_attrs {
        ctx.diagnostics.warning(
            "void fields with attributes are deprecated; use 'skip bytes' instead",
            location,
        );
        let bytes = ctx.standard().bytes;
        let field = ctx.item_mut(item).as_field_mut().expect("checked above");
        field.original_ty = Some(bytes);
        field.is_skip = true;
    }

    let field = ctx.item_mut(item).as_field_mut().expect("checked above");
    if (field.is_anonymous() || field.is_skip) && !parent_transient {
        field.is_transient = true;
    }
    let inner = field.inner;
    let transient = field.is_transient;
    if let Some(inner) = inner {
        normalize_field(ctx, inner, transient);
    }
}

/// Gives anonymous bitfield fields a synthesized name so their bit ranges
/// stay addressable. Returns bit-name -> synthesized-field-name.
fn rename_anonymous_bitfields(ctx: &mut AstContext, unit_ty: TypeId) -> AHashMap<String, String> {
    let items = match ctx.ty(unit_ty) {
        Ty::Unit(unit) => unit.items.clone(),
        _ => return AHashMap::new(),
    };
    let mut renamed = AHashMap::new();
    for item in items {
        let Some(field) = ctx.item(item).as_field() else { continue };
        if !field.is_anonymous() {
            continue;
        }
        let Some(ty) = field.original_ty else { continue };
        let resolved = ctx.resolve_type(ty);
        let Ty::Bitfield(bf) = ctx.ty(resolved) else { continue };
        let bit_names: Vec<String> = bf.bits.iter().map(|b| b.id.clone()).collect();
        let synth = ctx.unique_canonical_id("__anon_bits");
        for bit in bit_names {
            renamed.insert(bit, synth.clone());
        }
        let field = ctx.item_mut(item).as_field_mut().expect("checked above");
        field.id = Some(synth);
    }
    renamed
}

/// Rewrites `self.<bit>` to `self.<synth>.<bit>` inside the unit's hooks.
fn rewrite_bitfield_accesses(
    ctx: &mut AstContext,
    unit_ty: TypeId,
    unit_id: &str,
    renamed: &AHashMap<String, String>,
    module_hooks: &[crate::ast::node::HookId],
) {
    let mut bodies = Vec::new();
    if let Ty::Unit(unit) = ctx.ty(unit_ty) {
        for &item in &unit.items {
            match ctx.item(item) {
                UnitItem::UnitHook { hook, .. } => bodies.push(ctx.hook(*hook).body),
                UnitItem::Field(field) => {
                    for &hook in &field.hooks {
                        bodies.push(ctx.hook(hook).body);
                    }
                }
                _ => {}
            }
        }
    }
    for &hook in module_hooks {
        let hook = ctx.hook(hook);
        if hook.path.first().map(String::as_str) == Some(unit_id) {
            bodies.push(hook.body);
        }
    }

    let mut exprs = Vec::new();
    for body in bodies {
        visit::collect_stmt_exprs(ctx, body, &mut exprs);
    }
    for expr in exprs {
        let ExprKind::UnresolvedOperator { op: OperatorKind::Member, operands } = &ctx.expr(expr).kind else {
            continue;
        };
        let (recv, member) = (operands[0], operands[1]);
        if !matches!(ctx.expr(recv).kind, ExprKind::SelfRef) {
            continue;
        }
        let ExprKind::Member { id } = &ctx.expr(member).kind else { continue };
        let Some(synth) = renamed.get(id) else { continue };

        let location = ctx.expr(expr).location.clone();
        let synth_member = ctx.new_expr(Expr::new(
            ExprKind::Member { id: synth.clone() },
            ctx.unknown_qtype(),
            location.clone(),
        ));
        let inner = ctx.new_expr(Expr::new(
            ExprKind::UnresolvedOperator {
                op: OperatorKind::Member,
                operands: smallvec::smallvec![recv, synth_member],
            },
            ctx.unknown_qtype(),
            location.clone(),
        ));
        let bit_member = member;
        let new = Expr::new(
            ExprKind::UnresolvedOperator {
                op: OperatorKind::Member,
                operands: smallvec::smallvec![inner, bit_member],
            },
            ctx.unknown_qtype(),
            location,
        );
        ctx.replace_expr(expr, new);
    }
}

/// Applies `%random-access`, `%filter`, and `%context` to the unit's flags.
fn apply_unit_properties(ctx: &mut AstContext, unit_ty: TypeId) {
    let items = match ctx.ty(unit_ty) {
        Ty::Unit(unit) => unit.items.clone(),
        _ => return,
    };
    let mut random_access = false;
    let mut is_filter = false;
    let mut context = None;
    for item in items {
        let UnitItem::Property { kind, value, .. } = ctx.item(item) else { continue };
        match kind {
            PropertyKind::RandomAccess => random_access = true,
            PropertyKind::Filter => is_filter = true,
            PropertyKind::Context => {
                if let Some(value) = value {
                    if let ExprKind::TypeExpr(ty) = ctx.expr(*value).kind {
                        context = Some(ty);
                    } else if let ExprKind::Name { id, .. } = &ctx.expr(*value).kind {
                        let id = id.clone();
                        context = Some(ctx.new_type(
                            Ty::Name {
                                id,
                                resolved: crate::ast::node::TypeIndex::NONE,
                            },
                            Location::none(),
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    let Ty::Unit(unit) = &mut ctx.type_node_mut(unit_ty).ty else { return };
    unit.random_access = random_access;
    unit.is_filter = is_filter;
    if context.is_some() {
        unit.context = context;
    }
}

/// `%error` parameter and `%print` result-type defaults, for both inline
/// and module-level hooks.
fn normalize_hooks(ctx: &mut AstContext, module: ModuleId) {
    let mut hooks = ctx.module(module).hooks.clone();
    for decl in ctx.module(module).decls.clone() {
        let DeclKind::Type { ty } = ctx.decl(decl).kind else { continue };
        if let Ty::Unit(unit) = ctx.ty(ctx.resolve_type(ty)) {
            for &item in &unit.items {
                match ctx.item(item) {
                    UnitItem::UnitHook { hook, .. } => hooks.push(*hook),
                    UnitItem::Field(field) => hooks.extend(field.hooks.iter().copied()),
                    _ => {}
                }
            }
        }
    }

    for hook in hooks {
        match ctx.hook(hook).special {
            Some(SpecialHook::Error) => {
                if ctx.hook(hook).params.is_empty() {
                    let string_ty = ctx.standard().string;
                    let location = ctx.hook(hook).location.clone();
                    let param = ctx.new_decl(Declaration::new(
                        "__except",
                        DeclKind::Parameter {
                            ty: string_ty,
                            inout: false,
                            default: None,
                        },
                        Linkage::Private,
                        location,
                    ));
                    ctx.register_declaration(param);
                    ctx.hook_mut(hook).params.push(param);
                }
            }
            Some(SpecialHook::Print) => {
                if ctx.hook(hook).result.is_none() {
                    let string_ty = ctx.standard().string;
                    let result = ctx.new_type(Ty::Optional(string_ty), Location::none());
                    ctx.hook_mut(hook).result = Some(result);
                }
            }
            _ => {}
        }
    }
}

/// Marks assignment targets as LHS so member resolution picks the
/// non-const access path.
fn mark_assignment_targets(ctx: &mut AstContext, module: ModuleId) {
    let mut exprs = Vec::new();
    let decls = ctx.module(module).decls.clone();
    for decl in decls {
        visit::collect_decl_exprs(ctx, decl, &mut exprs);
        if let DeclKind::Function(f) = &ctx.decl(decl).kind {
            if let Some(body) = f.body {
                visit::collect_stmt_exprs(ctx, body, &mut exprs);
            }
        }
    }
    for hook in ctx.module(module).hooks.clone() {
        let body = ctx.hook(hook).body;
        visit::collect_stmt_exprs(ctx, body, &mut exprs);
    }

    for expr in exprs {
        if let ExprKind::Assign { target, .. } = ctx.expr(expr).kind {
            let qt = ctx.expr(target).ty;
            ctx.expr_mut(target).ty = QualifiedType {
                side: Side::Lhs,
                ..qt
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::ast::context::Dialect;

    fn module_from(source: &str) -> (AstContext, ModuleId) {
        let mut ctx = AstContext::new();
        let module = crate::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl).expect("parse");
        (ctx, module)
    }

    #[test]
    fn normalization_is_idempotent() {
        let (mut ctx, module) = module_from("module M;\ntype X = unit { x: bytes &size=2; };");
        assert!(normalize_module(&mut ctx, module));
        assert!(!normalize_module(&mut ctx, module));
    }

    #[test]
    fn legacy_void_field_becomes_skip_bytes_with_warning() {
        let (mut ctx, module) = module_from("module M;\ntype X = unit { : void &size=4; };");
        normalize_module(&mut ctx, module);
        let emitted = ctx.diagnostics.emitted();
        assert!(emitted.iter().any(|d| d.message.contains("deprecated")));
        let DeclKind::Type { ty } = ctx.decl(ctx.module(module).decls[0]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ty) else { panic!() };
        let field = ctx.item(unit.items[0]).as_field().expect("field");
        assert!(field.is_skip);
        assert!(field.is_transient);
        assert_eq!(field.original_ty, Some(ctx.standard().bytes));
    }

    #[test]
    fn module_properties_copied_into_units() {
        let (mut ctx, module) = module_from("module M;\n%byte-order = Big;\ntype X = unit { x: uint16; };");
        normalize_module(&mut ctx, module);
        let DeclKind::Type { ty } = ctx.decl(ctx.module(module).decls[0]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ty) else { panic!() };
        let has_byte_order = unit.items.iter().any(|&i| {
            matches!(
                ctx.item(i),
                UnitItem::Property {
                    kind: PropertyKind::ByteOrder,
                    ..
                }
            )
        });
        assert!(has_byte_order);
    }

    #[test]
    fn error_hook_gains_except_parameter() {
        let (mut ctx, module) = module_from("module M;\ntype X = unit { x: uint8; %error { } };");
        normalize_module(&mut ctx, module);
        let DeclKind::Type { ty } = ctx.decl(ctx.module(module).decls[0]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ty) else { panic!() };
        let hook = unit
            .items
            .iter()
            .find_map(|&i| match ctx.item(i) {
                UnitItem::UnitHook { hook, .. } => Some(*hook),
                _ => None,
            })
            .expect("hook item");
        let params = &ctx.hook(hook).params;
        assert_eq!(params.len(), 1);
        assert_eq!(ctx.decl(params[0]).id, "__except");
    }

    #[test]
    fn random_access_property_sets_unit_flag() {
        let (mut ctx, module) = module_from("module M;\ntype X = unit { %random-access; x: uint8; };");
        normalize_module(&mut ctx, module);
        let DeclKind::Type { ty } = ctx.decl(ctx.module(module).decls[0]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ty) else { panic!() };
        assert!(unit.random_access);
    }
}
