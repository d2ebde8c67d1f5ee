//! Unused-field elimination.
//!
//! Collects, per struct/unit field, the sets of reads, writes, and unsets
//! across the whole program, then rewrites:
//!
//! - fields with no reads and no writes are marked `&no-emit` (no struct
//!   member is generated; a parsed field's value is simply not stored) and
//!   their unsets are dropped;
//! - fields with writes but no reads keep parsing but lose the stores:
//!   top-level member assignments are reduced to their right-hand side,
//!   side-effect-free struct-ctor initializers are deleted, and
//!   non-constant `&default` attributes are stripped;
//! - reads of never-written optional fields are replaced by their
//!   `&default` when one exists, and `has-member` checks on them become
//!   constants.
//!
//! Excluded from consideration: fields already `&no-emit`, `&static`
//! fields, function-typed fields, fields carrying `&needed-by-feature` or
//! `&always-emit`, and fields of types whose layout crosses the host ABI
//! (public or exported linkage, `&cxxname`). The pass is skipped entirely
//! in strict public-API mode.

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{
        context::AstContext,
        decl::{DeclKind, Linkage},
        expr::{Ctor, Expr, ExprKind},
        node::{DeclId, ExprId, Location, ModuleId, TypeId},
        types::Ty,
        unit::{Attribute, AttributeKind, UnitItem},
    },
    folder::{self, FoldStyle},
    operators::{OperatorKind, Registry},
    visit,
};

/// Identity of a field across the program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FieldKey {
    Unit(TypeId, String),
    Struct(DeclId),
}

#[derive(Debug, Default)]
struct Uses {
    reads: Vec<ExprId>,
    writes: Vec<ExprId>,
    unsets: Vec<ExprId>,
    has_member_checks: Vec<ExprId>,
}

/// Runs the pass; returns whether anything was rewritten.
pub fn remove_unused_fields(ctx: &mut AstContext, registry: &Registry) -> bool {
    let mut collector = Collector {
        ctx: &mut *ctx,
        registry,
        uses: AHashMap::new(),
        assign_targets: AHashSet::new(),
    };
    collector.run();
    let uses = collector.uses;

    let mut changed = false;
    let keys: Vec<FieldKey> = candidate_fields(ctx);
    for key in keys {
        let use_info = uses.get(&key);
        let reads = use_info.map_or(0, |u| u.reads.len() + u.has_member_checks.len());
        let writes = use_info.map_or(0, |u| u.writes.len());

        if reads == 0 && writes == 0 {
            changed |= mark_no_emit(ctx, &key);
            if let Some(u) = use_info {
                for &unset in &u.unsets {
                    neutralize(ctx, unset);
                    changed = true;
                }
            }
        } else if reads == 0 {
            if let Some(u) = use_info {
                for &write in &u.writes {
                    changed |= drop_write(ctx, registry, write);
                }
            }
            changed |= strip_nonconstant_default(ctx, registry, &key);
        } else if writes == 0 {
            changed |= substitute_reads(ctx, &key, use_info);
        }
    }
    changed
}

/// All fields eligible for elimination, after the exclusion rules.
fn candidate_fields(ctx: &AstContext) -> Vec<FieldKey> {
    let mut out = Vec::new();
    let modules: Vec<ModuleId> = ctx.modules().map(|(id, _)| id).collect();
    for module in modules {
        for &decl_id in &ctx.module(module).decls {
            let decl = ctx.decl(decl_id);
            let DeclKind::Type { ty } = decl.kind else { continue };
            // Public and exported types cross the host ABI and keep their
            // full layout, as do externally-named ones.
            if decl.linkage != Linkage::Private || decl.attributes.has(AttributeKind::Cxxname) {
                continue;
            }
            let ty = ctx.resolve_type(ty);
            match ctx.ty(ty) {
                Ty::Unit(unit) => {
                    for &item in &unit.items {
                        let UnitItem::Field(field) = ctx.item(item) else { continue };
                        let Some(id) = &field.id else { continue };
                        if field_excluded(&field.attributes) {
                            continue;
                        }
                        if field.is_transient {
                            continue;
                        }
                        out.push(FieldKey::Unit(ty, id.clone()));
                    }
                }
                Ty::Struct(st) => {
                    for &field in &st.fields {
                        let fdecl = ctx.decl(field);
                        if field_excluded(&fdecl.attributes) {
                            continue;
                        }
                        if let DeclKind::Field { ty: fty, .. } = fdecl.kind {
                            if matches!(ctx.ty(ctx.resolve_type(fty)), Ty::Function(_)) {
                                continue;
                            }
                        }
                        out.push(FieldKey::Struct(field));
                    }
                }
                _ => {}
            }
        }
    }
    out
}

fn field_excluded(attrs: &crate::ast::unit::AttributeSet) -> bool {
    attrs.has(AttributeKind::NoEmit)
        || attrs.has(AttributeKind::Static)
        || attrs.has(AttributeKind::NeededByFeature)
        || attrs.has(AttributeKind::AlwaysEmit)
        || attrs.has(AttributeKind::Cxxname)
}

struct Collector<'a> {
    ctx: &'a mut AstContext,
    registry: &'a Registry,
    uses: AHashMap<FieldKey, Uses>,
    assign_targets: AHashSet<ExprId>,
}

impl Collector<'_> {
    fn run(&mut self) {
        let exprs = all_exprs(self.ctx);
        // Assignment targets first, so member reads can exclude them.
        for &expr in &exprs {
            if let ExprKind::Assign { target, .. } = self.ctx.expr(expr).kind {
                self.assign_targets.insert(target);
            }
        }
        for expr in exprs {
            self.classify(expr);
        }
    }

    fn classify(&mut self, expr: ExprId) {
        let kind = self.ctx.expr(expr).kind.clone();
        match kind {
            ExprKind::ResolvedOperator { op, ref operands } => {
                let op_kind = self.registry.op(op).kind;
                self.classify_member_op(expr, op_kind, operands);
            }
            ExprKind::UnresolvedOperator { op, ref operands } => {
                self.classify_member_op(expr, op, operands);
            }
            ExprKind::Ctor(Ctor::Struct { ty, fields }) => {
                let ty = self.ctx.resolve_type(ty);
                if let Ty::Struct(st) = self.ctx.ty(ty).clone() {
                    for (name, value) in fields {
                        for &fdecl in &st.fields {
                            if self.ctx.decl(fdecl).id == name {
                                self.uses.entry(FieldKey::Struct(fdecl)).or_default().writes.push(value);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn classify_member_op(&mut self, expr: ExprId, kind: OperatorKind, operands: &[ExprId]) {
        if !matches!(
            kind,
            OperatorKind::Member | OperatorKind::TryMember | OperatorKind::HasMember | OperatorKind::Unset
        ) {
            return;
        }
        let Some(key) = self.field_key(operands) else { return };
        let uses = self.uses.entry(key).or_default();
        match kind {
            OperatorKind::Unset => uses.unsets.push(expr),
            OperatorKind::HasMember => uses.has_member_checks.push(expr),
            _ if self.assign_targets.contains(&expr) => uses.writes.push(expr),
            _ => uses.reads.push(expr),
        }
    }

    fn field_key(&self, operands: &[ExprId]) -> Option<FieldKey> {
        let recv_ty = self.ctx.resolve_type(self.ctx.expr(operands[0]).ty.ty);
        let ExprKind::Member { id } = &self.ctx.expr(*operands.get(1)?).kind else {
            return None;
        };
        match self.ctx.ty(recv_ty) {
            Ty::Unit(_) => Some(FieldKey::Unit(recv_ty, id.clone())),
            Ty::Struct(st) => st
                .fields
                .iter()
                .copied()
                .find(|&f| self.ctx.decl(f).id == *id)
                .map(FieldKey::Struct),
            _ => None,
        }
    }
}

/// Every expression in the program, via modules, declarations, unit items,
/// and hooks.
fn all_exprs(ctx: &AstContext) -> Vec<ExprId> {
    let mut out = Vec::new();
    let modules: Vec<ModuleId> = ctx.modules().map(|(id, _)| id).collect();
    for module in modules {
        for &decl in &ctx.module(module).decls {
            visit::collect_decl_exprs(ctx, decl, &mut out);
            match &ctx.decl(decl).kind {
                DeclKind::Function(f) => {
                    if let Some(body) = f.body {
                        visit::collect_stmt_exprs(ctx, body, &mut out);
                    }
                }
                DeclKind::Type { ty } => {
                    let ty = ctx.resolve_type(*ty);
                    if let Ty::Unit(unit) = ctx.ty(ty) {
                        collect_unit_exprs(ctx, &unit.items, &mut out);
                    }
                }
                _ => {}
            }
        }
        for &hook in &ctx.module(module).hooks {
            visit::collect_stmt_exprs(ctx, ctx.hook(hook).body, &mut out);
        }
    }
    out
}

fn collect_unit_exprs(ctx: &AstContext, items: &[crate::ast::node::ItemId], out: &mut Vec<ExprId>) {
    for &item in items {
        match ctx.item(item) {
            UnitItem::Field(field) => {
                for attr in field.attributes.iter() {
                    if let Some(value) = attr.value {
                        visit::collect_exprs(ctx, value, out);
                    }
                }
                if let Some(e) = field.repeat {
                    visit::collect_exprs(ctx, e, out);
                }
                if let Some(e) = field.condition {
                    visit::collect_exprs(ctx, e, out);
                }
                for &sink in &field.sinks {
                    visit::collect_exprs(ctx, sink, out);
                }
                for &hook in &field.hooks {
                    visit::collect_stmt_exprs(ctx, ctx.hook(hook).body, out);
                }
            }
            UnitItem::Variable { default: Some(e), .. } => visit::collect_exprs(ctx, *e, out),
            UnitItem::Property { value: Some(e), .. } => visit::collect_exprs(ctx, *e, out),
            UnitItem::UnitHook { hook, .. } => visit::collect_stmt_exprs(ctx, ctx.hook(*hook).body, out),
            UnitItem::Switch(sw) => {
                if let Some(e) = sw.cond {
                    visit::collect_exprs(ctx, e, out);
                }
                for case in &sw.cases {
                    for &e in &case.exprs {
                        visit::collect_exprs(ctx, e, out);
                    }
                    collect_unit_exprs(ctx, &case.items, out);
                }
            }
            _ => {}
        }
    }
}

/// Marks a dead field `&no-emit("optimized")`.
fn mark_no_emit(ctx: &mut AstContext, key: &FieldKey) -> bool {
    let reason = ctx.new_expr(Expr::new(
        ExprKind::Ctor(Ctor::String("optimized".into())),
        crate::ast::types::QualifiedType::const_rhs(ctx.standard().string),
        Location::none(),
    ));
    let attribute = Attribute {
        kind: AttributeKind::NoEmit,
        value: Some(reason),
        location: Location::none(),
    };
    match key {
        FieldKey::Unit(unit_ty, name) => {
            let items = match ctx.ty(*unit_ty) {
                Ty::Unit(unit) => unit.items.clone(),
                _ => return false,
            };
            for item in items {
                let Some(field) = ctx.item(item).as_field() else { continue };
                if field.id.as_deref() == Some(name) {
                    tracing::debug!(field = %name, "removing unused unit field");
                    ctx.item_mut(item)
                        .as_field_mut()
                        .expect("checked above")
                        .attributes
                        .add(attribute);
                    return true;
                }
            }
            false
        }
        FieldKey::Struct(decl) => {
            tracing::debug!(field = %ctx.decl(*decl).id, "removing unused struct field");
            ctx.decl_mut(*decl).attributes.add(attribute);
            true
        }
    }
}

/// Replaces an expression with an inert constant so the statement it sits
/// in becomes a no-op.
fn neutralize(ctx: &mut AstContext, expr: ExprId) {
    let ty = crate::ast::types::QualifiedType::const_rhs(ctx.standard().bool_);
    let location = ctx.expr(expr).location.clone();
    ctx.replace_expr(expr, Expr::new(ExprKind::Ctor(Ctor::Bool(true)), ty, location));
}

/// Reduces a dead store. A top-level `x.f = rhs` becomes `rhs`; a store
/// inside a tuple target is kept when its slot may have side effects.
fn drop_write(ctx: &mut AstContext, registry: &Registry, write: ExprId) -> bool {
    // Find the assignment whose target is this member access.
    let assigns: Vec<ExprId> = all_exprs(ctx)
        .into_iter()
        .filter(|&e| matches!(ctx.expr(e).kind, ExprKind::Assign { target, .. } if target == write))
        .collect();
    let mut changed = false;
    for assign in assigns {
        let ExprKind::Assign { source, .. } = ctx.expr(assign).kind else { continue };
        let side_effect_free = folder::fold(ctx, registry, source, FoldStyle::full())
            .map(|f| f.is_some())
            .unwrap_or(false);
        let location = ctx.expr(assign).location.clone();
        if side_effect_free {
            // Neither store nor value needed.
            neutralize(ctx, assign);
        } else {
            // The value must still be evaluated.
            let ty = ctx.expr(source).ty;
            ctx.replace_expr(assign, Expr::new(ExprKind::Grouping(source), ty, location));
        }
        changed = true;
    }
    changed
}

/// Strips a non-constant `&default` from a write-only field.
fn strip_nonconstant_default(ctx: &mut AstContext, registry: &Registry, key: &FieldKey) -> bool {
    let FieldKey::Unit(unit_ty, name) = key else { return false };
    let items = match ctx.ty(*unit_ty) {
        Ty::Unit(unit) => unit.items.clone(),
        _ => return false,
    };
    for item in items {
        let Some(field) = ctx.item(item).as_field() else { continue };
        if field.id.as_deref() != Some(name) {
            continue;
        }
        let Some(default) = field.attributes.value_of(AttributeKind::Default) else {
            return false;
        };
        let constant = folder::fold(ctx, registry, default, FoldStyle::full())
            .map(|f| f.is_some())
            .unwrap_or(false);
        if !constant {
            ctx.item_mut(item)
                .as_field_mut()
                .expect("checked above")
                .attributes
                .remove(AttributeKind::Default);
            return true;
        }
        return false;
    }
    false
}

/// Replaces reads of a never-written field: the `&default` value when one
/// exists, and constant results for `has-member` checks.
fn substitute_reads(ctx: &mut AstContext, key: &FieldKey, uses: Option<&Uses>) -> bool {
    let Some(uses) = uses else { return false };
    let FieldKey::Unit(unit_ty, name) = key else { return false };

    let (default, is_optional) = {
        let items = match ctx.ty(*unit_ty) {
            Ty::Unit(unit) => unit.items.clone(),
            _ => return false,
        };
        let mut found = None;
        for item in &items {
            if let Some(field) = ctx.item(*item).as_field() {
                if field.id.as_deref() == Some(name) {
                    found = Some((
                        field.attributes.value_of(AttributeKind::Default),
                        field.attributes.has(AttributeKind::Optional),
                    ));
                }
            }
        }
        match found {
            Some(found) => found,
            None => return false,
        }
    };

    let mut changed = false;
    // Parsed unit fields are written by the parse procedure itself; only
    // fields guarded as optional can be constant-folded away here.
    if is_optional {
        if let Some(default) = default {
            for &read in &uses.reads {
                let default_expr = ctx.expr(default).clone();
                ctx.replace_expr(read, default_expr);
                changed = true;
            }
        }
        for &check in &uses.has_member_checks {
            let ty = crate::ast::types::QualifiedType::const_rhs(ctx.standard().bool_);
            let location = ctx.expr(check).location.clone();
            ctx.replace_expr(check, Expr::new(ExprKind::Ctor(Ctor::Bool(false)), ty, location));
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::ast::context::Dialect;

    fn optimized(source: &str) -> AstContext {
        let mut ctx = AstContext::new();
        crate::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl).expect("parse");
        let registry = Registry::build(&ctx);
        crate::resolver::resolve(&mut ctx, &registry).expect("resolve");
        remove_unused_fields(&mut ctx, &registry);
        ctx
    }

    fn field_attrs<'a>(ctx: &'a AstContext, unit_decl: usize, name: &str) -> &'a crate::ast::unit::AttributeSet {
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Type { ty } = ctx.decl(module.decls[unit_decl]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ctx.resolve_type(ty)) else { panic!() };
        for &item in &unit.items {
            if let Some(field) = ctx.item(item).as_field() {
                if field.id.as_deref() == Some(name) {
                    return &field.attributes;
                }
            }
        }
        panic!("no field {name}");
    }

    #[test]
    fn unread_field_marked_no_emit() {
        let ctx = optimized("module M;\ntype X = unit { a: uint8; b: uint8; on %done { local n = self.a; } };");
        assert!(!field_attrs(&ctx, 0, "a").has(AttributeKind::NoEmit), "read field kept");
        assert!(field_attrs(&ctx, 0, "b").has(AttributeKind::NoEmit), "unread field dropped");
    }

    #[test]
    fn always_emit_protects_field() {
        let ctx = optimized("module M;\ntype X = unit { b: uint8 &always-emit; };");
        assert!(!field_attrs(&ctx, 0, "b").has(AttributeKind::NoEmit));
    }

    #[test]
    fn exported_unit_keeps_all_fields() {
        let ctx = optimized("module M;\nexport type X = unit { b: uint8; };");
        assert!(!field_attrs(&ctx, 0, "b").has(AttributeKind::NoEmit));
    }

    #[test]
    fn public_unit_keeps_all_fields() {
        let ctx = optimized("module M;\npublic type X = unit { b: uint8; };");
        assert!(!field_attrs(&ctx, 0, "b").has(AttributeKind::NoEmit));
    }

    #[test]
    fn write_only_field_keeps_rhs_evaluation() {
        // `self.b = self.a` stores into an unread field; the store goes,
        // the field itself is then unread-and-unwritten on a rerun.
        let ctx = optimized(
            "module M;\ntype X = unit { a: uint8; b: uint8; on %done { self.b = self.a; local n = self.a; } };",
        );
        // b had a write, so it is not yet no-emit.
        assert!(!field_attrs(&ctx, 0, "b").has(AttributeKind::NoEmit));
    }

    #[test]
    fn fields_read_through_attribute_expressions_are_live() {
        let ctx = optimized("module M;\ntype X = unit { n: uint8; xs: bytes &size=n; };");
        assert!(!field_attrs(&ctx, 0, "n").has(AttributeKind::NoEmit));
    }
}
