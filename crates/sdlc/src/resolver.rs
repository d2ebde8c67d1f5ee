//! The resolver: repeated rewriting passes driving the AST to a fixed
//! point.
//!
//! Each pass normalizes (once per module), derives unit field types,
//! promotes unresolved fields, binds hooks to their units, resolves
//! operators and calls, and resolves names. A pass records whether it
//! modified anything and how many nodes remain unresolved. The loop ends
//! when a full pass changes nothing: success if nothing is left
//! unresolved, otherwise a final reporting pass attaches user-facing
//! errors to the nodes that never resolved.

use crate::{
    ast::{
        context::AstContext,
        decl::{DeclKind, Declaration, Linkage},
        expr::{Ctor, Expr, ExprKind, Operands},
        node::{DeclarationIndex, ExprId, HookId, ItemId, Location, ModuleId, ScopeId, StmtId, TypeId},
        types::{self, Constness, QualifiedType, Side, Ty},
        unit::{AttributeKind, HookFlavor, SpecialHook, UnitField, UnitItem},
    },
    coercion::{self, CoercionStyle},
    diagnostics::Diagnostic,
    normalizer,
    operators::{OperatorId, OperatorKind, Registry},
};

/// Upper bound on resolver passes; reaching it means the rewrite rules
/// oscillate, which is an internal error rather than a user mistake.
const MAX_PASSES: usize = 64;

/// Resolves the whole program to a fixed point. On failure, diagnostics
/// describe every node that could not be resolved.
pub fn resolve(ctx: &mut AstContext, registry: &Registry) -> Result<(), ()> {
    let modules: Vec<ModuleId> = ctx.modules().map(|(id, _)| id).collect();
    for module in &modules {
        normalizer::normalize_module(ctx, *module);
    }

    for pass in 1..=MAX_PASSES {
        let mut walker = Pass::new(&mut *ctx, registry, false);
        for module in &modules {
            walker.run_module(*module);
        }
        let (modified, unresolved) = (walker.modified, walker.unresolved);
        tracing::debug!(pass, modified, unresolved, "resolver pass done");

        if !modified {
            if unresolved == 0 {
                return if ctx.diagnostics.has_errors() { Err(()) } else { Ok(()) };
            }
            // No progress but nodes remain unresolved: report them.
            let mut reporter = Pass::new(&mut *ctx, registry, true);
            for module in &modules {
                reporter.run_module(*module);
            }
            return Err(());
        }
    }
    panic!("internal error: resolver did not converge within {MAX_PASSES} passes");
}

struct Pass<'a> {
    ctx: &'a mut AstContext,
    registry: &'a Registry,
    /// Emit diagnostics for unresolved nodes instead of waiting for the
    /// next pass.
    report: bool,
    modified: bool,
    unresolved: usize,
    scope: ScopeId,
    /// The enclosing unit type while walking unit items and hooks.
    self_type: Option<TypeId>,
    /// The `$$` type in the current hook or attribute expression.
    dd_type: Option<TypeId>,
}

impl<'a> Pass<'a> {
    fn new(ctx: &'a mut AstContext, registry: &'a Registry, report: bool) -> Self {
        let scope = ctx.root_scope();
        Self {
            ctx,
            registry,
            report,
            modified: false,
            unresolved: 0,
            scope,
            self_type: None,
            dd_type: None,
        }
    }

    fn error(&mut self, message: String, location: Location) {
        self.ctx.diagnostics.push(Diagnostic::error(message, location));
    }

    // ---------------------------------------------------------------
    // Module walk
    // ---------------------------------------------------------------

    fn run_module(&mut self, module: ModuleId) {
        self.scope = self.ctx.module(module).scope;
        let decls = self.ctx.module(module).decls.clone();
        for decl_id in decls {
            self.resolve_import(module, decl_id);
            self.walk_decl(decl_id);
        }
        let hooks = self.ctx.module(module).hooks.clone();
        for hook in hooks {
            self.bind_module_hook(hook);
            self.walk_hook(hook);
        }
    }

    fn resolve_import(&mut self, module: ModuleId, decl_id: crate::ast::node::DeclId) {
        let DeclKind::ImportedModule { module: target, search_scope } = &self.ctx.decl(decl_id).kind else {
            return;
        };
        if target.is_some() {
            return;
        }
        let id = self.ctx.decl(decl_id).id.clone();
        let scope_tag = search_scope.clone();
        match self.ctx.module_by_id(&id, scope_tag.as_deref()) {
            Some(found) => {
                if let DeclKind::ImportedModule { module: target, .. } = &mut self.ctx.decl_mut(decl_id).kind {
                    *target = Some(found);
                }
                if !self.ctx.module(module).dependencies.contains(&found) {
                    self.ctx.module_mut(module).dependencies.push(found);
                }
                self.modified = true;
            }
            None => {
                self.unresolved += 1;
                if self.report {
                    let location = self.ctx.decl(decl_id).location.clone();
                    self.error(format!("cannot import module '{id}'"), location);
                }
            }
        }
    }

    fn walk_decl(&mut self, decl_id: crate::ast::node::DeclId) {
        let kind = self.ctx.decl(decl_id).kind.clone();
        match kind {
            DeclKind::Constant { ty, value } => {
                if let Some(ty) = ty {
                    self.resolve_type_names(ty);
                }
                self.walk_expr(value);
            }
            DeclKind::GlobalVariable { ty, init } | DeclKind::LocalVariable { ty, init } => {
                if let Some(ty) = ty {
                    self.resolve_type_names(ty);
                }
                if let Some(init) = init {
                    self.walk_expr(init);
                }
            }
            DeclKind::Parameter { ty, default, .. } => {
                self.resolve_type_names(ty);
                if let Some(default) = default {
                    self.walk_expr(default);
                }
            }
            DeclKind::Function(f) => {
                self.resolve_type_names(f.result);
                let saved = self.scope;
                if let Some(scope) = self.ctx.decl(decl_id).scope {
                    self.scope = scope;
                }
                for param in &f.params {
                    self.walk_decl(*param);
                }
                if let Some(body) = f.body {
                    self.walk_stmt(body);
                }
                self.scope = saved;
            }
            DeclKind::Type { ty } => {
                self.resolve_type_names(ty);
                let resolved = self.ctx.resolve_type(ty);
                match self.ctx.ty(resolved).clone() {
                    Ty::Unit(_) => self.walk_unit(resolved),
                    Ty::Struct(st) => {
                        for field in st.fields {
                            self.walk_decl(field);
                        }
                    }
                    _ => {}
                }
            }
            DeclKind::Field { ty, default } => {
                self.resolve_type_names(ty);
                if let Some(default) = default {
                    self.walk_expr(default);
                }
            }
            DeclKind::ImportedModule { .. } | DeclKind::Property { .. } => {}
        }
    }

    /// Resolves `Ty::Name` references inside a type, recursively.
    fn resolve_type_names(&mut self, ty: TypeId) {
        let node = self.ctx.ty(ty).clone();
        match node {
            Ty::Name { id, resolved } => {
                if resolved.is_set() {
                    return;
                }
                let found = self.ctx.lookup_id(self.scope, &id);
                let mut target = None;
                for m in &found.matches {
                    let decl = self.ctx.lookup_declaration(m.index);
                    if let DeclKind::Type { ty: target_ty } = decl.kind {
                        target = Some(target_ty);
                        break;
                    }
                }
                match target {
                    Some(target_ty) => {
                        let index = self.ctx.register_type(target_ty);
                        if let Ty::Name { resolved, .. } = &mut self.ctx.type_node_mut(ty).ty {
                            *resolved = index;
                        }
                        self.modified = true;
                    }
                    None => {
                        self.unresolved += 1;
                        if self.report {
                            let location = self.ctx.type_node(ty).location.clone();
                            self.error(format!("unknown type '{id}'"), location);
                        }
                    }
                }
            }
            Ty::Optional(t)
            | Ty::Result(t)
            | Ty::Vector(t)
            | Ty::List(t)
            | Ty::Set(t)
            | Ty::StrongReference(t)
            | Ty::WeakReference(t)
            | Ty::ValueReference(t) => self.resolve_type_names(t),
            Ty::Map(k, v) => {
                self.resolve_type_names(k);
                self.resolve_type_names(v);
            }
            Ty::Tuple(elems) => {
                for e in elems {
                    self.resolve_type_names(e);
                }
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------
    // Units
    // ---------------------------------------------------------------

    fn walk_unit(&mut self, unit_ty: TypeId) {
        let (params, items) = match self.ctx.ty(unit_ty) {
            Ty::Unit(unit) => (unit.params.clone(), unit.items.clone()),
            _ => return,
        };

        // The unit's `self` parameter: registered once so the invariant
        // "self is a parameter declaration of the unit's type" holds.
        self.ensure_self_param(unit_ty);

        // Unit parameters resolve by plain name inside the unit.
        let saved_scope = self.scope;
        if !params.is_empty() {
            let scope = self.ctx.new_scope(Some(self.scope));
            for &param in &params {
                let id = self.ctx.decl(param).id.clone();
                let index = self.ctx.register_declaration(param);
                self.ctx.scope_mut(scope).insert(id, index);
            }
            self.scope = scope;
        }
        let saved_self = self.self_type.replace(unit_ty);

        for &param in &params {
            self.walk_decl(param);
        }
        self.walk_items(unit_ty, &items);

        self.self_type = saved_self;
        self.scope = saved_scope;
    }

    fn ensure_self_param(&mut self, unit_ty: TypeId) {
        let needs_self = match self.ctx.ty(unit_ty) {
            Ty::Unit(unit) => unit.self_decl.is_none(),
            _ => false,
        };
        if !needs_self {
            return;
        }
        let decl = self.ctx.new_decl(Declaration::new(
            "self",
            DeclKind::Parameter {
                ty: unit_ty,
                inout: true,
                default: None,
            },
            Linkage::Private,
            Location::none(),
        ));
        let index = self.ctx.register_declaration(decl);
        if let Ty::Unit(unit) = &mut self.ctx.type_node_mut(unit_ty).ty {
            unit.self_decl = index;
        }
        self.modified = true;
    }

    fn walk_items(&mut self, unit_ty: TypeId, items: &[ItemId]) {
        for &item in items {
            self.promote_unresolved_field(item);
            match self.ctx.item(item).clone() {
                UnitItem::Field(_) => {
                    self.derive_field_types(item);
                    self.walk_field_exprs(unit_ty, item);
                }
                UnitItem::Variable { ty, default, .. } => {
                    self.resolve_type_names(ty);
                    if let Some(default) = default {
                        self.walk_expr(default);
                    }
                }
                UnitItem::Property { value, .. } => {
                    if let Some(value) = value {
                        if !matches!(self.ctx.expr(value).kind, ExprKind::TypeExpr(_)) {
                            self.walk_expr(value);
                        }
                    }
                }
                UnitItem::UnitHook { hook, .. } => {
                    self.bind_inline_hook(unit_ty, hook, None);
                    self.walk_hook(hook);
                }
                UnitItem::Switch(sw) => {
                    if let Some(cond) = sw.cond {
                        self.walk_expr(cond);
                    }
                    if let Some(cond) = sw.condition {
                        self.walk_expr(cond);
                    }
                    for case in &sw.cases {
                        for &e in &case.exprs {
                            self.walk_expr(e);
                        }
                        self.walk_items(unit_ty, &case.items);
                    }
                }
                UnitItem::Sink { .. } | UnitItem::UnresolvedField { .. } => {}
            }
        }
    }

    /// Promotes an `UnresolvedField` once its referenced ID is known: a
    /// type reference becomes a type field, a constant becomes a ctor
    /// field.
    fn promote_unresolved_field(&mut self, item: ItemId) {
        let UnitItem::UnresolvedField {
            id,
            referenced,
            attributes,
            condition,
            sinks,
            hooks,
            repeat,
            is_container,
            is_skip,
            location,
        } = self.ctx.item(item).clone()
        else {
            return;
        };

        let found = self.ctx.lookup_id(self.scope, &referenced);
        if found.is_empty() {
            self.unresolved += 1;
            if self.report {
                self.error(format!("unknown ID '{referenced}'"), location);
            }
            return;
        }

        let mut original_ty = None;
        let mut ctor = None;
        for m in &found.matches {
            let decl = self.ctx.lookup_declaration(m.index);
            match &decl.kind {
                DeclKind::Type { ty } => {
                    original_ty = Some(*ty);
                    break;
                }
                DeclKind::Constant { .. } => {
                    let index = m.index;
                    let name = self.ctx.new_expr(Expr::new(
                        ExprKind::Name {
                            id: referenced.clone(),
                            resolved: index,
                        },
                        self.ctx.unknown_qtype(),
                        location.clone(),
                    ));
                    ctor = Some(name);
                    break;
                }
                _ => {}
            }
        }
        if original_ty.is_none() && ctor.is_none() {
            self.unresolved += 1;
            if self.report {
                self.error(
                    format!("'{referenced}' does not name a type or constant"),
                    location,
                );
            }
            return;
        }

        let is_transient = id.is_none() || is_skip;
        *self.ctx.item_mut(item) = UnitItem::Field(UnitField {
            id,
            original_ty,
            ctor,
            parse_ty: None,
            item_ty: None,
            dd_ty: None,
            repeat,
            is_container,
            is_skip,
            is_transient,
            attributes,
            condition,
            sinks,
            hooks,
            inner: None,
            location,
        });
        self.modified = true;
    }

    /// Derives `parse_ty`, `dd_ty`, and `item_ty` for a field.
    fn derive_field_types(&mut self, item: ItemId) {
        let Some(field) = self.ctx.item(item).as_field() else { return };
        let original_ty = field.original_ty;
        let ctor = field.ctor;
        let is_container = field.is_container;
        let convert = field.attributes.value_of(AttributeKind::Convert);
        let parse_known = field.parse_ty;
        let item_known = field.item_ty;

        if let Some(ty) = original_ty {
            self.resolve_type_names(ty);
        }

        // Parse type: how the bytes are read.
        let parse_ty = match (parse_known, original_ty, ctor) {
            (Some(ty), _, _) => Some(ty),
            (None, Some(ty), _) => Some(ty),
            (None, None, Some(ctor_expr)) => self.ctor_parse_type(ctor_expr),
            (None, None, None) => None,
        };
        let Some(parse_ty) = parse_ty else {
            self.unresolved += 1;
            return;
        };

        // The `$$` value a hook sees is the parsed value.
        let dd_ty = parse_ty;

        // Item type: the field's value after `&convert`.
        let item_ty = if let Some(convert) = convert {
            let saved_dd = self.dd_type.replace(dd_ty);
            self.walk_expr(convert);
            self.dd_type = saved_dd;
            let ty = self.ctx.expr(convert).ty.ty;
            if self.is_unknown(ty) {
                self.unresolved += 1;
                None
            } else {
                Some(ty)
            }
        } else {
            Some(parse_ty)
        };

        let mut changed = false;
        if parse_known.map_or(true, |t| !coercion::types_equal(self.ctx, t, parse_ty)) {
            let field = self.ctx.item_mut(item).as_field_mut().expect("checked above");
            field.parse_ty = Some(parse_ty);
            field.dd_ty = Some(dd_ty);
            changed = true;
        }

        // The item type only changes structurally, so the check compares
        // element types instead of arena IDs.
        if let Some(elem) = item_ty {
            let matches_existing = item_known.is_some_and(|existing| {
                if is_container {
                    match self.ctx.ty(self.ctx.resolve_type(existing)) {
                        Ty::Vector(e) => coercion::types_equal(self.ctx, *e, elem),
                        _ => false,
                    }
                } else {
                    coercion::types_equal(self.ctx, existing, elem)
                }
            });
            if !matches_existing {
                let stored = if is_container {
                    self.ctx.new_type(Ty::Vector(elem), Location::none())
                } else {
                    elem
                };
                let field = self.ctx.item_mut(item).as_field_mut().expect("checked above");
                field.item_ty = Some(stored);
                changed = true;
            }
        }
        if changed {
            self.modified = true;
        }
    }

    fn ctor_parse_type(&mut self, ctor_expr: ExprId) -> Option<TypeId> {
        match &self.ctx.expr(ctor_expr).kind {
            ExprKind::Ctor(Ctor::Bytes(_)) => Some(self.ctx.standard().bytes),
            // A regex field yields the matched bytes.
            ExprKind::Ctor(Ctor::RegExp(_)) => Some(self.ctx.standard().bytes),
            ExprKind::Ctor(Ctor::Unsigned { width, .. }) => self.ctx.standard().unsigned(*width),
            ExprKind::Ctor(Ctor::Signed { width, .. }) => self.ctx.standard().signed(*width),
            ExprKind::Ctor(Ctor::Bitfield { ty, .. }) => Some(*ty),
            ExprKind::UnresolvedOperator { op: OperatorKind::Cast, operands } => {
                match self.ctx.expr(operands[1]).kind {
                    ExprKind::TypeExpr(ty) => Some(ty),
                    _ => None,
                }
            }
            ExprKind::Name { resolved, .. } if resolved.is_set() => {
                let decl = self.ctx.lookup_declaration(*resolved);
                match decl.kind {
                    DeclKind::Constant { value, .. } => {
                        let ty = self.ctx.expr(value).ty.ty;
                        (!self.is_unknown(ty)).then_some(ty)
                    }
                    _ => None,
                }
            }
            _ => {
                let ty = self.ctx.expr(ctor_expr).ty.ty;
                (!self.is_unknown(ty)).then_some(ty)
            }
        }
    }

    fn walk_field_exprs(&mut self, unit_ty: TypeId, item: ItemId) {
        let Some(field) = self.ctx.item(item).as_field() else { return };
        let repeat = field.repeat;
        let condition = field.condition;
        let sinks = field.sinks.clone();
        let hooks = field.hooks.clone();
        let dd_ty = field.dd_ty;
        let ctor = field.ctor;
        let attrs: Vec<ExprId> = field
            .attributes
            .iter()
            .filter(|a| a.kind != AttributeKind::Convert)
            .filter_map(|a| a.value)
            .collect();

        if let Some(ctor) = ctor {
            self.walk_expr(ctor);
        }
        if let Some(repeat) = repeat {
            self.walk_expr(repeat);
        }
        if let Some(condition) = condition {
            self.walk_expr(condition);
        }
        let saved_dd = self.dd_type;
        self.dd_type = dd_ty;
        for attr in attrs {
            self.walk_expr(attr);
        }
        self.dd_type = saved_dd;
        for sink in sinks {
            self.walk_expr(sink);
        }
        for hook in hooks {
            self.bind_inline_hook(unit_ty, hook, Some(item));
            self.walk_hook(hook);
        }
    }

    // ---------------------------------------------------------------
    // Hooks
    // ---------------------------------------------------------------

    fn bind_inline_hook(&mut self, unit_ty: TypeId, hook: HookId, field: Option<ItemId>) {
        let index = self.ctx.register_type(unit_ty);
        let dd = field.and_then(|f| self.ctx.item(f).as_field().and_then(|f| f.dd_ty));
        let h = self.ctx.hook(hook);
        let bound = h.unit.is_set() && h.field == field;
        let dd_current = h.dd_type;
        if bound && (dd_current.is_some() || dd.is_none()) {
            return;
        }
        let h = self.ctx.hook_mut(hook);
        h.unit = index;
        h.field = field;
        if dd.is_some() {
            h.dd_type = dd;
        }
        self.modified = true;
    }

    /// Binds a module-level `on Unit::…` hook by path.
    fn bind_module_hook(&mut self, hook: HookId) {
        let h = self.ctx.hook(hook);
        if h.path.is_empty() {
            return;
        }
        if h.unit.is_set() {
            // Already bound; pick up a later-derived `$$` type.
            if h.dd_type.is_none() {
                if let Some(field) = h.field {
                    let dd = self.ctx.item(field).as_field().and_then(|f| f.dd_ty);
                    if dd.is_some() {
                        self.ctx.hook_mut(hook).dd_type = dd;
                        self.modified = true;
                    }
                }
            }
            return;
        }
        let path = h.path.clone();
        let location = h.location.clone();

        let found = self.ctx.lookup_id(self.scope, &path[0]);
        let Some(m) = found.matches.first() else {
            self.unresolved += 1;
            if self.report {
                self.error(format!("unknown unit '{}' in hook", path[0]), location);
            }
            return;
        };
        let decl = self.ctx.lookup_declaration(m.index);
        let DeclKind::Type { ty } = decl.kind else {
            self.error(format!("'{}' does not name a unit type", path[0]), location);
            return;
        };
        let unit_ty = self.ctx.resolve_type(ty);
        if !matches!(self.ctx.ty(unit_ty), Ty::Unit(_)) {
            self.error(format!("'{}' does not name a unit type", path[0]), location);
            return;
        }
        let index = self.ctx.register_type(unit_ty);

        // Second path component names a field.
        let mut field = None;
        if let Some(field_name) = path.get(1) {
            if let Ty::Unit(unit) = self.ctx.ty(unit_ty) {
                field = unit
                    .items
                    .iter()
                    .copied()
                    .find(|&i| match self.ctx.item(i) {
                        UnitItem::Field(f) => f.id.as_deref() == Some(field_name),
                        UnitItem::UnresolvedField { id, .. } => id.as_deref() == Some(field_name),
                        _ => false,
                    });
                if field.is_none() {
                    self.error(
                        format!("unit '{}' has no field '{field_name}'", path[0]),
                        location.clone(),
                    );
                    return;
                }
            }
        }

        let dd = field.and_then(|f| self.ctx.item(f).as_field().and_then(|f| f.dd_ty));
        let h = self.ctx.hook_mut(hook);
        h.unit = index;
        h.field = field;
        if dd.is_some() {
            h.dd_type = dd;
        }
        // A hook naming just the unit is an implicit %done.
        if h.field.is_none() && h.special.is_none() && path.len() == 1 {
            h.special = Some(SpecialHook::Done);
        }
        self.modified = true;
    }

    fn walk_hook(&mut self, hook: HookId) {
        let h = self.ctx.hook(hook);
        let body = h.body;
        let params = h.params.clone();
        let existing_scope = h.scope;
        let unit = h.unit;
        let dd = h.dd_type;
        let flavor = h.flavor;

        let scope = match existing_scope {
            Some(scope) => scope,
            None => {
                let scope = self.ctx.new_scope(Some(self.scope));
                for &param in &params {
                    let id = self.ctx.decl(param).id.clone();
                    let index = self.ctx.register_declaration(param);
                    self.ctx.scope_mut(scope).insert(id, index);
                }
                self.ctx.hook_mut(hook).scope = Some(scope);
                scope
            }
        };

        let saved_scope = self.scope;
        let saved_self = self.self_type;
        let saved_dd = self.dd_type;
        self.scope = scope;
        if unit.is_set() {
            self.self_type = Some(self.ctx.lookup_type_id(unit));
        }
        // Inside `foreach`, `$$` is the container element.
        self.dd_type = match (flavor, dd) {
            (HookFlavor::Foreach, Some(dd)) => {
                let resolved = self.ctx.resolve_type(dd);
                self.ctx.ty(resolved).element().or(Some(dd))
            }
            (_, dd) => dd,
        };

        for param in params {
            self.walk_decl(param);
        }
        self.walk_stmt(body);

        self.scope = saved_scope;
        self.self_type = saved_self;
        self.dd_type = saved_dd;
    }

    // ---------------------------------------------------------------
    // Statements and expressions
    // ---------------------------------------------------------------

    fn walk_stmt(&mut self, stmt: StmtId) {
        let kind = self.ctx.stmt(stmt).kind.clone();
        let stmt_scope = self.ctx.stmt(stmt).scope;
        let saved = self.scope;
        if let Some(scope) = stmt_scope {
            self.scope = scope;
        }
        match kind {
            crate::ast::stmt::StmtKind::Block(stmts) => {
                for s in stmts {
                    self.walk_stmt(s);
                }
            }
            crate::ast::stmt::StmtKind::Expression(e) => self.walk_expr(e),
            crate::ast::stmt::StmtKind::Declaration(d) => self.walk_decl(d),
            crate::ast::stmt::StmtKind::If { init, cond, then, alt } => {
                if let Some(init) = init {
                    self.walk_decl(init);
                }
                self.walk_expr(cond);
                self.walk_stmt(then);
                if let Some(alt) = alt {
                    self.walk_stmt(alt);
                }
            }
            crate::ast::stmt::StmtKind::While { cond, body } => {
                self.walk_expr(cond);
                self.walk_stmt(body);
            }
            crate::ast::stmt::StmtKind::For { var, sequence, body } => {
                self.walk_expr(sequence);
                // The loop variable takes the sequence's element type.
                let seq_ty = self.ctx.resolve_type(self.ctx.expr(sequence).ty.ty);
                let elem = self.ctx.ty(seq_ty).element().or_else(|| match self.ctx.ty(seq_ty) {
                    Ty::Bytes => Some(self.ctx.standard().uint8),
                    _ => None,
                });
                if let Some(elem) = elem {
                    if let DeclKind::LocalVariable { ty, .. } = &mut self.ctx.decl_mut(var).kind {
                        if ty.is_none() {
                            *ty = Some(elem);
                            self.modified = true;
                        }
                    }
                }
                self.walk_stmt(body);
            }
            crate::ast::stmt::StmtKind::Switch { cond, cases } => {
                self.walk_expr(cond);
                for case in cases {
                    for e in case.exprs {
                        self.walk_expr(e);
                    }
                    self.walk_stmt(case.body);
                }
            }
            crate::ast::stmt::StmtKind::Try { body, catches } => {
                self.walk_stmt(body);
                for catch in catches {
                    if let Some(param) = catch.param {
                        self.walk_decl(param);
                    }
                    self.walk_stmt(catch.body);
                }
            }
            crate::ast::stmt::StmtKind::Throw(value) | crate::ast::stmt::StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.walk_expr(value);
                }
            }
            crate::ast::stmt::StmtKind::Assert { cond, message } => {
                self.walk_expr(cond);
                if let Some(message) = message {
                    self.walk_expr(message);
                }
            }
            crate::ast::stmt::StmtKind::Break | crate::ast::stmt::StmtKind::Continue | crate::ast::stmt::StmtKind::Yield => {}
        }
        self.scope = saved;
    }

    fn walk_expr(&mut self, expr: ExprId) {
        let kind = self.ctx.expr(expr).kind.clone();
        match &kind {
            ExprKind::Ctor(ctor) => self.walk_ctor(ctor),
            ExprKind::UnresolvedOperator { operands, .. } | ExprKind::ResolvedOperator { operands, .. } => {
                for &op in operands {
                    self.walk_expr(op);
                }
            }
            ExprKind::ResolvedCall { args, .. } => {
                for &arg in args {
                    self.walk_expr(arg);
                }
            }
            ExprKind::Grouping(inner) | ExprKind::LogicalNot(inner) | ExprKind::Coerced(inner) => {
                self.walk_expr(*inner);
            }
            ExprKind::LogicalAnd(a, b) | ExprKind::LogicalOr(a, b) => {
                self.walk_expr(*a);
                self.walk_expr(*b);
            }
            ExprKind::Ternary { cond, then, alt } => {
                self.walk_expr(*cond);
                self.walk_expr(*then);
                self.walk_expr(*alt);
            }
            ExprKind::Assign { target, source } => {
                self.walk_expr(*target);
                self.walk_expr(*source);
            }
            ExprKind::ListComprehension { input, output, cond, .. } => {
                self.walk_expr(*input);
                self.walk_expr(*output);
                if let Some(cond) = cond {
                    self.walk_expr(*cond);
                }
            }
            ExprKind::Name { .. }
            | ExprKind::Member { .. }
            | ExprKind::TypeExpr(_)
            | ExprKind::Dollar
            | ExprKind::SelfRef => {}
        }
        self.resolve_expr(expr);
    }

    fn walk_ctor(&mut self, ctor: &Ctor) {
        match ctor {
            Ctor::Optional { value, .. } | Ctor::Result { value, .. } => {
                if let Some(value) = value {
                    self.walk_expr(*value);
                }
            }
            Ctor::Tuple(elems) | Ctor::List { elems, .. } | Ctor::Vector { elems, .. } | Ctor::Set { elems, .. } => {
                for &e in elems {
                    self.walk_expr(e);
                }
            }
            Ctor::Map { entries, .. } => {
                for &(k, v) in entries {
                    self.walk_expr(k);
                    self.walk_expr(v);
                }
            }
            Ctor::Struct { fields, .. } => {
                for &(_, e) in fields {
                    self.walk_expr(e);
                }
            }
            _ => {}
        }
    }

    fn is_unknown(&self, ty: TypeId) -> bool {
        matches!(self.ctx.ty(self.ctx.resolve_type(ty)), Ty::Unknown)
    }

    fn resolve_expr(&mut self, expr: ExprId) {
        let kind = self.ctx.expr(expr).kind.clone();
        match kind {
            ExprKind::Name { id, resolved } => self.resolve_name(expr, &id, resolved),
            ExprKind::SelfRef => {
                if self.is_unknown(self.ctx.expr(expr).ty.ty) {
                    if let Some(unit) = self.self_type {
                        self.ctx.expr_mut(expr).ty = QualifiedType::mutable_rhs(unit);
                        self.modified = true;
                    } else {
                        self.unresolved += 1;
                        if self.report {
                            let location = self.ctx.expr(expr).location.clone();
                            self.error("'self' used outside of a unit context".into(), location);
                        }
                    }
                }
            }
            ExprKind::Dollar => {
                if self.is_unknown(self.ctx.expr(expr).ty.ty) {
                    if let Some(dd) = self.dd_type {
                        self.ctx.expr_mut(expr).ty = QualifiedType::const_rhs(dd);
                        self.modified = true;
                    } else {
                        self.unresolved += 1;
                        if self.report {
                            let location = self.ctx.expr(expr).location.clone();
                            self.error("'$$' is not available here".into(), location);
                        }
                    }
                }
            }
            ExprKind::Grouping(inner) => {
                let inner_ty = self.ctx.expr(inner).ty;
                if self.is_unknown(self.ctx.expr(expr).ty.ty) && !self.is_unknown(inner_ty.ty) {
                    self.ctx.expr_mut(expr).ty = inner_ty;
                    self.modified = true;
                }
            }
            ExprKind::Ternary { then, alt, .. } => {
                let then_ty = self.ctx.expr(then).ty;
                let alt_ty = self.ctx.expr(alt).ty;
                if self.is_unknown(self.ctx.expr(expr).ty.ty)
                    && !self.is_unknown(then_ty.ty)
                    && coercion::types_equal(self.ctx, then_ty.ty, alt_ty.ty)
                {
                    self.ctx.expr_mut(expr).ty = then_ty.as_const();
                    self.modified = true;
                }
            }
            ExprKind::Assign { target, .. } => {
                let target_ty = self.ctx.expr(target).ty;
                if self.is_unknown(self.ctx.expr(expr).ty.ty) && !self.is_unknown(target_ty.ty) {
                    self.ctx.expr_mut(expr).ty = target_ty.as_mutable();
                    self.modified = true;
                }
            }
            ExprKind::Ctor(Ctor::Tuple(ref elems)) => {
                if self.is_unknown(self.ctx.expr(expr).ty.ty)
                    && elems.iter().all(|&e| !self.is_unknown(self.ctx.expr(e).ty.ty))
                {
                    let elem_tys: Vec<TypeId> = elems.iter().map(|&e| self.ctx.expr(e).ty.ty).collect();
                    let location = self.ctx.expr(expr).location.clone();
                    let ty = self.ctx.new_type(Ty::Tuple(elem_tys), location);
                    self.ctx.expr_mut(expr).ty = QualifiedType::const_rhs(ty);
                    self.modified = true;
                }
            }
            ExprKind::Ctor(Ctor::List { elem, ref elems }) => {
                if self.is_unknown(elem) {
                    if let Some(&first) = elems.first() {
                        let first_ty = self.ctx.expr(first).ty.ty;
                        if !self.is_unknown(first_ty) {
                            let location = self.ctx.expr(expr).location.clone();
                            let list_ty = self.ctx.new_type(Ty::List(first_ty), location);
                            if let ExprKind::Ctor(Ctor::List { elem, .. }) = &mut self.ctx.expr_mut(expr).kind {
                                *elem = first_ty;
                            }
                            self.ctx.expr_mut(expr).ty = QualifiedType::const_rhs(list_ty);
                            self.modified = true;
                        }
                    }
                }
            }
            ExprKind::UnresolvedOperator { op: OperatorKind::Call, ref operands } => {
                self.resolve_call(expr, operands.clone());
            }
            ExprKind::UnresolvedOperator { op, ref operands } => {
                self.resolve_operator(expr, op, operands.clone());
            }
            _ => {}
        }
    }

    fn resolve_name(&mut self, expr: ExprId, id: &str, resolved: DeclarationIndex) {
        if resolved.is_set() {
            // Refresh the type if the declaration's type became known.
            if self.is_unknown(self.ctx.expr(expr).ty.ty) {
                if let Some(qt) = self.decl_qtype(resolved) {
                    self.ctx.expr_mut(expr).ty = qt;
                    self.modified = true;
                }
            }
            return;
        }

        let found = self.ctx.lookup_id(self.scope, id);
        if found.is_empty() {
            // Inside a unit, a bare field/variable/sink name is shorthand
            // for `self.<name>`. Scoped declarations shadow fields.
            if let Some(unit_ty) = self.self_type {
                if self.unit_has_member(unit_ty, id) {
                    let location = self.ctx.expr(expr).location.clone();
                    let self_expr = self.ctx.new_expr(Expr::new(
                        ExprKind::SelfRef,
                        QualifiedType::mutable_rhs(unit_ty),
                        location.clone(),
                    ));
                    let member = self.ctx.new_expr(Expr::new(
                        ExprKind::Member { id: id.to_owned() },
                        self.ctx.unknown_qtype(),
                        location.clone(),
                    ));
                    let new = Expr::new(
                        ExprKind::UnresolvedOperator {
                            op: OperatorKind::Member,
                            operands: smallvec::smallvec![self_expr, member],
                        },
                        self.ctx.unknown_qtype(),
                        location,
                    );
                    self.ctx.replace_expr(expr, new);
                    self.modified = true;
                    return;
                }
            }
            self.unresolved += 1;
            if self.report {
                let location = self.ctx.expr(expr).location.clone();
                self.error(format!("unknown ID '{id}'"), location);
            }
            return;
        }
        if found.matches.len() > 1 {
            // Multiple declarations: legal only for function overloads,
            // which call resolution disambiguates through the callee. The
            // node stays unresolved until the enclosing call rewrites it
            // away.
            self.unresolved += 1;
            if self.report {
                let location = self.ctx.expr(expr).location.clone();
                self.error(format!("ID '{id}' is ambiguous here"), location);
            }
            return;
        }
        let index = found.matches[0].index;
        let qt = self.decl_qtype(index);
        let e = self.ctx.expr_mut(expr);
        if let ExprKind::Name { resolved, .. } = &mut e.kind {
            *resolved = index;
        }
        if let Some(qt) = qt {
            e.ty = qt;
        }
        self.modified = true;
    }

    fn unit_has_member(&self, unit_ty: TypeId, id: &str) -> bool {
        let Ty::Unit(unit) = self.ctx.ty(unit_ty) else { return false };
        unit.items.iter().any(|&i| match self.ctx.item(i) {
            UnitItem::Field(f) => f.id.as_deref() == Some(id),
            UnitItem::UnresolvedField { id: fid, .. } => fid.as_deref() == Some(id),
            UnitItem::Variable { id: vid, .. } => vid == id,
            UnitItem::Sink { id: sid, .. } => sid == id,
            _ => false,
        })
    }

    fn decl_qtype(&mut self, index: DeclarationIndex) -> Option<QualifiedType> {
        let decl = self.ctx.lookup_declaration(index);
        match &decl.kind {
            DeclKind::Constant { ty, value } => {
                let ty = ty.map_or_else(|| self.ctx.expr(*value).ty.ty, |t| t);
                (!self.is_unknown(ty)).then(|| QualifiedType::const_rhs(self.ctx.resolve_type(ty)))
            }
            DeclKind::GlobalVariable { ty, init } | DeclKind::LocalVariable { ty, init } => {
                let ty = ty.or_else(|| init.map(|i| self.ctx.expr(i).ty.ty))?;
                (!self.is_unknown(ty)).then(|| QualifiedType::mutable_rhs(self.ctx.resolve_type(ty)))
            }
            DeclKind::Parameter { ty, inout, .. } => {
                let ty = *ty;
                let constness = if *inout { Constness::Mutable } else { Constness::Const };
                (!self.is_unknown(ty)).then(|| QualifiedType {
                    ty: self.ctx.resolve_type(ty),
                    constness,
                    side: Side::Rhs,
                })
            }
            DeclKind::Field { ty, .. } => {
                let ty = *ty;
                (!self.is_unknown(ty)).then(|| QualifiedType::mutable_rhs(self.ctx.resolve_type(ty)))
            }
            DeclKind::Type { ty } => Some(QualifiedType::const_rhs(self.ctx.resolve_type(*ty))),
            DeclKind::Function(_) | DeclKind::ImportedModule { .. } | DeclKind::Property { .. } => None,
        }
    }

    // ---------------------------------------------------------------
    // Operator resolution
    // ---------------------------------------------------------------

    fn operand_types_known(&mut self, operands: &[ExprId]) -> bool {
        for &op in operands {
            let e = self.ctx.expr(op);
            let is_meta = matches!(e.kind, ExprKind::Member { .. } | ExprKind::TypeExpr(_));
            if !is_meta && self.is_unknown(e.ty.ty) {
                return false;
            }
        }
        true
    }

    fn resolve_operator(&mut self, expr: ExprId, kind: OperatorKind, operands: Operands) {
        if !self.operand_types_known(&operands) {
            self.unresolved += 1;
            if self.report {
                let location = self.ctx.expr(expr).location.clone();
                self.error(
                    format!("cannot resolve operator {kind}: operand types are unknown"),
                    location,
                );
            }
            return;
        }

        // Candidates; member calls pre-filter on the method name.
        let mut candidates: Vec<OperatorId> = self.registry.of_kind(kind).to_vec();
        if kind == OperatorKind::MemberCall && operands.len() >= 2 {
            if let ExprKind::Member { id } = &self.ctx.expr(operands[1]).kind {
                let id = id.clone();
                candidates.retain(|&c| {
                    self.registry
                        .op(c)
                        .method_name()
                        .map_or(true, |name| name == id)
                });
            }
        }

        let base_styles = [
            CoercionStyle::PREFER_ORIGINAL_TYPE | CoercionStyle::OPERAND_MATCHING | CoercionStyle::TRY_EXACT_MATCH,
            CoercionStyle::PREFER_ORIGINAL_TYPE
                | CoercionStyle::OPERAND_MATCHING
                | CoercionStyle::TRY_EXACT_MATCH
                | CoercionStyle::TRY_CONST_PROMOTION,
            CoercionStyle::PREFER_ORIGINAL_TYPE
                | CoercionStyle::OPERAND_MATCHING
                | CoercionStyle::TRY_EXACT_MATCH
                | CoercionStyle::TRY_CONST_PROMOTION
                | CoercionStyle::TRY_COERCION,
        ];

        let mut matched: Vec<(OperatorId, Vec<ExprId>)> = Vec::new();
        for mut style in base_styles {
            if kind == OperatorKind::Cast {
                style = style | CoercionStyle::DISALLOW_TYPE_CHANGES;
            }
            for &cand in &candidates {
                let sig = self.registry.op(cand).operands.clone();
                if sig.len() != operands.len() {
                    continue;
                }
                if let Some(ops) = coercion::coerce_operands(self.ctx, &operands, &sig, style) {
                    matched.push((cand, ops));
                    continue;
                }
                // Reference operands retry with an implicit deref.
                if style.contains(CoercionStyle::TRY_COERCION) {
                    if let Some(derefed) = self.deref_operands(&operands) {
                        if let Some(ops) = coercion::coerce_operands(self.ctx, &derefed, &sig, style) {
                            matched.push((cand, ops));
                            continue;
                        }
                    }
                }
                // Commutative kinds retry with swapped operands.
                if kind.is_commutative() && operands.len() == 2 {
                    let swapped = [operands[1], operands[0]];
                    if let Some(ops) = coercion::coerce_operands(self.ctx, &swapped, &sig, style) {
                        matched.push((cand, ops));
                    }
                }
            }
            if !matched.is_empty() {
                break;
            }
        }

        if matched.is_empty() {
            if kind == OperatorKind::Cast {
                self.resolve_cast_fallback(expr, &operands);
                return;
            }
            self.unresolved += 1;
            if self.report {
                let types: Vec<String> = operands
                    .iter()
                    .map(|&op| types::render(self.ctx, self.ctx.expr(op).ty.ty))
                    .collect();
                let location = self.ctx.expr(expr).location.clone();
                self.error(
                    format!("cannot resolve operator {kind} for operands ({})", types.join(", ")),
                    location,
                );
            }
            return;
        }

        // Dedupe (operand swap can rediscover the same candidate) and
        // break remaining ties by priority.
        matched.dedup_by_key(|(id, _)| *id);
        if matched.len() > 1 {
            let best = matched
                .iter()
                .map(|(id, _)| self.registry.op(*id).priority)
                .max()
                .expect("non-empty");
            matched.retain(|(id, _)| self.registry.op(*id).priority == best);
        }

        if matched.len() > 1 {
            let names: Vec<&str> = matched.iter().map(|(id, _)| self.registry.op(*id).name).collect();
            let location = self.ctx.expr(expr).location.clone();
            let mut diag = Diagnostic::error(format!("operator {kind} is ambiguous"), location);
            for name in names {
                diag = diag.with_context(format!("candidate: {name}"));
            }
            self.ctx.diagnostics.push(diag);
            return;
        }

        let (op, ops) = matched.remove(0);
        let result = self.registry.result_type(self.ctx, op, &ops);
        if self.is_unknown(result.ty) {
            match kind {
                OperatorKind::Member | OperatorKind::TryMember => {
                    let member = match &self.ctx.expr(ops[1]).kind {
                        ExprKind::Member { id } => id.clone(),
                        _ => String::new(),
                    };
                    let recv = types::render(self.ctx, self.ctx.expr(ops[0]).ty.ty);
                    let location = self.ctx.expr(expr).location.clone();
                    self.error(format!("type {recv} has no member '{member}'"), location);
                }
                _ => {
                    self.unresolved += 1;
                }
            }
            return;
        }

        let location = self.ctx.expr(expr).location.clone();
        let new = Expr::new(
            ExprKind::ResolvedOperator {
                op,
                operands: ops.into_iter().collect(),
            },
            result,
            location,
        );
        self.ctx.replace_expr(expr, new);
        self.modified = true;
    }

    /// Wraps reference-typed operands in a coercion to their dereferenced
    /// type; `None` when no operand is a reference.
    fn deref_operands(&mut self, operands: &[ExprId]) -> Option<Vec<ExprId>> {
        let mut any = false;
        let mut out = Vec::with_capacity(operands.len());
        for &op in operands {
            let ty = self.ctx.resolve_type(self.ctx.expr(op).ty.ty);
            if self.ctx.ty(ty).is_reference() {
                let inner = self.ctx.ty(ty).dereferenced().expect("reference derefs");
                let location = self.ctx.expr(op).location.clone();
                let wrapped = self.ctx.new_expr(Expr::new(
                    ExprKind::Coerced(op),
                    QualifiedType::mutable_rhs(inner),
                    location,
                ));
                out.push(wrapped);
                any = true;
            } else {
                out.push(op);
            }
        }
        any.then_some(out)
    }

    /// `cast<T>(e)` with no matching operator falls back to a plain
    /// coercion when one exists.
    fn resolve_cast_fallback(&mut self, expr: ExprId, operands: &[ExprId]) {
        let ExprKind::TypeExpr(target) = self.ctx.expr(operands[1]).kind else {
            self.unresolved += 1;
            return;
        };
        let style = CoercionStyle::try_all_for_matching() | CoercionStyle::CONTEXTUAL_CONVERSION;
        let result = coercion::coerce_expression(
            self.ctx,
            operands[0],
            QualifiedType::const_rhs(target),
            style,
        );
        if result.coerced {
            let inner = result.nexpr.unwrap_or(operands[0]);
            let location = self.ctx.expr(expr).location.clone();
            let new = Expr::new(ExprKind::Coerced(inner), QualifiedType::const_rhs(target), location);
            self.ctx.replace_expr(expr, new);
            self.modified = true;
        } else {
            self.unresolved += 1;
            if self.report {
                let from = types::render(self.ctx, self.ctx.expr(operands[0]).ty.ty);
                let to = types::render(self.ctx, target);
                let location = self.ctx.expr(expr).location.clone();
                self.error(format!("cannot cast {from} to {to}"), location);
            }
        }
    }

    // ---------------------------------------------------------------
    // Call resolution
    // ---------------------------------------------------------------

    fn resolve_call(&mut self, expr: ExprId, operands: Operands) {
        let callee = operands[0];
        let args_tuple = operands[1];
        let args: Vec<ExprId> = match self.ctx.expr(args_tuple).as_ctor() {
            Some(Ctor::Tuple(args)) => args.clone(),
            _ => return,
        };

        // Type-constructor calls: `uint8(x)`, `MyEnum(1)`.
        let callee_kind = self.ctx.expr(callee).kind.clone();
        if let ExprKind::TypeExpr(ty) = callee_kind {
            self.rewrite_type_ctor_call(expr, ty, &args);
            return;
        }

        let ExprKind::Name { id, .. } = callee_kind else {
            let location = self.ctx.expr(expr).location.clone();
            self.error("expression is not callable".into(), location);
            return;
        };

        let found = self.ctx.lookup_id(self.scope, &id);
        if found.is_empty() {
            self.unresolved += 1;
            if self.report {
                let location = self.ctx.expr(expr).location.clone();
                self.error(format!("unknown function '{id}'"), location);
            }
            return;
        }

        // A single type declaration is a constructor call.
        if found.matches.len() == 1 {
            let decl = self.ctx.lookup_declaration(found.matches[0].index);
            if let DeclKind::Type { ty } = decl.kind {
                self.rewrite_type_ctor_call(expr, ty, &args);
                return;
            }
        }

        let candidates: Vec<DeclarationIndex> = found
            .matches
            .iter()
            .map(|m| m.index)
            .filter(|&i| self.ctx.lookup_declaration(i).is_function())
            .collect();
        if candidates.is_empty() {
            let location = self.ctx.expr(expr).location.clone();
            self.error(format!("'{id}' is not a function"), location);
            return;
        }

        let styles = [
            CoercionStyle::TRY_EXACT_MATCH | CoercionStyle::OPERAND_MATCHING,
            CoercionStyle::TRY_EXACT_MATCH | CoercionStyle::OPERAND_MATCHING | CoercionStyle::TRY_CONST_PROMOTION,
            CoercionStyle::try_all_for_function_call(),
        ];
        let mut survivors: Vec<(DeclarationIndex, Vec<ExprId>)> = Vec::new();
        for style in styles {
            for &cand in &candidates {
                if let Some(coerced) = self.match_function(cand, &args, style) {
                    survivors.push((cand, coerced));
                }
            }
            if !survivors.is_empty() {
                break;
            }
        }

        match survivors.len() {
            0 => {
                self.unresolved += 1;
                if self.report {
                    let location = self.ctx.expr(expr).location.clone();
                    self.error(format!("no matching overload of '{id}' for this call"), location);
                }
            }
            1 => {
                let (function, args) = survivors.remove(0);
                self.finish_call(expr, function, args);
            }
            _ => {
                // Hooks legitimately have several bodies with identical
                // signatures; any one stands for the call target.
                if self.identical_signatures(&survivors) {
                    let (function, args) = survivors.remove(0);
                    self.finish_call(expr, function, args);
                } else {
                    let location = self.ctx.expr(expr).location.clone();
                    let mut diag = Diagnostic::error(format!("call to '{id}' is ambiguous"), location);
                    for (cand, _) in &survivors {
                        let decl = self.ctx.lookup_declaration(*cand);
                        diag = diag.with_context(format!("candidate at {}", decl.location));
                    }
                    self.ctx.diagnostics.push(diag);
                }
            }
        }
    }

    fn rewrite_type_ctor_call(&mut self, expr: ExprId, ty: TypeId, args: &[ExprId]) {
        if args.len() != 1 {
            let location = self.ctx.expr(expr).location.clone();
            self.error("type constructor takes exactly one argument".into(), location);
            return;
        }
        let location = self.ctx.expr(expr).location.clone();
        let type_expr = self.ctx.new_expr(Expr::new(
            ExprKind::TypeExpr(ty),
            QualifiedType::const_rhs(ty),
            location.clone(),
        ));
        let new = Expr::new(
            ExprKind::UnresolvedOperator {
                op: OperatorKind::Cast,
                operands: smallvec::smallvec![args[0], type_expr],
            },
            self.ctx.unknown_qtype(),
            location,
        );
        self.ctx.replace_expr(expr, new);
        self.modified = true;
    }

    fn match_function(
        &mut self,
        function: DeclarationIndex,
        args: &[ExprId],
        style: CoercionStyle,
    ) -> Option<Vec<ExprId>> {
        let DeclKind::Function(f) = self.ctx.lookup_declaration(function).kind.clone() else {
            return None;
        };
        let params = f.params;
        let required = params
            .iter()
            .filter(|&&p| match &self.ctx.decl(p).kind {
                DeclKind::Parameter { default, .. } => default.is_none(),
                _ => true,
            })
            .count();
        if args.len() < required || args.len() > params.len() {
            return None;
        }
        // The result type must be known before the call can type.
        if self.is_unknown(f.result) {
            return None;
        }

        let mut out = Vec::with_capacity(args.len());
        for (&arg, &param) in args.iter().zip(&params) {
            let DeclKind::Parameter { ty, .. } = self.ctx.decl(param).kind else {
                return None;
            };
            if self.is_unknown(ty) {
                return None;
            }
            let result = coercion::coerce_expression(self.ctx, arg, QualifiedType::const_rhs(ty), style);
            if !result.coerced {
                return None;
            }
            out.push(result.nexpr.unwrap_or(arg));
        }
        Some(out)
    }

    fn identical_signatures(&self, survivors: &[(DeclarationIndex, Vec<ExprId>)]) -> bool {
        let sig_of = |index: DeclarationIndex| -> Option<Vec<TypeId>> {
            match &self.ctx.lookup_declaration(index).kind {
                DeclKind::Function(f) => Some(
                    f.params
                        .iter()
                        .filter_map(|&p| match self.ctx.decl(p).kind {
                            DeclKind::Parameter { ty, .. } => Some(self.ctx.resolve_type(ty)),
                            _ => None,
                        })
                        .collect(),
                ),
                _ => None,
            }
        };
        let first_id = self.ctx.lookup_declaration(survivors[0].0).id.clone();
        let Some(first) = sig_of(survivors[0].0) else { return false };
        survivors.iter().all(|(cand, _)| {
            self.ctx.lookup_declaration(*cand).id == first_id && sig_of(*cand).as_ref() == Some(&first)
        })
    }

    fn finish_call(&mut self, expr: ExprId, function: DeclarationIndex, args: Vec<ExprId>) {
        let DeclKind::Function(f) = &self.ctx.lookup_declaration(function).kind else {
            return;
        };
        let result = self.ctx.resolve_type(f.result);
        let constness = f.result_constness;
        let location = self.ctx.expr(expr).location.clone();
        let new = Expr::new(
            ExprKind::ResolvedCall { function, args },
            QualifiedType {
                ty: result,
                constness,
                side: Side::Rhs,
            },
            location,
        );
        self.ctx.replace_expr(expr, new);
        self.modified = true;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::ast::context::Dialect;

    fn resolve_source(source: &str) -> Result<AstContext, AstContext> {
        let mut ctx = AstContext::new();
        crate::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl).expect("parse");
        let registry = Registry::build(&ctx);
        match resolve(&mut ctx, &registry) {
            Ok(()) => Ok(ctx),
            Err(()) => Err(ctx),
        }
    }

    fn emitted(ctx: &AstContext) -> Vec<String> {
        ctx.diagnostics.emitted().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn resolves_simple_arithmetic_constant() {
        let ctx = resolve_source("module M;\nconst X = 1 + 2;").unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Constant { value, .. } = ctx.decl(module.decls[0]).kind else { panic!() };
        assert!(matches!(ctx.expr(value).kind, ExprKind::ResolvedOperator { .. }));
    }

    #[test]
    fn resolves_unit_field_references() {
        let ctx = resolve_source("module M;\ntype X = unit { n: uint8; xs: uint16[n]; };")
            .unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        // The repeat expression `n` resolved to `self.n`.
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Type { ty } = ctx.decl(module.decls[0]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ctx.resolve_type(ty)) else { panic!() };
        let xs = ctx.item(unit.items[1]).as_field().expect("field");
        let repeat = xs.repeat.expect("repeat expr");
        assert!(matches!(ctx.expr(repeat).kind, ExprKind::ResolvedOperator { .. }));
    }

    #[test]
    fn unknown_name_reports_error() {
        let ctx = resolve_source("module M;\nconst X = nope + 1;").expect_err("should fail");
        let messages = emitted(&ctx);
        assert!(messages.iter().any(|m| m.contains("unknown ID 'nope'")), "{messages:?}");
    }

    #[test]
    fn unresolved_field_promotes_to_unit_type() {
        let ctx = resolve_source("module M;\ntype Inner = unit { x: uint8; };\ntype Outer = unit { i: Inner; };")
            .unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Type { ty } = ctx.decl(module.decls[1]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ctx.resolve_type(ty)) else { panic!() };
        let field = ctx.item(unit.items[0]).as_field().expect("promoted field");
        let parse_ty = field.parse_ty.expect("parse type derived");
        assert!(matches!(ctx.ty(ctx.resolve_type(parse_ty)), Ty::Unit(_)));
    }

    #[test]
    fn convert_attribute_sets_item_type() {
        let ctx = resolve_source("module M;\ntype X = unit { n: bytes &size=2 &convert=$$.to_uint(10); };")
            .unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Type { ty } = ctx.decl(module.decls[0]).kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(ctx.resolve_type(ty)) else { panic!() };
        let field = ctx.item(unit.items[0]).as_field().expect("field");
        let item_ty = field.item_ty.expect("item type");
        assert!(matches!(ctx.ty(ctx.resolve_type(item_ty)), Ty::UnsignedInteger(64)));
        // The parse type stays bytes.
        assert!(matches!(
            ctx.ty(ctx.resolve_type(field.parse_ty.unwrap())),
            Ty::Bytes
        ));
    }

    #[test]
    fn method_call_on_bytes_resolves() {
        let ctx = resolve_source("module M;\nconst X = b\"ff\".to_uint(16);")
            .unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Constant { value, .. } = ctx.decl(module.decls[0]).kind else { panic!() };
        let expr = ctx.expr(value);
        assert!(matches!(expr.kind, ExprKind::ResolvedOperator { .. }));
        assert!(matches!(ctx.ty(ctx.resolve_type(expr.ty.ty)), Ty::UnsignedInteger(64)));
    }

    #[test]
    fn function_call_resolution_picks_matching_overload() {
        let ctx = resolve_source(
            "module M;\nfunction f(a: uint64) : uint64 { return a; }\nfunction f(a: bytes) : bytes { return a; }\nconst X = f(7);",
        )
        .unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Constant { value, .. } = ctx.decl(module.decls[2]).kind else { panic!() };
        let ExprKind::ResolvedCall { function, .. } = &ctx.expr(value).kind else { panic!("not resolved") };
        let decl = ctx.lookup_declaration(*function);
        let DeclKind::Function(f) = &decl.kind else { panic!() };
        let DeclKind::Parameter { ty, .. } = ctx.decl(f.params[0]).kind else { panic!() };
        assert!(matches!(ctx.ty(ctx.resolve_type(ty)), Ty::UnsignedInteger(64)));
    }

    #[test]
    fn type_constructor_call_becomes_cast() {
        let ctx = resolve_source("module M;\nconst X = uint8(16);").unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Constant { value, .. } = ctx.decl(module.decls[0]).kind else { panic!() };
        let expr = ctx.expr(value);
        assert!(matches!(ctx.ty(ctx.resolve_type(expr.ty.ty)), Ty::UnsignedInteger(8)));
    }

    #[test]
    fn hook_binds_to_unit_with_implicit_done() {
        let ctx = resolve_source("module M;\ntype X = unit { x: uint8; };\non X { }")
            .unwrap_or_else(|c| panic!("{:?}", emitted(&c)));
        let (_, module) = ctx.modules().next().expect("module");
        let hook = ctx.hook(module.hooks[0]);
        assert!(hook.unit.is_set());
        assert_eq!(hook.special, Some(SpecialHook::Done));
    }

    #[test]
    fn resolution_terminates_on_unresolvable_input() {
        let ctx = resolve_source("module M;\ntype X = unit { i: Missing; };").expect_err("should fail");
        assert!(emitted(&ctx).iter().any(|m| m.contains("Missing")));
    }
}
