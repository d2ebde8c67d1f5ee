//! Post-resolution validation.
//!
//! Walks the resolved AST and reports user-facing errors; nothing is
//! rewritten here. Covers redeclarations, declaration and ctor rules,
//! expression and statement placement rules, type well-formedness, unit
//! attribute compatibility, and the operator gating tied to unit
//! properties (`%filter`, `%random-access`).

use crate::{
    ast::{
        context::AstContext,
        decl::{DeclKind, Declaration},
        expr::{Ctor, Expr, ExprKind},
        node::{DeclId, ExprId, ItemId, Location, ModuleId, StmtId, TypeId},
        scope::ScopeEntry,
        stmt::StmtKind,
        types::{self, Ty},
        unit::{AttributeKind, UnitField, UnitItem},
    },
    coercion,
    folder::{self, FoldStyle},
    operators::{OperatorKind, Registry},
};

/// Validates the whole program, attaching diagnostics to the context.
pub fn validate(ctx: &mut AstContext, registry: &Registry) {
    let modules: Vec<ModuleId> = ctx.modules().map(|(id, _)| id).collect();
    let mut v = Validator {
        ctx,
        registry,
        loop_depth: 0,
        catch_depth: 0,
        function_result: None,
    };
    for module in modules {
        v.check_module(module);
    }
    v.check_redeclarations();
}

struct Validator<'a> {
    ctx: &'a mut AstContext,
    registry: &'a Registry,
    loop_depth: usize,
    catch_depth: usize,
    /// The enclosing function's result type, when inside a body.
    function_result: Option<TypeId>,
}

impl Validator<'_> {
    fn error(&mut self, message: impl Into<String>, location: Location) {
        self.ctx.diagnostics.error(message, location);
    }

    // ---------------------------------------------------------------
    // Redeclaration
    // ---------------------------------------------------------------

    /// Within a scope an ID may repeat only for function declarations and
    /// for imports that refer back to an already-declared module of the
    /// same name.
    fn check_redeclarations(&mut self) {
        let modules: Vec<ModuleId> = self.ctx.modules().map(|(id, _)| id).collect();
        for module in modules {
            let scope = self.ctx.module(module).scope;
            let ids: Vec<String> = self.ctx.scope(scope).ids().map(str::to_owned).collect();
            for id in ids {
                let entries: Vec<ScopeEntry> = self
                    .ctx
                    .scope(scope)
                    .entries_for(&id)
                    .map(<[ScopeEntry]>::to_vec)
                    .unwrap_or_default();
                if entries.len() < 2 {
                    continue;
                }
                let mut all_functions = true;
                let mut location = Location::none();
                for entry in &entries {
                    let ScopeEntry::Declaration { index, .. } = entry else { continue };
                    let decl = self.ctx.lookup_declaration(*index);
                    location = decl.location.clone();
                    match &decl.kind {
                        DeclKind::Function(_) => {}
                        DeclKind::ImportedModule { .. } => {}
                        _ => all_functions = false,
                    }
                }
                if !all_functions {
                    self.error(format!("redeclaration of '{id}'"), location);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Modules and declarations
    // ---------------------------------------------------------------

    fn check_module(&mut self, module: ModuleId) {
        let decls = self.ctx.module(module).decls.clone();
        for decl in decls {
            self.check_decl(decl);
        }
        let hooks = self.ctx.module(module).hooks.clone();
        for hook in hooks {
            let body = self.ctx.hook(hook).body;
            self.check_stmt(body);
        }
    }

    fn check_decl(&mut self, decl_id: DeclId) {
        let decl = self.ctx.decl(decl_id).clone();
        match &decl.kind {
            DeclKind::Constant { value, .. } => self.check_expr(*value),
            DeclKind::GlobalVariable { ty, init } | DeclKind::LocalVariable { ty, init } => {
                if let Some(ty) = ty {
                    self.check_allocable(*ty, &decl);
                }
                if let Some(init) = init {
                    self.check_expr(*init);
                }
            }
            DeclKind::Parameter { ty, default, .. } => {
                // Wildcard (`any`) parameters are checked at the function
                // level, where &cxxname is visible.
                let resolved = self.ctx.resolve_type(*ty);
                if !matches!(self.ctx.ty(resolved), Ty::Any) {
                    self.check_allocable(*ty, &decl);
                }
                if let Some(default) = default {
                    self.check_expr(*default);
                }
            }
            DeclKind::Function(f) => {
                let wildcard_ok = decl.attributes.has(AttributeKind::Cxxname);
                for &param in &f.params {
                    let param_decl = self.ctx.decl(param).clone();
                    if let DeclKind::Parameter { ty, .. } = &param_decl.kind {
                        let resolved = self.ctx.resolve_type(*ty);
                        if matches!(self.ctx.ty(resolved), Ty::Any) && !wildcard_ok {
                            self.error(
                                "wildcard parameter type is only allowed on externally-declared functions",
                                param_decl.location.clone(),
                            );
                        }
                    }
                    self.check_decl(param);
                }
                if let Some(body) = f.body {
                    let saved = self.function_result.replace(f.result);
                    self.check_stmt(body);
                    self.function_result = saved;
                }
            }
            DeclKind::Type { ty } => self.check_type_decl(*ty),
            DeclKind::Field { ty, default } => {
                self.check_allocable(*ty, &decl);
                if let Some(default) = default {
                    self.check_expr(*default);
                }
            }
            DeclKind::ImportedModule { .. } | DeclKind::Property { .. } => {}
        }
    }

    fn check_allocable(&mut self, ty: TypeId, decl: &Declaration) {
        let resolved = self.ctx.resolve_type(ty);
        if !self.ctx.ty(resolved).is_allocable() {
            self.error(
                format!(
                    "{} '{}' must have an allocable type, not {}",
                    decl.kind.kind_name(),
                    decl.id,
                    types::render(self.ctx, resolved)
                ),
                decl.location.clone(),
            );
        }
    }

    // ---------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------

    fn check_type_decl(&mut self, ty: TypeId) {
        let resolved = self.ctx.resolve_type(ty);
        let location = self.ctx.type_node(resolved).location.clone();
        match self.ctx.ty(resolved).clone() {
            Ty::Unit(unit) => {
                self.check_unit_items(resolved, &unit.items);
            }
            Ty::Struct(st) => {
                for field in st.fields {
                    self.check_decl(field);
                }
            }
            Ty::Bitfield(bf) => {
                if !types::INTEGER_WIDTHS.contains(&bf.width) {
                    self.error(format!("bitfield width {} is not one of 8/16/32/64", bf.width), location.clone());
                }
                for bit in &bf.bits {
                    if bit.upper >= bf.width || bit.lower > bit.upper {
                        self.error(
                            format!("bit range '{}' exceeds bitfield width {}", bit.id, bf.width),
                            location.clone(),
                        );
                    }
                }
            }
            Ty::Optional(inner) | Ty::Result(inner) | Ty::StrongReference(inner) | Ty::WeakReference(inner)
            | Ty::ValueReference(inner) => {
                let inner = self.ctx.resolve_type(inner);
                if !self.ctx.ty(inner).is_allocable() {
                    self.error(
                        format!("element type {} is not allocable", types::render(self.ctx, inner)),
                        location,
                    );
                }
            }
            Ty::Tuple(elems) => {
                for elem in elems {
                    let elem = self.ctx.resolve_type(elem);
                    if !self.ctx.ty(elem).is_allocable() {
                        self.error(
                            format!("tuple element type {} is not allocable", types::render(self.ctx, elem)),
                            location.clone(),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------
    // Unit items
    // ---------------------------------------------------------------

    fn check_unit_items(&mut self, unit_ty: TypeId, items: &[ItemId]) {
        for &item in items {
            match self.ctx.item(item).clone() {
                UnitItem::Field(field) => self.check_field(unit_ty, &field),
                UnitItem::Variable { ty, default, location, .. } => {
                    let resolved = self.ctx.resolve_type(ty);
                    if !self.ctx.ty(resolved).is_allocable() {
                        self.error(
                            format!("unit variable type {} is not allocable", types::render(self.ctx, resolved)),
                            location,
                        );
                    }
                    if let Some(default) = default {
                        self.check_expr(default);
                    }
                }
                UnitItem::Property { kind, value, location } => {
                    self.check_property(kind, value, location);
                }
                UnitItem::UnitHook { hook, .. } => {
                    let body = self.ctx.hook(hook).body;
                    self.check_stmt(body);
                }
                UnitItem::Switch(sw) => {
                    self.check_unit_switch(unit_ty, &sw);
                }
                UnitItem::Sink { .. } => {}
                UnitItem::UnresolvedField { location, .. } => {
                    self.error("field never resolved", location);
                }
            }
        }
    }

    fn check_property(
        &mut self,
        kind: crate::ast::unit::PropertyKind,
        value: Option<ExprId>,
        location: Location,
    ) {
        use crate::ast::unit::PropertyKind as P;
        match kind {
            P::MimeType => {
                let Some(value) = value else {
                    self.error("%mime-type requires a value", location);
                    return;
                };
                if let Ok(Some(Ctor::String(s))) = folder::fold(self.ctx, self.registry, value, FoldStyle::full()) {
                    if crate::runtime::registry::MimeType::parse(&s).is_err() {
                        self.error(format!("invalid MIME type {s:?} (expected main/sub)"), location);
                    }
                }
            }
            P::Port => {
                if value.is_none() {
                    self.error("%port requires a value", location);
                }
            }
            P::Context | P::ByteOrder | P::BitOrder | P::Description | P::SyncAdvanceBlockSize => {}
            P::RandomAccess | P::Filter => {
                if value.is_some() {
                    self.error(format!("{kind} does not take a value"), location);
                }
            }
        }
    }

    fn check_field(&mut self, unit_ty: TypeId, field: &UnitField) {
        let location = field.location.clone();
        let attrs = &field.attributes;
        let parse_ty = field.parse_ty.map(|t| self.ctx.resolve_type(t));

        // Attribute applicability by parse type.
        if let Some(parse_ty) = parse_ty {
            match self.ctx.ty(parse_ty).clone() {
                Ty::Bytes if field.ctor.is_none() => {
                    let terminated = attrs.has(AttributeKind::Size)
                        || attrs.has(AttributeKind::Eod)
                        || attrs.has(AttributeKind::Until)
                        || attrs.has(AttributeKind::UntilIncluding)
                        || attrs.has(AttributeKind::ParseFrom)
                        || attrs.has(AttributeKind::ParseAt);
                    if !terminated {
                        self.error(
                            "bytes field requires one of &size, &eod, &until, &parse-from, or &parse-at",
                            location.clone(),
                        );
                    }
                    if attrs.has(AttributeKind::Chunked)
                        && !(attrs.has(AttributeKind::Size) || attrs.has(AttributeKind::Eod))
                    {
                        self.error("&chunked requires &size or &eod", location.clone());
                    }
                }
                Ty::Address => {
                    let v4 = attrs.has(AttributeKind::IPv4);
                    let v6 = attrs.has(AttributeKind::IPv6);
                    if v4 == v6 {
                        self.error("address field requires exactly one of &ipv4 or &ipv6", location.clone());
                    }
                }
                Ty::Real => {
                    if !attrs.has(AttributeKind::Type) {
                        self.error("real field requires a &type attribute", location.clone());
                    }
                }
                Ty::Void => {
                    if !attrs.is_empty() {
                        self.error("void fields cannot carry attributes", location.clone());
                    }
                }
                _ => {}
            }
        }

        if attrs.has(AttributeKind::Count) && !field.is_container {
            self.error("&count only applies to container fields", location.clone());
        }
        if attrs.has(AttributeKind::Chunked) && parse_ty.map_or(true, |t| !matches!(self.ctx.ty(t), Ty::Bytes)) {
            self.error("&chunked only applies to bytes fields", location.clone());
        }
        for kind in [AttributeKind::IPv4, AttributeKind::IPv6] {
            if attrs.has(kind) && parse_ty.map_or(false, |t| !matches!(self.ctx.ty(t), Ty::Address)) {
                self.error(format!("{kind} only applies to address fields"), location.clone());
            }
        }

        if let Some(repeat) = field.repeat {
            self.check_expr(repeat);
        }
        if let Some(condition) = field.condition {
            self.check_expr(condition);
        }
        for attr in attrs.iter() {
            if let Some(value) = attr.value {
                self.check_expr(value);
            }
        }
        for &sink in &field.sinks {
            self.check_sink_target(unit_ty, sink);
        }
        for &hook in &field.hooks {
            let body = self.ctx.hook(hook).body;
            self.check_stmt(body);
        }
    }

    /// `-> target` forwarding requires a sink-typed target.
    fn check_sink_target(&mut self, _unit_ty: TypeId, sink: ExprId) {
        self.check_expr(sink);
        let ty = self.ctx.resolve_type(self.ctx.expr(sink).ty.ty);
        if !matches!(self.ctx.ty(ty), Ty::Sink | Ty::Unknown) {
            let location = self.ctx.expr(sink).location.clone();
            self.error(
                format!("field data can only be forwarded to a sink, not {}", types::render(self.ctx, ty)),
                location,
            );
        }
    }

    fn check_unit_switch(&mut self, unit_ty: TypeId, sw: &crate::ast::unit::UnitSwitch) {
        if sw.cases.is_empty() {
            self.error("switch must have at least one case", sw.location.clone());
            return;
        }
        let defaults = sw.cases.iter().filter(|c| c.exprs.is_empty()).count();
        if defaults > 1 {
            self.error("switch can have at most one default case", sw.location.clone());
        }

        // Case expressions must be distinct; compare folded constants.
        let mut seen: Vec<Ctor> = Vec::new();
        for case in &sw.cases {
            for &e in &case.exprs {
                self.check_expr(e);
                if let Ok(Some(ctor)) = folder::fold(self.ctx, self.registry, e, FoldStyle::full()) {
                    if seen.iter().any(|s| s == &ctor) {
                        let location = self.ctx.expr(e).location.clone();
                        self.error("duplicate switch case", location);
                    } else {
                        seen.push(ctor);
                    }
                }
            }
            self.check_unit_items(unit_ty, &case.items);
        }
        if let Some(cond) = sw.cond {
            self.check_expr(cond);
        }
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn check_stmt(&mut self, stmt: StmtId) {
        let kind = self.ctx.stmt(stmt).kind.clone();
        let location = self.ctx.stmt(stmt).location.clone();
        match kind {
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.check_stmt(s);
                }
            }
            StmtKind::Expression(e) => self.check_expr(e),
            StmtKind::Declaration(d) => self.check_decl(d),
            StmtKind::If { init, cond, then, alt } => {
                if let Some(init) = init {
                    self.check_decl(init);
                }
                self.check_expr(cond);
                self.check_stmt(then);
                if let Some(alt) = alt {
                    self.check_stmt(alt);
                }
            }
            StmtKind::While { cond, body } => {
                self.check_expr(cond);
                self.loop_depth += 1;
                self.check_stmt(body);
                self.loop_depth -= 1;
            }
            StmtKind::For { sequence, body, .. } => {
                self.check_expr(sequence);
                let seq_ty = self.ctx.resolve_type(self.ctx.expr(sequence).ty.ty);
                let iterable = matches!(
                    self.ctx.ty(seq_ty),
                    Ty::Vector(_) | Ty::List(_) | Ty::Set(_) | Ty::Map(_, _) | Ty::Bytes | Ty::Stream | Ty::StreamView
                );
                if !iterable {
                    self.error(
                        format!("cannot iterate over {}", types::render(self.ctx, seq_ty)),
                        location,
                    );
                }
                self.loop_depth += 1;
                self.check_stmt(body);
                self.loop_depth -= 1;
            }
            StmtKind::Switch { cond, cases } => {
                self.check_expr(cond);
                let defaults = cases.iter().filter(|c| c.exprs.is_empty()).count();
                if defaults > 1 {
                    self.error("switch can have at most one default case", location);
                }
                for case in cases {
                    for e in case.exprs {
                        self.check_expr(e);
                    }
                    self.check_stmt(case.body);
                }
            }
            StmtKind::Try { body, catches } => {
                if catches.is_empty() {
                    self.error("try requires at least one catch", location.clone());
                }
                let defaults = catches.iter().filter(|c| c.param.is_none()).count();
                if defaults > 1 {
                    self.error("try can have at most one default catch", location);
                }
                self.check_stmt(body);
                for catch in catches {
                    self.catch_depth += 1;
                    self.check_stmt(catch.body);
                    self.catch_depth -= 1;
                }
            }
            StmtKind::Throw(value) => {
                match value {
                    Some(value) => {
                        self.check_expr(value);
                        let ty = self.ctx.resolve_type(self.ctx.expr(value).ty.ty);
                        if !matches!(self.ctx.ty(ty), Ty::Error | Ty::Unknown) {
                            self.error(
                                format!("throw requires an error value, not {}", types::render(self.ctx, ty)),
                                location,
                            );
                        }
                    }
                    None => {
                        if self.catch_depth == 0 {
                            self.error("throw without a value is only allowed inside a catch", location);
                        }
                    }
                }
            }
            StmtKind::Return(value) => {
                let Some(result) = self.function_result else {
                    self.error("return outside of a function", location);
                    return;
                };
                let result = self.ctx.resolve_type(result);
                let is_void = matches!(self.ctx.ty(result), Ty::Void);
                match value {
                    Some(value) => {
                        self.check_expr(value);
                        if is_void {
                            self.error("void function cannot return a value", location);
                        }
                    }
                    None => {
                        if !is_void {
                            self.error("non-void function must return a value", location);
                        }
                    }
                }
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error("break outside of a loop", location);
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error("continue outside of a loop", location);
                }
            }
            StmtKind::Assert { cond, message } => {
                self.check_expr(cond);
                if let Some(message) = message {
                    self.check_expr(message);
                }
            }
            StmtKind::Yield => {}
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn check_expr(&mut self, expr: ExprId) {
        let e = self.ctx.expr(expr).clone();
        match &e.kind {
            ExprKind::Ctor(ctor) => self.check_ctor(ctor, &e),
            ExprKind::Assign { target, source } => {
                self.check_expr(*target);
                self.check_expr(*source);
                self.check_assignable(*target);
            }
            ExprKind::Ternary { cond, then, alt } => {
                self.check_expr(*cond);
                self.check_expr(*then);
                self.check_expr(*alt);
                let then_ty = self.ctx.expr(*then).ty.ty;
                let alt_ty = self.ctx.expr(*alt).ty.ty;
                if !coercion::types_equal(self.ctx, then_ty, alt_ty) {
                    self.error(
                        format!(
                            "ternary arms have incompatible types {} and {}",
                            types::render(self.ctx, then_ty),
                            types::render(self.ctx, alt_ty)
                        ),
                        e.location.clone(),
                    );
                }
            }
            ExprKind::ListComprehension { input, output, cond, .. } => {
                self.check_expr(*input);
                self.check_expr(*output);
                if let Some(cond) = cond {
                    self.check_expr(*cond);
                }
                let input_ty = self.ctx.resolve_type(self.ctx.expr(*input).ty.ty);
                let iterable = matches!(
                    self.ctx.ty(input_ty),
                    Ty::Vector(_) | Ty::List(_) | Ty::Set(_) | Ty::Map(_, _) | Ty::Bytes
                );
                if !iterable {
                    self.error(
                        format!("list comprehension input {} is not iterable", types::render(self.ctx, input_ty)),
                        e.location.clone(),
                    );
                }
            }
            ExprKind::ResolvedOperator { op, operands } => {
                for &operand in operands {
                    self.check_expr(operand);
                }
                self.check_operator_gating(*op, operands);
            }
            ExprKind::ResolvedCall { args, .. } => {
                for &arg in args {
                    self.check_expr(arg);
                }
            }
            ExprKind::UnresolvedOperator { operands, .. } => {
                for &operand in operands {
                    self.check_expr(operand);
                }
            }
            ExprKind::Grouping(inner) | ExprKind::LogicalNot(inner) | ExprKind::Coerced(inner) => {
                self.check_expr(*inner);
            }
            ExprKind::LogicalAnd(a, b) | ExprKind::LogicalOr(a, b) => {
                self.check_expr(*a);
                self.check_expr(*b);
            }
            _ => {}
        }
    }

    fn check_ctor(&mut self, ctor: &Ctor, e: &Expr) {
        match ctor {
            Ctor::Unsigned { value, width } => {
                let max = match *width {
                    8 => u64::from(u8::MAX),
                    16 => u64::from(u16::MAX),
                    32 => u64::from(u32::MAX),
                    _ => u64::MAX,
                };
                if *value > max {
                    self.error(
                        format!("integer {value} outside range of uint{width}"),
                        e.location.clone(),
                    );
                }
            }
            Ctor::Signed { value, width } => {
                let (lo, hi) = match *width {
                    8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
                    16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
                    32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
                    _ => (i64::MIN, i64::MAX),
                };
                if *value < lo || *value > hi {
                    self.error(
                        format!("integer {value} outside range of int{width}"),
                        e.location.clone(),
                    );
                }
            }
            Ctor::List { elem, elems } | Ctor::Vector { elem, elems } | Ctor::Set { elem, elems } => {
                if !elems.is_empty() && matches!(self.ctx.ty(self.ctx.resolve_type(*elem)), Ty::Unknown) {
                    self.error("container literal needs a known element type", e.location.clone());
                }
                for &elem in elems {
                    self.check_expr(elem);
                }
            }
            Ctor::Tuple(elems) => {
                for &elem in elems {
                    self.check_expr(elem);
                }
            }
            Ctor::Map { entries, .. } => {
                for &(k, v) in entries {
                    self.check_expr(k);
                    self.check_expr(v);
                }
            }
            Ctor::Optional { value, .. } | Ctor::Result { value, .. } => {
                if let Some(value) = value {
                    self.check_expr(*value);
                }
            }
            Ctor::Struct { fields, .. } => {
                for &(_, v) in fields {
                    self.check_expr(v);
                }
            }
            _ => {}
        }
    }

    /// The target of an assignment must be a name, a member access, or an
    /// index access.
    fn check_assignable(&mut self, target: ExprId) {
        let e = self.ctx.expr(target);
        let ok = match &e.kind {
            ExprKind::Name { .. } | ExprKind::SelfRef => true,
            ExprKind::ResolvedOperator { op, .. } => matches!(
                self.registry.op(*op).kind,
                OperatorKind::Member | OperatorKind::TryMember | OperatorKind::Index | OperatorKind::Deref
            ),
            ExprKind::UnresolvedOperator { op, .. } => matches!(
                op,
                OperatorKind::Member | OperatorKind::TryMember | OperatorKind::Index | OperatorKind::Deref
            ),
            _ => false,
        };
        if !ok {
            let location = e.location.clone();
            self.error("expression cannot be assigned to", location);
        }
    }

    /// Operators gated on unit properties: random access, filters, sinks.
    fn check_operator_gating(&mut self, op: crate::operators::OperatorId, operands: &[ExprId]) {
        let def = self.registry.op(op);
        if def.kind != OperatorKind::MemberCall {
            return;
        }
        let Some(method) = def.method_name() else { return };
        let recv_ty = self.ctx.resolve_type(self.ctx.expr(operands[0]).ty.ty);
        let Ty::Unit(unit) = self.ctx.ty(recv_ty) else { return };

        let location = self.ctx.expr(operands[0]).location.clone();
        match method {
            "offset" | "position" | "input" | "set_input" => {
                if !unit.random_access {
                    let id = unit.id.clone();
                    self.error(
                        format!("unit '{id}' must declare %random-access to use {method}()"),
                        location,
                    );
                }
            }
            "context" => {
                if unit.context.is_none() {
                    let id = unit.id.clone();
                    self.error(format!("unit '{id}' must declare %context to use context()"), location);
                }
            }
            "connect_filter" => {
                // The connected unit must itself be a filter.
                if let Some(&arg_tuple) = operands.get(2) {
                    if let Some(Ctor::Tuple(args)) = self.ctx.expr(arg_tuple).as_ctor() {
                        if let Some(&arg) = args.first() {
                            let arg_ty = self.ctx.resolve_type(self.ctx.expr(arg).ty.ty);
                            let inner = self.ctx.ty(arg_ty).dereferenced().unwrap_or(arg_ty);
                            let inner = self.ctx.resolve_type(inner);
                            if let Ty::Unit(target) = self.ctx.ty(inner) {
                                if !target.is_filter {
                                    let id = target.id.clone();
                                    self.error(
                                        format!("unit '{id}' cannot be connected as a filter without %filter"),
                                        location,
                                    );
                                }
                            }
                        }
                    }
                }
            }
            "forward" | "forward_eod" => {
                if !unit.is_filter {
                    let id = unit.id.clone();
                    self.error(format!("unit '{id}' must declare %filter to forward data"), location);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::ast::context::Dialect;

    fn validate_source(source: &str) -> Vec<String> {
        let mut ctx = AstContext::new();
        crate::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl).expect("parse");
        let registry = Registry::build(&ctx);
        let _ = crate::resolver::resolve(&mut ctx, &registry);
        validate(&mut ctx, &registry);
        ctx.diagnostics.emitted().iter().map(ToString::to_string).collect()
    }

    fn assert_error(source: &str, fragment: &str) {
        let messages = validate_source(source);
        assert!(
            messages.iter().any(|m| m.contains(fragment)),
            "expected error containing {fragment:?}, got {messages:?}"
        );
    }

    fn assert_clean(source: &str) {
        let messages = validate_source(source);
        assert!(messages.is_empty(), "expected no diagnostics, got {messages:?}");
    }

    #[test]
    fn bytes_field_needs_terminator() {
        assert_error("module M;\ntype X = unit { x: bytes; };", "bytes field requires");
        assert_clean("module M;\ntype X = unit { x: bytes &size=4; };");
        assert_clean("module M;\ntype X = unit { x: bytes &eod; };");
    }

    #[test]
    fn address_field_needs_exactly_one_family() {
        assert_error("module M;\ntype X = unit { a: addr; };", "exactly one of &ipv4 or &ipv6");
        assert_error(
            "module M;\ntype X = unit { a: addr &ipv4 &ipv6; };",
            "exactly one of &ipv4 or &ipv6",
        );
        assert_clean("module M;\ntype X = unit { a: addr &ipv4; };");
    }

    #[test]
    fn count_only_on_containers() {
        assert_error("module M;\ntype X = unit { x: uint8 &count=3; };", "&count only applies");
    }

    #[test]
    fn switch_rules() {
        assert_error(
            "module M;\ntype X = unit { t: uint8; switch (self.t) { }; };",
            "at least one case",
        );
        assert_error(
            "module M;\ntype X = unit { t: uint8; switch (self.t) { 1 -> a: uint8; 1 -> b: uint8; }; };",
            "duplicate switch case",
        );
        assert_error(
            "module M;\ntype X = unit { t: uint8; switch (self.t) { * -> a: uint8; * -> b: uint8; }; };",
            "at most one default",
        );
    }

    #[test]
    fn break_outside_loop() {
        assert_error("module M;\nfunction f() { break; }", "break outside of a loop");
        assert_clean("module M;\nfunction f() { while (True) { break; } }");
    }

    #[test]
    fn return_value_matches_result() {
        assert_error("module M;\nfunction f() { return 1; }", "void function cannot return");
        assert_error("module M;\nfunction f() : uint64 { return; }", "must return a value");
        assert_clean("module M;\nfunction f() : uint64 { return 1; }");
    }

    #[test]
    fn try_requires_catch() {
        assert_error("module M;\nfunction f() { try { } }", "at least one catch");
    }

    #[test]
    fn random_access_gating() {
        assert_error(
            "module M;\ntype X = unit { x: uint8 { local o = self.offset(); } };",
            "%random-access",
        );
        assert_clean("module M;\ntype X = unit { %random-access; x: uint8 { local o = self.offset(); } };");
    }

    #[test]
    fn mime_type_property_shape() {
        assert_error(
            "module M;\ntype X = unit { %mime-type = \"nonsense\"; x: uint8; };",
            "invalid MIME type",
        );
        assert_clean("module M;\ntype X = unit { %mime-type = \"text/plain\"; x: uint8; };");
    }
}
