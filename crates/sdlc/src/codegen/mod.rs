//! The parser-builder: translation of unit production graphs into IML.
//!
//! For every unit the builder emits a parse function
//!
//! ```text
//! parse(self, data: ref<stream>, cur: view, trim: bool,
//!       lahead: int32, lahead_end: iterator) : tuple<view, int32, iterator>
//! ```
//!
//! plus one function per hook body and, for public units, a registration
//! function feeding the global parser registry. The `ParseState` the
//! generated code threads around is the parameter bundle itself; the
//! builder tracks only the literal-matching mode.

mod literals;
mod types;

use serde::Serialize;

use crate::{
    ast::{
        context::AstContext,
        decl::{DeclKind, Linkage},
        expr::{Ctor, ExprKind},
        node::{ExprId, HookId, ItemId, ModuleId, StmtId, TypeId},
        types::Ty,
        unit::{AttributeKind, PropertyKind, SpecialHook, UnitItem},
    },
    folder::{self, FoldStyle},
    iml::{ImlBlock, ImlDecl, ImlExpr, ImlFunction, ImlModule, ImlParam, ImlStmt, ImlType},
    operators::{OperatorKind, Registry},
    production::{GrammarBuilder, HookPoint, LoopBound, Production},
};

/// How a literal match binds and commits (see the literal emitters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiteralMode {
    /// Match, bind the value, advance.
    #[default]
    Default,
    /// Probe without committing; yields the would-be new position.
    Try,
    /// Match and advance without binding a destination.
    Skip,
}

/// Registry metadata for one compiled parser, also serialized into the
/// linker metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ParserRecord {
    pub name: String,
    pub description: String,
    pub mime_types: Vec<String>,
    pub ports: Vec<String>,
    pub is_public: bool,
}

/// Result of compiling one module.
#[derive(Debug)]
pub struct CodegenOutput {
    pub module: ImlModule,
    pub parsers: Vec<ParserRecord>,
}

/// Compiles every unit type of a module into IML.
pub fn compile_module(ctx: &mut AstContext, registry: &Registry, module: ModuleId) -> CodegenOutput {
    let module_name = ctx.module(module).id.clone();
    let mut out = ImlModule::new(module_name.clone());
    let mut parsers = Vec::new();

    let decls = ctx.module(module).decls.clone();
    for decl_id in decls {
        let decl = ctx.decl(decl_id).clone();
        let DeclKind::Type { ty } = decl.kind else { continue };
        let unit_ty = ctx.resolve_type(ty);
        if !matches!(ctx.ty(unit_ty), Ty::Unit(_)) {
            continue;
        }
        let is_public = decl.linkage != Linkage::Private;
        let mut builder = ParserBuilder {
            ctx: &mut *ctx,
            registry,
            module: module_name.clone(),
            unit_ty,
            unit_name: format!("{module_name}::{id}", id = decl.id),
            mode: LiteralMode::Default,
            tmp: 0,
        };
        let (mut decls, record) = builder.compile_unit(is_public, module);
        out.decls.append(&mut decls);
        if let Some(record) = record {
            parsers.push(record);
        }
    }

    CodegenOutput { module: out, parsers }
}

pub(crate) struct ParserBuilder<'a> {
    pub(crate) ctx: &'a mut AstContext,
    pub(crate) registry: &'a Registry,
    module: String,
    pub(crate) unit_ty: TypeId,
    pub(crate) unit_name: String,
    pub(crate) mode: LiteralMode,
    tmp: u32,
}

impl ParserBuilder<'_> {
    pub(crate) fn fresh(&mut self, stem: &str) -> String {
        self.tmp += 1;
        format!("__{stem}_{n}", n = self.tmp)
    }

    // ---------------------------------------------------------------
    // Unit compilation
    // ---------------------------------------------------------------

    fn compile_unit(&mut self, is_public: bool, module: ModuleId) -> (Vec<ImlDecl>, Option<ParserRecord>) {
        let mut decls = Vec::new();

        decls.push(ImlDecl::Type {
            id: self.unit_name.clone(),
            definition: self.struct_definition(),
        });

        // Hook bodies become functions; calls are emitted at their points.
        for (name, hook) in self.unit_hooks(module) {
            decls.push(ImlDecl::Function(self.compile_hook(&name, hook)));
        }

        let grammar = GrammarBuilder::new(self.ctx).build(self.unit_ty);
        decls.push(ImlDecl::Function(self.compile_parse_function(&grammar)));

        let record = is_public.then(|| self.parser_record());
        if let Some(record) = &record {
            decls.push(ImlDecl::Function(self.registration_function(record)));
        }
        (decls, record)
    }

    /// The emitted struct layout: named, non-transient fields without
    /// `&no-emit`, followed by unit variables and sinks.
    fn struct_definition(&self) -> String {
        let Ty::Unit(unit) = self.ctx.ty(self.unit_ty) else {
            return "struct { }".into();
        };
        let mut fields = Vec::new();
        for &item in &unit.items {
            match self.ctx.item(item) {
                UnitItem::Field(field) => {
                    let Some(id) = &field.id else { continue };
                    if field.is_transient || field.attributes.has(AttributeKind::NoEmit) {
                        continue;
                    }
                    let ty = field.item_ty.or(field.parse_ty).unwrap_or(self.ctx.standard().bytes);
                    fields.push(format!("{id}: {}", crate::ast::types::render(self.ctx, ty)));
                }
                UnitItem::Variable { id, ty, .. } => {
                    fields.push(format!("{id}: {}", crate::ast::types::render(self.ctx, *ty)));
                }
                UnitItem::Sink { id, .. } => fields.push(format!("{id}: sink")),
                _ => {}
            }
        }
        if unit.random_access {
            fields.push("__begin: iterator".into());
        }
        format!("struct {{ {} }}", fields.join("; "))
    }

    /// All hooks of the unit, paired with their emitted function names.
    fn unit_hooks(&self, module: ModuleId) -> Vec<(String, HookId)> {
        let Ty::Unit(unit) = self.ctx.ty(self.unit_ty) else { return Vec::new() };
        let unit_index = self.ctx.type_node(self.unit_ty).index;
        let mut out = Vec::new();
        let mut serial = 0_u32;
        let mut name_for = |special: Option<SpecialHook>, field: Option<&str>, foreach: bool| {
            serial += 1;
            let stem = match (special, field) {
                (Some(SpecialHook::Init), _) => "init".to_owned(),
                (Some(SpecialHook::Done), _) => "done".to_owned(),
                (Some(SpecialHook::Error), _) => "error".to_owned(),
                (Some(SpecialHook::Print), _) => "print".to_owned(),
                (None, Some(field)) => field.to_owned(),
                (None, None) => "anon".to_owned(),
            };
            let suffix = if foreach { "_foreach" } else { "" };
            format!("{unit}::__on_{stem}{suffix}_{serial}", unit = self.unit_name)
        };

        for &item in &unit.items {
            match self.ctx.item(item) {
                UnitItem::UnitHook { hook, .. } => {
                    let h = self.ctx.hook(*hook);
                    out.push((
                        name_for(h.special, None, h.flavor == crate::ast::unit::HookFlavor::Foreach),
                        *hook,
                    ));
                }
                UnitItem::Field(field) => {
                    for &hook in &field.hooks {
                        let h = self.ctx.hook(hook);
                        out.push((
                            name_for(h.special, field.id.as_deref(), h.flavor == crate::ast::unit::HookFlavor::Foreach),
                            hook,
                        ));
                    }
                }
                _ => {}
            }
        }

        // Module-level hooks bound to this unit.
        for &hook in &self.ctx.module(module).hooks {
            let h = self.ctx.hook(hook);
            if h.unit == unit_index && unit_index.is_set() {
                let field_name = h.field.and_then(|f| {
                    self.ctx.item(f).as_field().and_then(|f| f.id.clone())
                });
                out.push((
                    name_for(h.special, field_name.as_deref(), h.flavor == crate::ast::unit::HookFlavor::Foreach),
                    hook,
                ));
            }
        }
        out
    }

    fn compile_hook(&mut self, name: &str, hook: HookId) -> ImlFunction {
        let h = self.ctx.hook(hook).clone();
        let mut params = vec![ImlParam {
            id: "self".into(),
            ty: ImlType::Ref(Box::new(ImlType::Named(self.unit_name.clone()))),
        }];
        if let Some(dd) = h.dd_type {
            params.push(ImlParam {
                id: "__dd".into(),
                ty: self.iml_type(dd),
            });
        }
        for &param in &h.params {
            let decl = self.ctx.decl(param);
            let DeclKind::Parameter { ty, .. } = decl.kind else { continue };
            params.push(ImlParam {
                id: decl.id.clone(),
                ty: self.iml_type(ty),
            });
        }
        let result = h.result.map_or(ImlType::Void, |t| self.iml_type(t));
        let mut body = ImlBlock::new();
        self.translate_stmt(h.body, &mut body);
        ImlFunction {
            id: name.to_owned(),
            params,
            result,
            body,
            public: false,
        }
    }

    /// Emits hook invocations for the given special point.
    pub(crate) fn call_special_hooks(&mut self, special: SpecialHook, block: &mut ImlBlock, module: ModuleId) {
        for (name, hook) in self.unit_hooks(module) {
            if self.ctx.hook(hook).special == Some(special) {
                let mut args = vec![ImlExpr::name("self")];
                if special == SpecialHook::Error {
                    args.push(ImlExpr::name("__except"));
                }
                block.push(ImlStmt::Expr(ImlExpr::call(name, args)));
            }
        }
    }

    /// Calls the hooks attached to a field at the given point.
    pub(crate) fn call_field_hooks(
        &mut self,
        field: ItemId,
        point: HookPoint,
        value: &ImlExpr,
        block: &mut ImlBlock,
        module: ModuleId,
    ) {
        let hooks: Vec<(String, HookId)> = self
            .unit_hooks(module)
            .into_iter()
            .filter(|(_, hook)| {
                let h = self.ctx.hook(*hook);
                if h.special.is_some() {
                    return false;
                }
                let attached = h.field == Some(field);
                let foreach = h.flavor == crate::ast::unit::HookFlavor::Foreach;
                attached
                    && match point {
                        HookPoint::Foreach => foreach,
                        HookPoint::After | HookPoint::Before => !foreach,
                    }
            })
            .collect();
        for (name, hook) in hooks {
            let mut args = vec![ImlExpr::name("self")];
            if self.ctx.hook(hook).dd_type.is_some() {
                args.push(value.clone());
            }
            block.push(ImlStmt::Expr(ImlExpr::call(name, args)));
        }
    }

    fn parser_record(&mut self) -> ParserRecord {
        let Ty::Unit(unit) = self.ctx.ty(self.unit_ty).clone() else {
            return ParserRecord {
                name: self.unit_name.clone(),
                description: String::new(),
                mime_types: Vec::new(),
                ports: Vec::new(),
                is_public: true,
            };
        };
        let mut description = String::new();
        let mut mime_types = Vec::new();
        let mut ports = Vec::new();
        for &item in &unit.items {
            let UnitItem::Property { kind, value, .. } = self.ctx.item(item) else { continue };
            let folded = value.and_then(|v| folder::fold(self.ctx, self.registry, v, FoldStyle::full()).ok().flatten());
            match kind {
                PropertyKind::Description => {
                    if let Some(Ctor::String(s)) = folded {
                        description = s;
                    }
                }
                PropertyKind::MimeType => {
                    if let Some(Ctor::String(s)) = folded {
                        mime_types.push(s);
                    }
                }
                PropertyKind::Port => match folded {
                    Some(Ctor::Port(p)) => ports.push(p.to_string()),
                    Some(Ctor::String(s)) => ports.push(s),
                    _ => {}
                },
                _ => {}
            }
        }
        ParserRecord {
            name: self.unit_name.clone(),
            description,
            mime_types,
            ports,
            is_public: true,
        }
    }

    /// The module constructor registering this parser at startup.
    fn registration_function(&mut self, record: &ParserRecord) -> ImlFunction {
        let mut body = ImlBlock::new();
        let mime_types = ImlExpr::Tuple(record.mime_types.iter().map(|m| ImlExpr::Str(m.clone())).collect());
        let ports = ImlExpr::Tuple(record.ports.iter().map(|p| ImlExpr::Str(p.clone())).collect());
        body.push(ImlStmt::Expr(ImlExpr::call(
            "sdlc_rt::register_parser",
            vec![
                ImlExpr::Str(record.name.clone()),
                ImlExpr::Str(record.description.clone()),
                mime_types,
                ports,
                ImlExpr::call("sdlc_rt::linker_scope", vec![]),
            ],
        )));
        ImlFunction {
            id: format!("{}::__register", self.unit_name),
            params: vec![],
            result: ImlType::Void,
            body,
            public: true,
        }
    }

    // ---------------------------------------------------------------
    // The parse function
    // ---------------------------------------------------------------

    fn compile_parse_function(&mut self, grammar: &Production) -> ImlFunction {
        let module = self
            .ctx
            .modules()
            .find(|(_, m)| m.id == self.module)
            .map(|(id, _)| id)
            .expect("module exists");

        let mut body = ImlBlock::new();
        let random_access = matches!(self.ctx.ty(self.unit_ty), Ty::Unit(u) if u.random_access);
        if random_access {
            body.push(ImlStmt::Assign {
                target: ImlExpr::member(ImlExpr::name("self"), "__begin"),
                value: ImlExpr::method(ImlExpr::name("cur"), "begin", vec![]),
            });
        }
        self.call_special_hooks(SpecialHook::Init, &mut body, module);

        let mut parse_body = ImlBlock::new();
        self.emit_production(grammar, &mut parse_body, module);
        self.call_special_hooks(SpecialHook::Done, &mut parse_body, module);
        parse_body.push(ImlStmt::Return(Some(ImlExpr::Tuple(vec![
            ImlExpr::name("cur"),
            ImlExpr::name("lahead"),
            ImlExpr::name("lahead_end"),
        ]))));

        // %error hooks run after a parse error reaches unit scope, before
        // the error re-raises to the caller.
        let has_error_hook = self
            .unit_hooks(module)
            .iter()
            .any(|(_, hook)| self.ctx.hook(*hook).special == Some(SpecialHook::Error));
        if has_error_hook {
            let mut handler = ImlBlock::new();
            self.call_special_hooks(SpecialHook::Error, &mut handler, module);
            handler.push(ImlStmt::Throw {
                kind: "ParseError".into(),
                message: ImlExpr::name("__except"),
            });
            body.push(ImlStmt::Try {
                body: parse_body,
                catches: vec![crate::iml::ImlCatch {
                    param: Some(("__except".into(), ImlType::Error)),
                    body: handler,
                }],
            });
            // Unreachable fall-through keeps the signature total.
            body.push(ImlStmt::Return(Some(ImlExpr::Tuple(vec![
                ImlExpr::name("cur"),
                ImlExpr::name("lahead"),
                ImlExpr::name("lahead_end"),
            ]))));
        } else {
            body.stmts.extend(parse_body.stmts);
        }

        ImlFunction {
            id: format!("{}::parse", self.unit_name),
            params: vec![
                ImlParam {
                    id: "self".into(),
                    ty: ImlType::Ref(Box::new(ImlType::Named(self.unit_name.clone()))),
                },
                ImlParam {
                    id: "data".into(),
                    ty: ImlType::Ref(Box::new(ImlType::Stream)),
                },
                ImlParam {
                    id: "cur".into(),
                    ty: ImlType::View,
                },
                ImlParam {
                    id: "trim".into(),
                    ty: ImlType::Bool,
                },
                ImlParam {
                    id: "lahead".into(),
                    ty: ImlType::SInt(32),
                },
                ImlParam {
                    id: "lahead_end".into(),
                    ty: ImlType::Iterator,
                },
            ],
            result: ImlType::Tuple(vec![ImlType::View, ImlType::SInt(32), ImlType::Iterator]),
            body,
            public: true,
        }
    }

    // ---------------------------------------------------------------
    // Productions
    // ---------------------------------------------------------------

    pub(crate) fn emit_production(&mut self, production: &Production, block: &mut ImlBlock, module: ModuleId) {
        match production {
            Production::Sequence(children) => {
                for child in children {
                    self.emit_production(child, block, module);
                }
            }
            Production::Literal { ctor, field, .. } => {
                let mut inner = ImlBlock::new();
                let value = self.emit_literal(*ctor, self.mode, &mut inner);
                if let (Some(field), Some(value)) = (field, value) {
                    self.store_field(*field, &value, &mut inner, module);
                }
                self.trim_input(&mut inner);
                self.wrap_try_scope(*field, inner, block);
            }
            Production::Type { ty, field } => {
                let mut inner = ImlBlock::new();
                let value = self.emit_type_parse(*ty, *field, &mut inner, module);
                if let Some(value) = value {
                    self.store_field(*field, &value, &mut inner, module);
                }
                self.trim_input(&mut inner);
                self.wrap_try_scope(Some(*field), inner, block);
            }
            Production::Variable { item } => self.emit_variable(*item, block),
            Production::Sink { item } => self.emit_sink(*item, block),
            Production::Hook { when, hook } => {
                // Standalone hook production (before/after field points).
                let _ = (when, hook);
            }
            Production::Alternation { arms, default } => {
                self.emit_alternation(arms, default.as_deref(), block, module);
            }
            Production::Switch { scrutinee, cases, default } => {
                self.emit_switch(*scrutinee, cases, default.as_deref(), block, module);
            }
            Production::Loop { body, bound, field } => {
                self.emit_loop(body, bound, *field, block, module);
            }
            Production::LookAhead(repeat, terminator) => {
                self.emit_look_ahead(repeat, terminator, block, module);
            }
        }
    }

    fn emit_alternation(
        &mut self,
        arms: &[(Option<ExprId>, Production)],
        default: Option<&Production>,
        block: &mut ImlBlock,
        module: ModuleId,
    ) {
        let mut current: Option<ImlStmt> = default.map(|d| {
            let mut b = ImlBlock::new();
            self.emit_production(d, &mut b, module);
            ImlStmt::If {
                cond: ImlExpr::Bool(true),
                then: b,
                alt: None,
            }
        });
        // Build the chain from the last arm backwards.
        for (guard, production) in arms.iter().rev() {
            let mut then = ImlBlock::new();
            self.emit_production(production, &mut then, module);
            let cond = guard.map_or(ImlExpr::Bool(true), |g| self.translate_expr(g));
            let alt = current.take().map(|stmt| {
                let mut b = ImlBlock::new();
                match stmt {
                    ImlStmt::If {
                        cond: ImlExpr::Bool(true),
                        then,
                        alt: None,
                    } => return then,
                    other => b.push(other),
                }
                b
            });
            current = Some(ImlStmt::If { cond, then, alt });
        }
        if let Some(stmt) = current {
            block.push(stmt);
        }
    }

    fn emit_switch(
        &mut self,
        scrutinee: Option<ExprId>,
        cases: &[(Vec<ExprId>, Production)],
        default: Option<&Production>,
        block: &mut ImlBlock,
        module: ModuleId,
    ) {
        match scrutinee {
            Some(scrutinee) => {
                let scrut_var = self.fresh("switch");
                let scrut = self.translate_expr(scrutinee);
                block.push(ImlStmt::Local {
                    id: scrut_var.clone(),
                    ty: None,
                    init: Some(scrut),
                });
                let mut chain: Option<ImlBlock> = Some({
                    let mut b = ImlBlock::new();
                    match default {
                        Some(d) => self.emit_production(d, &mut b, module),
                        None => b.push(ImlStmt::Throw {
                            kind: "ParseError".into(),
                            message: ImlExpr::Str("no matching switch case".into()),
                        }),
                    }
                    b
                });
                for (exprs, production) in cases.iter().rev() {
                    let mut then = ImlBlock::new();
                    self.emit_production(production, &mut then, module);
                    let mut cond: Option<ImlExpr> = None;
                    for &e in exprs {
                        let test = ImlExpr::binary("==", ImlExpr::name(scrut_var.clone()), self.translate_expr(e));
                        cond = Some(match cond {
                            Some(prev) => ImlExpr::binary("||", prev, test),
                            None => test,
                        });
                    }
                    let mut b = ImlBlock::new();
                    b.push(ImlStmt::If {
                        cond: cond.unwrap_or(ImlExpr::Bool(true)),
                        then,
                        alt: chain.take(),
                    });
                    chain = Some(b);
                }
                if let Some(chain) = chain {
                    block.stmts.extend(chain.stmts);
                }
            }
            None => {
                // Look-ahead switch: probe each case's leading literal.
                let mut chain: Option<ImlBlock> = Some({
                    let mut b = ImlBlock::new();
                    match default {
                        Some(d) => self.emit_production(d, &mut b, module),
                        None => b.push(ImlStmt::Throw {
                            kind: "ParseError".into(),
                            message: ImlExpr::Str("no look-ahead case matched".into()),
                        }),
                    }
                    b
                });
                for (_, production) in cases.iter().rev() {
                    let Some(probe) = self.leading_literal(production) else {
                        let mut b = ImlBlock::new();
                        self.emit_production(production, &mut b, module);
                        chain = Some(b);
                        continue;
                    };
                    let cond = self.emit_literal_probe(probe, block);
                    let mut then = ImlBlock::new();
                    self.emit_production(production, &mut then, module);
                    let mut b = ImlBlock::new();
                    b.push(ImlStmt::If {
                        cond,
                        then,
                        alt: chain.take(),
                    });
                    chain = Some(b);
                }
                if let Some(chain) = chain {
                    block.stmts.extend(chain.stmts);
                }
            }
        }
    }

    fn leading_literal(&self, production: &Production) -> Option<ExprId> {
        match production {
            Production::Literal { ctor, .. } => Some(*ctor),
            Production::Sequence(children) => children.first().and_then(|c| self.leading_literal(c)),
            _ => None,
        }
    }

    fn emit_loop(
        &mut self,
        body: &Production,
        bound: &LoopBound,
        field: ItemId,
        block: &mut ImlBlock,
        module: ModuleId,
    ) {
        let elem_ty = self.loop_element_type(body);
        let vec_var = self.fresh("vec");
        block.push(ImlStmt::Local {
            id: vec_var.clone(),
            ty: Some(ImlType::Vector(Box::new(elem_ty))),
            init: None,
        });

        match bound {
            LoopBound::Count(count) => {
                let n_var = self.fresh("n");
                let i_var = self.fresh("i");
                let count = self.translate_expr(*count);
                block.push(ImlStmt::Local {
                    id: n_var.clone(),
                    ty: Some(ImlType::UInt(64)),
                    init: Some(count),
                });
                block.push(ImlStmt::Local {
                    id: i_var.clone(),
                    ty: Some(ImlType::UInt(64)),
                    init: Some(ImlExpr::uint(0)),
                });
                let mut loop_body = ImlBlock::new();
                self.emit_loop_element(body, &vec_var, field, &mut loop_body, module);
                loop_body.push(ImlStmt::Assign {
                    target: ImlExpr::name(i_var.clone()),
                    value: ImlExpr::binary("+", ImlExpr::name(i_var.clone()), ImlExpr::uint(1)),
                });
                block.push(ImlStmt::While {
                    cond: ImlExpr::binary("<", ImlExpr::name(i_var), ImlExpr::name(n_var)),
                    body: loop_body,
                });
            }
            LoopBound::While(cond) => {
                let cond = self.translate_expr(*cond);
                let mut loop_body = ImlBlock::new();
                self.emit_loop_element(body, &vec_var, field, &mut loop_body, module);
                block.push(ImlStmt::While { cond, body: loop_body });
            }
            LoopBound::Until(term) | LoopBound::UntilIncluding(term) => {
                let including = matches!(bound, LoopBound::UntilIncluding(_));
                let term = self.translate_expr(*term);
                let mut loop_body = ImlBlock::new();
                let elem = self.emit_element_value(body, &mut loop_body, module);
                let elem_var = self.fresh("elem");
                loop_body.push(ImlStmt::Local {
                    id: elem_var.clone(),
                    ty: None,
                    init: Some(elem),
                });
                let elem = ImlExpr::name(elem_var);
                let mut stop = ImlBlock::new();
                if including {
                    stop.push(ImlStmt::Expr(ImlExpr::method(
                        ImlExpr::name(vec_var.clone()),
                        "push_back",
                        vec![elem.clone()],
                    )));
                }
                stop.push(ImlStmt::Break);
                loop_body.push(ImlStmt::If {
                    cond: ImlExpr::binary("==", elem.clone(), term),
                    then: stop,
                    alt: None,
                });
                loop_body.push(ImlStmt::Expr(ImlExpr::method(
                    ImlExpr::name(vec_var.clone()),
                    "push_back",
                    vec![elem.clone()],
                )));
                self.call_field_hooks(field, HookPoint::Foreach, &elem, &mut loop_body, module);
                block.push(ImlStmt::While {
                    cond: ImlExpr::Bool(true),
                    body: loop_body,
                });
            }
            LoopBound::UntilInput => {
                let mut loop_body = ImlBlock::new();
                let more_var = self.fresh("more");
                loop_body.push(ImlStmt::Local {
                    id: more_var.clone(),
                    ty: Some(ImlType::Bool),
                    init: Some(self.wait_or_eod_expr(ImlExpr::uint(1))),
                });
                let mut stop = ImlBlock::new();
                stop.push(ImlStmt::Break);
                loop_body.push(ImlStmt::If {
                    cond: ImlExpr::Unary {
                        op: "!",
                        operand: Box::new(ImlExpr::name(more_var)),
                    },
                    then: stop,
                    alt: None,
                });
                self.emit_loop_element(body, &vec_var, field, &mut loop_body, module);
                block.push(ImlStmt::While {
                    cond: ImlExpr::Bool(true),
                    body: loop_body,
                });
            }
        }

        self.store_field(field, &ImlExpr::name(vec_var), block, module);
        self.trim_input(block);
    }

    fn emit_loop_element(
        &mut self,
        body: &Production,
        vec_var: &str,
        field: ItemId,
        block: &mut ImlBlock,
        module: ModuleId,
    ) {
        let elem = self.emit_element_value(body, block, module);
        block.push(ImlStmt::Expr(ImlExpr::method(
            ImlExpr::name(vec_var),
            "push_back",
            vec![elem.clone()],
        )));
        self.call_field_hooks(field, HookPoint::Foreach, &elem, block, module);
    }

    /// Parses one element of a loop body and returns its value.
    fn emit_element_value(&mut self, body: &Production, block: &mut ImlBlock, module: ModuleId) -> ImlExpr {
        match body {
            Production::Literal { ctor, .. } => self
                .emit_literal(*ctor, LiteralMode::Default, block)
                .unwrap_or(ImlExpr::Null),
            Production::Type { ty, field } => self
                .emit_type_parse(*ty, *field, block, module)
                .unwrap_or(ImlExpr::Null),
            other => {
                let mut inner = ImlBlock::new();
                self.emit_production(other, &mut inner, module);
                block.stmts.extend(inner.stmts);
                ImlExpr::Null
            }
        }
    }

    fn emit_look_ahead(
        &mut self,
        repeat: &Production,
        terminator: &Production,
        block: &mut ImlBlock,
        module: ModuleId,
    ) {
        let Production::Loop { body, field, .. } = repeat else {
            self.emit_production(repeat, block, module);
            self.emit_production(terminator, block, module);
            return;
        };
        let Some(probe) = self.leading_literal(terminator) else {
            self.emit_production(repeat, block, module);
            self.emit_production(terminator, block, module);
            return;
        };

        let elem_ty = self.loop_element_type(body);
        let vec_var = self.fresh("vec");
        block.push(ImlStmt::Local {
            id: vec_var.clone(),
            ty: Some(ImlType::Vector(Box::new(elem_ty))),
            init: None,
        });
        let mut loop_body = ImlBlock::new();
        let cond = self.emit_literal_probe(probe, &mut loop_body);
        let mut stop = ImlBlock::new();
        stop.push(ImlStmt::Break);
        loop_body.push(ImlStmt::If {
            cond,
            then: stop,
            alt: None,
        });
        self.emit_loop_element(body, &vec_var, *field, &mut loop_body, module);
        block.push(ImlStmt::While {
            cond: ImlExpr::Bool(true),
            body: loop_body,
        });
        self.store_field(*field, &ImlExpr::name(vec_var), block, module);

        self.emit_production(terminator, block, module);
    }

    fn loop_element_type(&self, body: &Production) -> ImlType {
        match body {
            Production::Type { ty, .. } => self.iml_type(*ty),
            Production::Literal { .. } => ImlType::Bytes,
            _ => ImlType::Any,
        }
    }

    // ---------------------------------------------------------------
    // Items
    // ---------------------------------------------------------------

    fn emit_variable(&mut self, item: ItemId, block: &mut ImlBlock) {
        let UnitItem::Variable { id, ty, default, .. } = self.ctx.item(item).clone() else {
            return;
        };
        let init = default.map(|d| self.translate_expr(d));
        if let Some(init) = init {
            block.push(ImlStmt::Assign {
                target: ImlExpr::member(ImlExpr::name("self"), id),
                value: init,
            });
        } else {
            let _ = ty;
        }
    }

    fn emit_sink(&mut self, item: ItemId, block: &mut ImlBlock) {
        let UnitItem::Sink { id, .. } = self.ctx.item(item).clone() else { return };
        block.push(ImlStmt::Assign {
            target: ImlExpr::member(ImlExpr::name("self"), id),
            value: ImlExpr::call("sdlc_rt::new_sink", vec![]),
        });
    }

    /// Stores a parsed value into its field member, applies `&convert`,
    /// forwards to sinks, runs `&requires`, and fires the field hooks.
    pub(crate) fn store_field(&mut self, item: ItemId, value: &ImlExpr, block: &mut ImlBlock, module: ModuleId) {
        let Some(field) = self.ctx.item(item).as_field().cloned() else { return };

        // &requires: validate the raw value.
        if let Some(requires) = field.attributes.value_of(AttributeKind::Requires) {
            let cond = self.translate_dd_expr(requires, value);
            let mut fail = ImlBlock::new();
            fail.push(ImlStmt::Throw {
                kind: "ParseError".into(),
                message: ImlExpr::Str("&requires failed".into()),
            });
            block.push(ImlStmt::If {
                cond: ImlExpr::Unary {
                    op: "!",
                    operand: Box::new(cond),
                },
                then: fail,
                alt: None,
            });
        }

        // Sinks receive the raw bytes.
        for &sink in &field.sinks {
            let target = self.translate_expr(sink);
            block.push(ImlStmt::Expr(ImlExpr::method(target, "write", vec![value.clone()])));
        }

        let stored = match field.attributes.value_of(AttributeKind::Convert) {
            Some(convert) => self.translate_dd_expr(convert, value),
            None => value.clone(),
        };

        if let Some(id) = &field.id {
            if !field.is_transient && !field.attributes.has(AttributeKind::NoEmit) && !field.is_skip {
                block.push(ImlStmt::Assign {
                    target: ImlExpr::member(ImlExpr::name("self"), id.clone()),
                    value: stored.clone(),
                });
            }
        }

        self.call_field_hooks(item, HookPoint::After, &stored, block, module);
    }

    /// A `&try` field establishes a backtrack point: `self.backtrack()`
    /// inside the field restores the pre-try position and resumes after
    /// the field. Without `&try`, the statements pass through unchanged.
    fn wrap_try_scope(&mut self, field: Option<ItemId>, inner: ImlBlock, block: &mut ImlBlock) {
        let is_try = field
            .and_then(|f| self.ctx.item(f).as_field().map(|f| f.attributes.has(AttributeKind::Try)))
            .unwrap_or(false);
        if !is_try {
            block.stmts.extend(inner.stmts);
            return;
        }
        let saved = self.fresh("try_pos");
        block.push(ImlStmt::Local {
            id: saved.clone(),
            ty: Some(ImlType::View),
            init: Some(ImlExpr::name("cur")),
        });
        let mut handler = ImlBlock::new();
        handler.push(ImlStmt::Assign {
            target: ImlExpr::name("cur"),
            value: ImlExpr::name(saved),
        });
        block.push(ImlStmt::Try {
            body: inner,
            catches: vec![crate::iml::ImlCatch {
                param: Some(("__bt".into(), ImlType::Named("Backtrack".into()))),
                body: handler,
            }],
        });
    }

    /// Releases consumed input when trimming is enabled and the builder is
    /// not probing.
    pub(crate) fn trim_input(&mut self, block: &mut ImlBlock) {
        if self.mode == LiteralMode::Try {
            return;
        }
        let mut then = ImlBlock::new();
        then.push(ImlStmt::Expr(ImlExpr::method(
            ImlExpr::name("data"),
            "trim",
            vec![ImlExpr::method(ImlExpr::name("cur"), "begin", vec![])],
        )));
        block.push(ImlStmt::If {
            cond: ImlExpr::name("trim"),
            then,
            alt: None,
        });
    }

    // ---------------------------------------------------------------
    // AST-to-IML translation
    // ---------------------------------------------------------------

    /// Translates an expression whose `$$` refers to `value`.
    pub(crate) fn translate_dd_expr(&mut self, expr: ExprId, value: &ImlExpr) -> ImlExpr {
        let translated = self.translate_expr(expr);
        substitute_dd(translated, value)
    }

    pub(crate) fn translate_expr(&mut self, expr: ExprId) -> ImlExpr {
        let e = self.ctx.expr(expr).clone();
        match e.kind {
            ExprKind::Name { id, resolved } => {
                if resolved.is_set() {
                    let decl = self.ctx.lookup_declaration(resolved);
                    match &decl.kind {
                        DeclKind::Constant { value, .. } => {
                            // Enum labels print qualified.
                            if let ExprKind::Ctor(Ctor::Enum { ty, label }) = &self.ctx.expr(*value).kind {
                                let ty = *ty;
                                let label = label.clone();
                                let name = match self.ctx.ty(ty) {
                                    Ty::Enum(e) => format!("{}::{}", e.id, label),
                                    _ => label,
                                };
                                return ImlExpr::name(name);
                            }
                            ImlExpr::name(decl.id.clone())
                        }
                        _ => ImlExpr::name(decl.id.clone()),
                    }
                } else {
                    ImlExpr::name(id)
                }
            }
            ExprKind::SelfRef => ImlExpr::name("self"),
            ExprKind::Dollar => ImlExpr::name("__dd"),
            ExprKind::Member { id } => ImlExpr::name(id),
            ExprKind::Ctor(ctor) => self.translate_ctor(&ctor),
            ExprKind::Grouping(inner) | ExprKind::Coerced(inner) => self.translate_expr(inner),
            ExprKind::LogicalNot(inner) => ImlExpr::Unary {
                op: "!",
                operand: Box::new(self.translate_expr(inner)),
            },
            ExprKind::LogicalAnd(a, b) => {
                let a = self.translate_expr(a);
                let b = self.translate_expr(b);
                ImlExpr::binary("&&", a, b)
            }
            ExprKind::LogicalOr(a, b) => {
                let a = self.translate_expr(a);
                let b = self.translate_expr(b);
                ImlExpr::binary("||", a, b)
            }
            ExprKind::Ternary { cond, then, alt } => ImlExpr::Ternary {
                cond: Box::new(self.translate_expr(cond)),
                then: Box::new(self.translate_expr(then)),
                alt: Box::new(self.translate_expr(alt)),
            },
            ExprKind::Assign { target, source } => {
                // Expression-position assignment; rare, emitted as the RHS.
                let _ = target;
                self.translate_expr(source)
            }
            ExprKind::ResolvedCall { function, args } => {
                let id = self.ctx.lookup_declaration(function).canonical_id.clone();
                let args = args.into_iter().map(|a| self.translate_expr(a)).collect();
                ImlExpr::Call { id, args }
            }
            ExprKind::TypeExpr(ty) => ImlExpr::name(crate::ast::types::render(self.ctx, ty)),
            ExprKind::ListComprehension { .. } => ImlExpr::Null,
            ExprKind::ResolvedOperator { op, operands } => {
                let kind = self.registry.op(op).kind;
                self.translate_operator(kind, &operands)
            }
            ExprKind::UnresolvedOperator { op, operands } => self.translate_operator(op, &operands),
        }
    }

    fn translate_operator(&mut self, kind: OperatorKind, operands: &[ExprId]) -> ImlExpr {
        use OperatorKind as K;
        match kind {
            K::Sum => self.binary_of("+", operands),
            K::Difference => self.binary_of("-", operands),
            K::Multiple => self.binary_of("*", operands),
            K::Division => self.binary_of("/", operands),
            K::Modulo => self.binary_of("%", operands),
            K::Power => self.binary_of("**", operands),
            K::ShiftLeft => self.binary_of("<<", operands),
            K::ShiftRight => self.binary_of(">>", operands),
            K::BitAnd => self.binary_of("&", operands),
            K::BitOr => self.binary_of("|", operands),
            K::BitXor => self.binary_of("^", operands),
            K::Equal => self.binary_of("==", operands),
            K::Unequal => self.binary_of("!=", operands),
            K::Lower => self.binary_of("<", operands),
            K::LowerEqual => self.binary_of("<=", operands),
            K::Greater => self.binary_of(">", operands),
            K::GreaterEqual => self.binary_of(">=", operands),
            K::In => self.binary_of("in", operands),
            K::SumAssign => self.binary_of("+=", operands),
            K::DifferenceAssign => self.binary_of("-=", operands),
            K::MultipleAssign => self.binary_of("*=", operands),
            K::DivisionAssign => self.binary_of("/=", operands),
            K::SignNeg => ImlExpr::Unary {
                op: "-",
                operand: Box::new(self.translate_expr(operands[0])),
            },
            K::SignPos => self.translate_expr(operands[0]),
            K::Negate => ImlExpr::Unary {
                op: "~",
                operand: Box::new(self.translate_expr(operands[0])),
            },
            K::Deref => ImlExpr::Unary {
                op: "*",
                operand: Box::new(self.translate_expr(operands[0])),
            },
            K::Size => {
                let inner = self.translate_expr(operands[0]);
                ImlExpr::SizeOf(Box::new(inner))
            }
            K::Member | K::TryMember => {
                let object = self.translate_expr(operands[0]);
                let id = self.member_name(operands[1]);
                ImlExpr::Member(Box::new(object), id)
            }
            K::HasMember => {
                let object = self.translate_expr(operands[0]);
                let id = self.member_name(operands[1]);
                ImlExpr::method(object, "__has", vec![ImlExpr::Str(id)])
            }
            K::Unset => {
                let object = self.translate_expr(operands[0]);
                let id = self.member_name(operands[1]);
                ImlExpr::method(object, "__unset", vec![ImlExpr::Str(id)])
            }
            K::Index => {
                let object = self.translate_expr(operands[0]);
                let index = self.translate_expr(operands[1]);
                ImlExpr::Index(Box::new(object), Box::new(index))
            }
            K::MemberCall => {
                let object = self.translate_expr(operands[0]);
                let method = self.member_name(operands[1]);
                let args = match self.ctx.expr(operands[2]).as_ctor() {
                    Some(Ctor::Tuple(args)) => args.clone(),
                    _ => Vec::new(),
                };
                let args = args.into_iter().map(|a| self.translate_expr(a)).collect();
                ImlExpr::MethodCall {
                    object: Box::new(object),
                    method,
                    args,
                }
            }
            K::Cast => {
                let value = self.translate_expr(operands[0]);
                let target = match self.ctx.expr(operands[1]).kind {
                    ExprKind::TypeExpr(ty) => crate::ast::types::render(self.ctx, ty),
                    _ => "any".into(),
                };
                ImlExpr::call(format!("cast<{target}>"), vec![value])
            }
            K::New => {
                let target = match self.ctx.expr(operands[0]).kind {
                    ExprKind::TypeExpr(ty) => crate::ast::types::render(self.ctx, ty),
                    _ => "any".into(),
                };
                ImlExpr::call("new", vec![ImlExpr::name(target)])
            }
            K::Begin => {
                let inner = self.translate_expr(operands[0]);
                ImlExpr::method(inner, "begin", vec![])
            }
            K::End => {
                let inner = self.translate_expr(operands[0]);
                ImlExpr::method(inner, "end", vec![])
            }
            _ => {
                let args = operands.iter().map(|&o| self.translate_expr(o)).collect();
                ImlExpr::Call {
                    id: format!("__op_{kind}"),
                    args,
                }
            }
        }
    }

    fn binary_of(&mut self, op: &'static str, operands: &[ExprId]) -> ImlExpr {
        let lhs = self.translate_expr(operands[0]);
        let rhs = self.translate_expr(operands[1]);
        ImlExpr::binary(op, lhs, rhs)
    }

    fn member_name(&self, expr: ExprId) -> String {
        match &self.ctx.expr(expr).kind {
            ExprKind::Member { id } => id.clone(),
            _ => String::new(),
        }
    }

    fn translate_ctor(&mut self, ctor: &Ctor) -> ImlExpr {
        match ctor {
            Ctor::Bool(b) => ImlExpr::Bool(*b),
            Ctor::Unsigned { value, width } => ImlExpr::UInt {
                value: *value,
                width: *width,
            },
            Ctor::Signed { value, width } => ImlExpr::SInt {
                value: *value,
                width: *width,
            },
            Ctor::Real(value) => ImlExpr::Real(*value),
            Ctor::String(s) => ImlExpr::Str(s.clone()),
            Ctor::Bytes(data) => ImlExpr::BytesLit(data.clone()),
            Ctor::RegExp(patterns) => {
                ImlExpr::call("sdlc_rt::regexp", patterns.iter().map(|p| ImlExpr::Str(p.clone())).collect())
            }
            Ctor::Null => ImlExpr::Null,
            Ctor::Error(message) => ImlExpr::call("error", vec![ImlExpr::Str(message.clone())]),
            Ctor::Address(a) => ImlExpr::Str(a.to_string()),
            Ctor::Port(p) => ImlExpr::Str(p.to_string()),
            Ctor::Enum { ty, label } => {
                let name = match self.ctx.ty(*ty) {
                    Ty::Enum(e) => format!("{}::{}", e.id, label),
                    _ => label.clone(),
                };
                ImlExpr::name(name)
            }
            Ctor::Tuple(elems) => {
                let elems = elems.iter().map(|&e| self.translate_expr(e)).collect();
                ImlExpr::Tuple(elems)
            }
            Ctor::List { elems, .. } | Ctor::Vector { elems, .. } | Ctor::Set { elems, .. } => {
                let elems = elems.iter().map(|&e| self.translate_expr(e)).collect();
                ImlExpr::call("vector", elems)
            }
            Ctor::Optional { value, .. } => match value {
                Some(value) => self.translate_expr(*value),
                None => ImlExpr::Null,
            },
            Ctor::Result { value, .. } => match value {
                Some(value) => self.translate_expr(*value),
                None => ImlExpr::Null,
            },
            Ctor::Map { entries, .. } => {
                let mut args = Vec::new();
                for &(k, v) in entries {
                    args.push(self.translate_expr(k));
                    args.push(self.translate_expr(v));
                }
                ImlExpr::call("map", args)
            }
            Ctor::Struct { fields, .. } => {
                let args = fields.iter().map(|&(_, v)| self.translate_expr(v)).collect();
                ImlExpr::call("struct", args)
            }
            Ctor::Bitfield { values, .. } => {
                let args = values
                    .iter()
                    .map(|(id, v)| ImlExpr::Tuple(vec![ImlExpr::Str(id.clone()), ImlExpr::uint(*v)]))
                    .collect();
                ImlExpr::call("bitfield", args)
            }
        }
    }

    pub(crate) fn translate_stmt(&mut self, stmt: StmtId, block: &mut ImlBlock) {
        let kind = self.ctx.stmt(stmt).kind.clone();
        match kind {
            crate::ast::stmt::StmtKind::Block(stmts) => {
                for s in stmts {
                    self.translate_stmt(s, block);
                }
            }
            crate::ast::stmt::StmtKind::Expression(e) => {
                if let ExprKind::Assign { target, source } = self.ctx.expr(e).kind {
                    let target = self.translate_expr(target);
                    let value = self.translate_expr(source);
                    block.push(ImlStmt::Assign { target, value });
                } else {
                    let e = self.translate_expr(e);
                    block.push(ImlStmt::Expr(e));
                }
            }
            crate::ast::stmt::StmtKind::Declaration(decl) => {
                let d = self.ctx.decl(decl).clone();
                if let DeclKind::LocalVariable { ty, init } = d.kind {
                    let init = init.map(|i| self.translate_expr(i));
                    block.push(ImlStmt::Local {
                        id: d.id,
                        ty: ty.map(|t| self.iml_type(t)),
                        init,
                    });
                }
            }
            crate::ast::stmt::StmtKind::If { init, cond, then, alt } => {
                if let Some(init) = init {
                    let d = self.ctx.decl(init).clone();
                    if let DeclKind::LocalVariable { ty, init: value } = d.kind {
                        let value = value.map(|i| self.translate_expr(i));
                        block.push(ImlStmt::Local {
                            id: d.id,
                            ty: ty.map(|t| self.iml_type(t)),
                            init: value,
                        });
                    }
                }
                let cond = self.translate_expr(cond);
                let mut then_block = ImlBlock::new();
                self.translate_stmt(then, &mut then_block);
                let alt_block = alt.map(|alt| {
                    let mut b = ImlBlock::new();
                    self.translate_stmt(alt, &mut b);
                    b
                });
                block.push(ImlStmt::If {
                    cond,
                    then: then_block,
                    alt: alt_block,
                });
            }
            crate::ast::stmt::StmtKind::While { cond, body } => {
                let cond = self.translate_expr(cond);
                let mut b = ImlBlock::new();
                self.translate_stmt(body, &mut b);
                block.push(ImlStmt::While { cond, body: b });
            }
            crate::ast::stmt::StmtKind::For { var, sequence, body } => {
                let id = self.ctx.decl(var).id.clone();
                let sequence = self.translate_expr(sequence);
                let mut b = ImlBlock::new();
                self.translate_stmt(body, &mut b);
                block.push(ImlStmt::For {
                    var: id,
                    sequence,
                    body: b,
                });
            }
            crate::ast::stmt::StmtKind::Switch { cond, cases } => {
                let scrut = self.fresh("switch");
                let cond = self.translate_expr(cond);
                block.push(ImlStmt::Local {
                    id: scrut.clone(),
                    ty: None,
                    init: Some(cond),
                });
                let mut chain: Option<ImlBlock> = None;
                for case in cases.iter().rev() {
                    let mut b = ImlBlock::new();
                    self.translate_stmt(case.body, &mut b);
                    if case.exprs.is_empty() {
                        chain = Some(b);
                        continue;
                    }
                    let mut cond: Option<ImlExpr> = None;
                    for &e in &case.exprs {
                        let test = ImlExpr::binary("==", ImlExpr::name(scrut.clone()), self.translate_expr(e));
                        cond = Some(match cond {
                            Some(prev) => ImlExpr::binary("||", prev, test),
                            None => test,
                        });
                    }
                    let mut wrapper = ImlBlock::new();
                    wrapper.push(ImlStmt::If {
                        cond: cond.expect("non-empty exprs"),
                        then: b,
                        alt: chain.take(),
                    });
                    chain = Some(wrapper);
                }
                if let Some(chain) = chain {
                    block.stmts.extend(chain.stmts);
                }
            }
            crate::ast::stmt::StmtKind::Try { body, catches } => {
                let mut b = ImlBlock::new();
                self.translate_stmt(body, &mut b);
                let mut iml_catches = Vec::new();
                for catch in catches {
                    let param = catch.param.map(|p| {
                        let d = self.ctx.decl(p).clone();
                        let ty = match d.kind {
                            DeclKind::Parameter { ty, .. } => self.iml_type(ty),
                            _ => ImlType::Error,
                        };
                        (d.id, ty)
                    });
                    let mut cb = ImlBlock::new();
                    self.translate_stmt(catch.body, &mut cb);
                    iml_catches.push(crate::iml::ImlCatch { param, body: cb });
                }
                block.push(ImlStmt::Try {
                    body: b,
                    catches: iml_catches,
                });
            }
            crate::ast::stmt::StmtKind::Throw(value) => {
                let message = value.map_or(ImlExpr::Str(String::new()), |v| self.translate_expr(v));
                block.push(ImlStmt::Throw {
                    kind: "ParseError".into(),
                    message,
                });
            }
            crate::ast::stmt::StmtKind::Return(value) => {
                let value = value.map(|v| self.translate_expr(v));
                block.push(ImlStmt::Return(value));
            }
            crate::ast::stmt::StmtKind::Break => block.push(ImlStmt::Break),
            crate::ast::stmt::StmtKind::Continue => block.push(ImlStmt::Continue),
            crate::ast::stmt::StmtKind::Assert { cond, message } => {
                let cond = self.translate_expr(cond);
                let message = message.map(|m| self.translate_expr(m));
                block.push(ImlStmt::Assert { cond, message });
            }
            crate::ast::stmt::StmtKind::Yield => block.push(ImlStmt::Yield),
        }
    }

    // ---------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------

    pub(crate) fn iml_type(&self, ty: TypeId) -> ImlType {
        let ty = self.ctx.resolve_type(ty);
        match self.ctx.ty(ty) {
            Ty::Void => ImlType::Void,
            Ty::Bool => ImlType::Bool,
            Ty::UnsignedInteger(w) => ImlType::UInt(*w),
            Ty::SignedInteger(w) => ImlType::SInt(*w),
            Ty::Real => ImlType::Real,
            Ty::Bytes => ImlType::Bytes,
            Ty::String => ImlType::String,
            Ty::Stream => ImlType::Stream,
            Ty::StreamView => ImlType::View,
            Ty::StreamIter => ImlType::Iterator,
            Ty::Error => ImlType::Error,
            Ty::Sink => ImlType::Sink,
            Ty::Vector(elem) => ImlType::Vector(Box::new(self.iml_type(*elem))),
            Ty::Optional(inner) => ImlType::Optional(Box::new(self.iml_type(*inner))),
            Ty::StrongReference(inner) | Ty::WeakReference(inner) | Ty::ValueReference(inner) => {
                ImlType::Ref(Box::new(self.iml_type(*inner)))
            }
            Ty::Tuple(elems) => ImlType::Tuple(elems.iter().map(|&e| self.iml_type(e)).collect()),
            Ty::Unit(u) => ImlType::Named(u.id.clone()),
            Ty::Enum(e) => ImlType::Named(e.id.clone()),
            Ty::Bitfield(bf) => ImlType::UInt(bf.width),
            _ => ImlType::Any,
        }
    }

    /// `sdlc_rt::wait_for_input(...)`; raises on frozen end-of-data. A
    /// connected filter chain is flushed first so producer output is
    /// visible.
    pub(crate) fn wait_for_input(&mut self, n: ImlExpr, message: &str, block: &mut ImlBlock) {
        block.push(ImlStmt::Expr(ImlExpr::call("sdlc_rt::filter_flush", vec![ImlExpr::name("self")])));
        block.push(ImlStmt::Expr(ImlExpr::call(
            "sdlc_rt::wait_for_input",
            vec![
                ImlExpr::name("data"),
                ImlExpr::name("cur"),
                n,
                ImlExpr::Str(message.to_owned()),
            ],
        )));
    }

    /// `sdlc_rt::wait_for_input_or_eod(...)` as an expression yielding a
    /// bool: `False` on frozen end-of-data.
    pub(crate) fn wait_or_eod_expr(&mut self, n: ImlExpr) -> ImlExpr {
        ImlExpr::call(
            "sdlc_rt::wait_for_input_or_eod",
            vec![ImlExpr::name("data"), ImlExpr::name("cur"), n],
        )
    }

    pub(crate) fn wait_for_eod(&mut self, block: &mut ImlBlock) {
        block.push(ImlStmt::Expr(ImlExpr::call("sdlc_rt::filter_flush", vec![ImlExpr::name("self")])));
        block.push(ImlStmt::Expr(ImlExpr::call(
            "sdlc_rt::wait_for_eod",
            vec![ImlExpr::name("data"), ImlExpr::name("cur")],
        )));
    }
}

/// Replaces `__dd` with the concrete value expression.
fn substitute_dd(expr: ImlExpr, value: &ImlExpr) -> ImlExpr {
    match expr {
        ImlExpr::Name(ref id) if id == "__dd" => value.clone(),
        ImlExpr::Member(object, id) => ImlExpr::Member(Box::new(substitute_dd(*object, value)), id),
        ImlExpr::Index(object, index) => ImlExpr::Index(
            Box::new(substitute_dd(*object, value)),
            Box::new(substitute_dd(*index, value)),
        ),
        ImlExpr::Call { id, args } => ImlExpr::Call {
            id,
            args: args.into_iter().map(|a| substitute_dd(a, value)).collect(),
        },
        ImlExpr::MethodCall { object, method, args } => ImlExpr::MethodCall {
            object: Box::new(substitute_dd(*object, value)),
            method,
            args: args.into_iter().map(|a| substitute_dd(a, value)).collect(),
        },
        ImlExpr::Binary { op, lhs, rhs } => ImlExpr::Binary {
            op,
            lhs: Box::new(substitute_dd(*lhs, value)),
            rhs: Box::new(substitute_dd(*rhs, value)),
        },
        ImlExpr::Unary { op, operand } => ImlExpr::Unary {
            op,
            operand: Box::new(substitute_dd(*operand, value)),
        },
        ImlExpr::Ternary { cond, then, alt } => ImlExpr::Ternary {
            cond: Box::new(substitute_dd(*cond, value)),
            then: Box::new(substitute_dd(*then, value)),
            alt: Box::new(substitute_dd(*alt, value)),
        },
        ImlExpr::Tuple(elems) => ImlExpr::Tuple(elems.into_iter().map(|e| substitute_dd(e, value)).collect()),
        ImlExpr::SizeOf(inner) => ImlExpr::SizeOf(Box::new(substitute_dd(*inner, value))),
        ImlExpr::Unpack { ty, args } => ImlExpr::Unpack {
            ty,
            args: args.into_iter().map(|a| substitute_dd(a, value)).collect(),
        },
        other => other,
    }
}
