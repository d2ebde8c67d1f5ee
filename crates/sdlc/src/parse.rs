//! The recursive-descent parser for SDL and IML source.
//!
//! Produces the surface AST inside the context: modules, declarations,
//! unit items, statements, and expressions. Top-level declarations are
//! registered as they are parsed so forward references resolve through the
//! declaration table. Fields whose type position holds a bare identifier
//! become `UnresolvedField` items; the resolver promotes them once the
//! identifier's meaning is known.

use std::path::Path;

use smallvec::smallvec;

use crate::{
    ast::{
        context::{AstContext, Dialect, Module, ModuleUid},
        decl::{DeclKind, Declaration, Function, Linkage},
        expr::{Ctor, Expr, ExprKind},
        node::{DeclId, ExprId, HookId, ItemId, Location, ModuleId, ScopeId, StmtId, TypeId},
        stmt::{Catch, Stmt, StmtKind, SwitchCase},
        types::{
            BitRange, BitfieldType, Constness, EnumType, FunctionFlavor, QualifiedType, StructType, Ty, UnitType,
        },
        unit::{
            Attribute, AttributeKind, AttributeSet, Hook, HookFlavor, PropertyKind, SpecialHook, UnitField, UnitItem,
            UnitSwitch, UnitSwitchCase,
        },
    },
    diagnostics::Diagnostic,
    lexer::{lex, Spanned, Token},
    operators::OperatorKind,
};

/// Maximum nesting depth for expressions and blocks; prevents stack
/// overflow on adversarial input.
const MAX_NESTING_DEPTH: u32 = 200;

/// Parses one source file into a module. Errors are reported through the
/// context's diagnostics; the module is registered even when errors were
/// found so follow-up phases can report more.
pub fn parse_module(ctx: &mut AstContext, source: &str, path: &Path, dialect: Dialect) -> Result<ModuleId, ()> {
    let path_str = path.display().to_string();
    let errors_before = error_count(ctx);
    let tokens = lex(source, &path_str, &mut ctx.diagnostics);

    let mut parser = Parser {
        ctx,
        tokens,
        pos: 0,
        depth: 0,
        scope: ScopeId::new(0),
    };
    let module = parser.module(path, dialect);
    let failed = error_count(parser.ctx) > errors_before;
    match module {
        Some(id) if !failed => Ok(id),
        _ => Err(()),
    }
}

fn error_count(ctx: &AstContext) -> usize {
    ctx.diagnostics
        .iter()
        .filter(|d| d.severity == crate::diagnostics::Severity::Error)
        .count()
}

struct Parser<'a> {
    ctx: &'a mut AstContext,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: u32,
    /// Innermost scope; declarations land here.
    scope: ScopeId,
}

impl Parser<'_> {
    // -------------------------------------------------------------------
    // Token plumbing
    // -------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn here(&self) -> Location {
        self.tokens[self.pos.min(self.tokens.len() - 1)].location.clone()
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.bump();
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if let Token::Ident(id) = self.peek() {
            if id == word {
                self.bump();
                return true;
            }
        }
        false
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(id) if id == word)
    }

    fn expect(&mut self, token: &Token, what: &str) -> bool {
        if self.eat(token) {
            return true;
        }
        let location = self.here();
        let found = self.peek().clone();
        self.error(format!("expected {what}, found {found}"), location);
        false
    }

    fn expect_ident(&mut self, what: &str) -> Option<String> {
        match self.peek().clone() {
            Token::Ident(id) => {
                self.bump();
                Some(id)
            }
            found => {
                let location = self.here();
                self.error(format!("expected {what}, found {found}"), location);
                None
            }
        }
    }

    fn error(&mut self, message: String, location: Location) {
        self.ctx.diagnostics.push(Diagnostic::error(message, location));
    }

    /// Skips ahead to the next `;` (or closing brace) to resume after a
    /// syntax error.
    fn synchronize(&mut self) {
        loop {
            match self.peek() {
                Token::Semicolon => {
                    self.bump();
                    return;
                }
                Token::RBrace | Token::Eof => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn with_depth<T>(&mut self, f: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            let location = self.here();
            self.error("input too deeply nested".into(), location);
            return None;
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // -------------------------------------------------------------------
    // Module structure
    // -------------------------------------------------------------------

    fn module(&mut self, path: &Path, dialect: Dialect) -> Option<ModuleId> {
        let location = self.here();
        if !self.eat_keyword("module") {
            self.error("expected 'module'".into(), location.clone());
            return None;
        }
        let id = self.expect_ident("module name")?;
        self.expect(&Token::Semicolon, "';'");

        let root = self.ctx.root_scope();
        let scope = self.ctx.new_scope(Some(root));
        self.scope = scope;

        let uid = ModuleUid::new(&id, path);
        let module_id = self.ctx.add_module(Module {
            id: id.clone(),
            uid,
            path: path.to_path_buf(),
            scope_tag: None,
            dialect,
            decls: Vec::new(),
            hooks: Vec::new(),
            properties: Vec::new(),
            scope,
            dependencies: Vec::new(),
            normalized: false,
            location,
        });

        while !matches!(self.peek(), Token::Eof) {
            self.top_level(module_id);
        }
        Some(module_id)
    }

    fn top_level(&mut self, module: ModuleId) {
        let location = self.here();
        match self.peek().clone() {
            Token::Property(name) => {
                self.bump();
                let value = if self.eat(&Token::Assign) {
                    self.expression()
                } else {
                    None
                };
                self.expect(&Token::Semicolon, "';'");
                match name.parse::<PropertyKind>() {
                    Ok(kind) => self.ctx.module_mut(module).properties.push((kind, value)),
                    Err(_) => self.error(format!("unknown property {name}"), location),
                }
            }
            Token::Ident(word) => match word.as_str() {
                "import" => self.import_decl(module),
                "on" => {
                    if let Some(hook) = self.hook_decl() {
                        self.ctx.module_mut(module).hooks.push(hook);
                    }
                }
                "public" | "private" | "export" => {
                    self.bump();
                    let linkage = match word.as_str() {
                        "public" => Linkage::Public,
                        "export" => Linkage::Export,
                        _ => Linkage::Private,
                    };
                    self.declaration(module, linkage);
                }
                "const" | "global" | "function" | "type" => self.declaration(module, Linkage::Private),
                other => {
                    self.error(format!("unexpected '{other}' at module level"), location);
                    self.synchronize();
                }
            },
            other => {
                self.error(format!("unexpected {other} at module level"), location);
                self.synchronize();
            }
        }
    }

    fn import_decl(&mut self, module: ModuleId) {
        let location = self.here();
        self.bump(); // import
        let Some(id) = self.expect_ident("module name") else {
            self.synchronize();
            return;
        };
        let search_scope = if self.eat_keyword("from") { self.expect_ident("search scope") } else { None };
        self.expect(&Token::Semicolon, "';'");
        let decl = self.ctx.new_decl(Declaration::new(
            id.clone(),
            DeclKind::ImportedModule {
                module: None,
                search_scope,
            },
            Linkage::Private,
            location,
        ));
        let index = self.ctx.register_declaration(decl);
        self.ctx.scope_mut(self.scope).insert(id, index);
        self.ctx.module_mut(module).decls.push(decl);
    }

    fn declaration(&mut self, module: ModuleId, linkage: Linkage) {
        let Some(decl) = self.declaration_inner(linkage) else {
            self.synchronize();
            return;
        };
        let id = self.ctx.decl(decl).id.clone();
        let index = self.ctx.register_declaration(decl);
        self.ctx.scope_mut(self.scope).insert(id, index);
        self.ctx.module_mut(module).decls.push(decl);
    }

    fn declaration_inner(&mut self, linkage: Linkage) -> Option<DeclId> {
        let location = self.here();
        match self.peek().clone() {
            Token::Ident(word) => match word.as_str() {
                "const" => {
                    self.bump();
                    let id = self.expect_ident("constant name")?;
                    let ty = self.eat(&Token::Colon).then(|| self.type_ref()).flatten();
                    self.expect(&Token::Assign, "'='");
                    let value = self.expression()?;
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_decl(Declaration::new(
                        id,
                        DeclKind::Constant { ty, value },
                        linkage,
                        location,
                    )))
                }
                "global" => {
                    self.bump();
                    let id = self.expect_ident("global name")?;
                    let ty = self.eat(&Token::Colon).then(|| self.type_ref()).flatten();
                    let init = self.eat(&Token::Assign).then(|| self.expression()).flatten();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_decl(Declaration::new(
                        id,
                        DeclKind::GlobalVariable { ty, init },
                        linkage,
                        location,
                    )))
                }
                "function" => self.function_decl(linkage, location),
                "type" => self.type_decl(linkage, location),
                other => {
                    self.error(format!("unexpected '{other}'"), location);
                    None
                }
            },
            other => {
                self.error(format!("unexpected {other}"), location);
                None
            }
        }
    }

    fn function_decl(&mut self, linkage: Linkage, location: Location) -> Option<DeclId> {
        self.bump(); // function
        let id = self.expect_ident("function name")?;
        self.expect(&Token::LParen, "'('");
        let params = self.parameters();
        let result = if self.eat(&Token::Colon) {
            self.type_ref().unwrap_or(self.ctx.standard().void)
        } else {
            self.ctx.standard().void
        };

        let mut attributes = AttributeSet::new();
        self.attributes(&mut attributes);

        let scope = self.ctx.new_scope(Some(self.scope));
        for &param in &params {
            let pid = self.ctx.decl(param).id.clone();
            let index = self.ctx.register_declaration(param);
            self.ctx.scope_mut(scope).insert(pid, index);
        }

        let body = if self.eat(&Token::Semicolon) {
            None
        } else {
            let saved = self.scope;
            self.scope = scope;
            let body = self.block();
            self.scope = saved;
            body
        };

        let mut decl = Declaration::new(
            id,
            DeclKind::Function(Function {
                flavor: FunctionFlavor::Plain,
                params,
                result,
                result_constness: Constness::Const,
                body,
            }),
            linkage,
            location,
        );
        decl.attributes = attributes;
        decl.scope = Some(scope);
        Some(self.ctx.new_decl(decl))
    }

    fn parameters(&mut self) -> Vec<DeclId> {
        let mut params = Vec::new();
        while !matches!(self.peek(), Token::RParen | Token::Eof) {
            let location = self.here();
            let inout = self.eat_keyword("inout");
            let Some(id) = self.expect_ident("parameter name") else { break };
            self.expect(&Token::Colon, "':'");
            let ty = self.type_ref().unwrap_or(self.ctx.standard().unknown);
            let default = self.eat(&Token::Assign).then(|| self.expression()).flatten();
            params.push(self.ctx.new_decl(Declaration::new(
                id,
                DeclKind::Parameter { ty, inout, default },
                Linkage::Private,
                location,
            )));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'");
        params
    }

    fn type_decl(&mut self, linkage: Linkage, location: Location) -> Option<DeclId> {
        self.bump(); // type
        let id = self.expect_ident("type name")?;
        self.expect(&Token::Assign, "'='");
        let (ty, scope) = self.type_definition(&id)?;
        self.eat(&Token::Semicolon);
        self.ctx.register_type(ty);
        let mut decl = Declaration::new(id, DeclKind::Type { ty }, linkage, location);
        decl.scope = scope;
        let decl = self.ctx.new_decl(decl);
        let index = self.ctx.register_declaration(decl);
        self.ctx.type_node_mut(ty).declaration = index;
        Some(decl)
    }

    /// A type definition on the right-hand side of `type X = …`: unit,
    /// struct, enum, bitfield, or a plain type reference.
    fn type_definition(&mut self, name: &str) -> Option<(TypeId, Option<ScopeId>)> {
        let location = self.here();
        if self.at_keyword("unit") {
            self.bump();
            let params = if self.eat(&Token::LParen) { self.parameters() } else { Vec::new() };
            let items = self.unit_items()?;
            let mut unit = UnitType::new(name);
            unit.params = params;
            unit.items = items;
            let ty = self.ctx.new_type(Ty::Unit(unit), location);
            return Some((ty, None));
        }
        if self.at_keyword("struct") {
            self.bump();
            let fields = self.struct_fields()?;
            let ty = self.ctx.new_type(
                Ty::Struct(StructType {
                    fields,
                    params: Vec::new(),
                }),
                location,
            );
            return Some((ty, None));
        }
        if self.at_keyword("enum") {
            self.bump();
            return self.enum_definition(name, location).map(|(ty, scope)| (ty, Some(scope)));
        }
        if self.at_keyword("bitfield") {
            self.bump();
            return self.bitfield_definition(location).map(|ty| (ty, None));
        }
        self.type_ref().map(|ty| (ty, None))
    }

    fn struct_fields(&mut self) -> Option<Vec<DeclId>> {
        self.expect(&Token::LBrace, "'{'");
        let mut fields = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            let location = self.here();
            let Some(id) = self.expect_ident("field name") else {
                self.synchronize();
                continue;
            };
            self.expect(&Token::Colon, "':'");
            let ty = self.type_ref().unwrap_or(self.ctx.standard().unknown);
            let default = self.eat(&Token::Assign).then(|| self.expression()).flatten();
            let mut decl = Declaration::new(id, DeclKind::Field { ty, default }, Linkage::Private, location);
            let mut attributes = AttributeSet::new();
            self.attributes(&mut attributes);
            decl.attributes = attributes;
            fields.push(self.ctx.new_decl(decl));
            self.expect(&Token::Semicolon, "';'");
        }
        self.expect(&Token::RBrace, "'}'");
        Some(fields)
    }

    fn enum_definition(&mut self, name: &str, location: Location) -> Option<(TypeId, ScopeId)> {
        self.expect(&Token::LBrace, "'{'");
        let mut labels = Vec::new();
        let mut next = 0_i64;
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            let Some(label) = self.expect_ident("enum label") else {
                self.synchronize();
                continue;
            };
            let value = if self.eat(&Token::Assign) {
                match self.peek().clone() {
                    Token::Int(v) => {
                        self.bump();
                        i64::try_from(v).unwrap_or(i64::MAX)
                    }
                    other => {
                        let location = self.here();
                        self.error(format!("expected integer label value, found {other}"), location);
                        next
                    }
                }
            } else {
                next
            };
            next = value + 1;
            labels.push((label, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}'");

        let ty = self.ctx.new_type(
            Ty::Enum(EnumType {
                id: name.to_owned(),
                labels: labels.clone(),
            }),
            location.clone(),
        );
        // Labels resolve through the type declaration's scope.
        let scope = self.ctx.new_scope(None);
        for (label, _) in &labels {
            let value = self.ctx.new_expr(Expr::new(
                ExprKind::Ctor(Ctor::Enum {
                    ty,
                    label: label.clone(),
                }),
                QualifiedType::const_rhs(ty),
                location.clone(),
            ));
            let decl = self.ctx.new_decl(Declaration::new(
                label.clone(),
                DeclKind::Constant { ty: Some(ty), value },
                Linkage::Public,
                location.clone(),
            ));
            let index = self.ctx.register_declaration(decl);
            self.ctx.scope_mut(scope).insert(label.clone(), index);
        }
        Some((ty, scope))
    }

    fn bitfield_definition(&mut self, location: Location) -> Option<TypeId> {
        self.expect(&Token::LParen, "'('");
        let width = match self.peek().clone() {
            Token::Int(w) => {
                self.bump();
                u16::try_from(w).unwrap_or(0)
            }
            other => {
                let loc = self.here();
                self.error(format!("expected bitfield width, found {other}"), loc);
                0
            }
        };
        self.expect(&Token::RParen, "')'");
        self.expect(&Token::LBrace, "'{'");
        let mut bits = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            let Some(id) = self.expect_ident("bit range name") else {
                self.synchronize();
                continue;
            };
            self.expect(&Token::Colon, "':'");
            let lower = match self.bump() {
                Token::Int(v) => u16::try_from(v).unwrap_or(0),
                other => {
                    let loc = self.here();
                    self.error(format!("expected bit number, found {other}"), loc);
                    0
                }
            };
            let upper = if self.eat(&Token::Dot) && self.eat(&Token::Dot) {
                match self.bump() {
                    Token::Int(v) => u16::try_from(v).unwrap_or(lower),
                    _ => lower,
                }
            } else {
                lower
            };
            let expected = self.eat(&Token::Assign).then(|| self.expression()).flatten();
            bits.push(BitRange {
                id,
                lower,
                upper,
                expected,
            });
            self.expect(&Token::Semicolon, "';'");
        }
        self.expect(&Token::RBrace, "'}'");
        Some(self.ctx.new_type(Ty::Bitfield(BitfieldType { width, bits }), location))
    }

    // -------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------

    /// `on Unit::field { … }`, `on Unit::%done { … }`, `on %init { … }`.
    fn hook_decl(&mut self) -> Option<HookId> {
        let location = self.here();
        self.bump(); // on
        let mut path = Vec::new();
        let mut special = None;
        loop {
            match self.peek().clone() {
                Token::Ident(id) => {
                    self.bump();
                    path.push(id);
                    if !self.eat(&Token::ColonColon) {
                        break;
                    }
                }
                Token::Property(name) => {
                    self.bump();
                    match name.parse::<SpecialHook>() {
                        Ok(s) => special = Some(s),
                        Err(_) => {
                            self.error(format!("unknown hook {name}"), location.clone());
                        }
                    }
                    break;
                }
                other => {
                    let loc = self.here();
                    self.error(format!("expected hook target, found {other}"), loc);
                    return None;
                }
            }
        }
        let params = if self.eat(&Token::LParen) { self.parameters() } else { Vec::new() };
        let flavor = if self.eat_keyword("foreach") {
            HookFlavor::Foreach
        } else {
            HookFlavor::Standard
        };
        let body = self.block()?;
        Some(self.ctx.new_hook(Hook {
            flavor,
            path,
            unit: crate::ast::node::TypeIndex::NONE,
            field: None,
            special,
            params,
            body,
            dd_type: None,
            result: None,
            scope: None,
            location,
        }))
    }

    // -------------------------------------------------------------------
    // Unit items
    // -------------------------------------------------------------------

    fn unit_items(&mut self) -> Option<Vec<ItemId>> {
        self.expect(&Token::LBrace, "'{'");
        let mut items = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            match self.unit_item() {
                Some(item) => items.push(item),
                None => self.synchronize(),
            }
        }
        self.expect(&Token::RBrace, "'}'");
        Some(items)
    }

    fn unit_item(&mut self) -> Option<ItemId> {
        let location = self.here();
        match self.peek().clone() {
            Token::Property(name) => {
                self.bump();
                if matches!(self.peek(), Token::LBrace) {
                    // `%init { ... }` is a special hook in item position.
                    let special = name.parse::<SpecialHook>().ok();
                    if special.is_none() {
                        self.error(format!("unknown hook {name}"), location.clone());
                    }
                    let body = self.block()?;
                    let hook = self.ctx.new_hook(Hook {
                        flavor: HookFlavor::Standard,
                        path: Vec::new(),
                        unit: crate::ast::node::TypeIndex::NONE,
                        field: None,
                        special,
                        params: Vec::new(),
                        body,
                        dd_type: None,
                        result: None,
                        scope: None,
                        location: location.clone(),
                    });
                    return Some(self.ctx.new_item(UnitItem::UnitHook { hook, location }));
                }
                let value = if self.eat(&Token::Assign) {
                    self.expression()
                } else if matches!(self.peek(), Token::Ident(_)) && name == "%context" {
                    // `%context = T` is the usual form; a bare type is
                    // tolerated for compatibility.
                    self.type_ref().map(|ty| {
                        self.ctx.new_expr(Expr::new(
                            ExprKind::TypeExpr(ty),
                            QualifiedType::const_rhs(ty),
                            location.clone(),
                        ))
                    })
                } else {
                    None
                };
                self.expect(&Token::Semicolon, "';'");
                match name.parse::<PropertyKind>() {
                    Ok(kind) => Some(self.ctx.new_item(UnitItem::Property { kind, value, location })),
                    Err(_) => {
                        self.error(format!("unknown property {name}"), location);
                        None
                    }
                }
            }
            Token::Ident(word) if word == "on" => {
                let hook = self.hook_decl()?;
                Some(self.ctx.new_item(UnitItem::UnitHook { hook, location }))
            }
            Token::Ident(word) if word == "sink" => {
                self.bump();
                let id = self.expect_ident("sink name")?;
                self.expect(&Token::Semicolon, "';'");
                Some(self.ctx.new_item(UnitItem::Sink { id, location }))
            }
            Token::Ident(word) if word == "var" => {
                self.bump();
                let id = self.expect_ident("variable name")?;
                self.expect(&Token::Colon, "':'");
                let ty = self.type_ref().unwrap_or(self.ctx.standard().unknown);
                let default = self.eat(&Token::Assign).then(|| self.expression()).flatten();
                let mut attributes = AttributeSet::new();
                self.attributes(&mut attributes);
                self.expect(&Token::Semicolon, "';'");
                Some(self.ctx.new_item(UnitItem::Variable {
                    id,
                    ty,
                    default,
                    attributes,
                    location,
                }))
            }
            Token::Ident(word) if word == "switch" => self.unit_switch(location),
            Token::Ident(_) if matches!(self.peek_at(1), Token::Colon) => {
                let id = self.expect_ident("field name")?;
                self.bump(); // ':'
                self.field_item(Some(id), location)
            }
            Token::Colon => {
                self.bump();
                self.field_item(None, location)
            }
            other => {
                self.error(format!("unexpected {other} in unit"), location);
                None
            }
        }
    }

    fn unit_switch(&mut self, location: Location) -> Option<ItemId> {
        self.bump(); // switch
        let cond = if self.eat(&Token::LParen) {
            let cond = self.expression();
            self.expect(&Token::RParen, "')'");
            cond
        } else {
            None
        };
        self.expect(&Token::LBrace, "'{'");
        let mut cases = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            let case_location = self.here();
            let mut exprs = Vec::new();
            if self.eat(&Token::Star) {
                // default case
            } else {
                loop {
                    if let Some(e) = self.expression() {
                        exprs.push(e);
                    }
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(&Token::Arrow, "'->'");
            let mut items = Vec::new();
            if self.eat(&Token::LBrace) {
                while !matches!(self.peek(), Token::RBrace | Token::Eof) {
                    match self.unit_item() {
                        Some(item) => items.push(item),
                        None => self.synchronize(),
                    }
                }
                self.expect(&Token::RBrace, "'}'");
            } else if let Some(item) = self.unit_item() {
                items.push(item);
            }
            cases.push(UnitSwitchCase {
                exprs,
                items,
                location: case_location,
            });
        }
        self.expect(&Token::RBrace, "'}'");
        let mut attributes = AttributeSet::new();
        self.attributes(&mut attributes);
        let condition = if self.eat_keyword("if") {
            self.expect(&Token::LParen, "'('");
            let cond = self.expression();
            self.expect(&Token::RParen, "')'");
            cond
        } else {
            None
        };
        self.eat(&Token::Semicolon);
        Some(self.ctx.new_item(UnitItem::Switch(UnitSwitch {
            cond,
            cases,
            condition,
            location,
        })))
    }

    /// A field item, after the `name:` / anonymous `:` prefix.
    fn field_item(&mut self, id: Option<String>, location: Location) -> Option<ItemId> {
        let is_skip = self.eat_keyword("skip");

        // The field's type position.
        enum FieldStart {
            Ctor(ExprId),
            Type(TypeId),
            Unresolved(String),
        }

        let start = match self.peek().clone() {
            Token::Regex(pattern) => {
                self.bump();
                let e = self.ctx.new_expr(Expr::new(
                    ExprKind::Ctor(Ctor::RegExp(vec![pattern])),
                    QualifiedType::const_rhs(self.ctx.standard().regexp),
                    location.clone(),
                ));
                FieldStart::Ctor(e)
            }
            Token::BytesLit(data) => {
                self.bump();
                let e = self.ctx.new_expr(Expr::new(
                    ExprKind::Ctor(Ctor::Bytes(data)),
                    QualifiedType::const_rhs(self.ctx.standard().bytes),
                    location.clone(),
                ));
                FieldStart::Ctor(e)
            }
            Token::Ident(word) if word == "bitfield" && matches!(self.peek_at(1), Token::LParen) => {
                self.bump();
                let ty = self.bitfield_definition(location.clone())?;
                FieldStart::Type(ty)
            }
            Token::Ident(word) => {
                if let Some(ty) = self.try_builtin_type(&word) {
                    self.bump();
                    // `uint8(0x16)` parses as a constant field.
                    if self.eat(&Token::LParen) {
                        let value = self.expression();
                        self.expect(&Token::RParen, "')'");
                        match value {
                            Some(value) => {
                                let type_expr = self.ctx.new_expr(Expr::new(
                                    ExprKind::TypeExpr(ty),
                                    QualifiedType::const_rhs(ty),
                                    location.clone(),
                                ));
                                let e = self.ctx.new_expr(Expr::new(
                                    ExprKind::UnresolvedOperator {
                                        op: OperatorKind::Cast,
                                        operands: smallvec![value, type_expr],
                                    },
                                    QualifiedType::const_rhs(ty),
                                    location.clone(),
                                ));
                                FieldStart::Ctor(e)
                            }
                            None => FieldStart::Type(ty),
                        }
                    } else {
                        FieldStart::Type(ty)
                    }
                } else if let Some(ty) = self.try_generic_type(&word) {
                    FieldStart::Type(ty)
                } else {
                    // A user-defined type or constant; the resolver decides.
                    let mut path = self.expect_ident("type name")?;
                    while self.eat(&Token::ColonColon) {
                        let next = self.expect_ident("name")?;
                        path.push_str("::");
                        path.push_str(&next);
                    }
                    FieldStart::Unresolved(path)
                }
            }
            other => {
                self.error(format!("expected field type, found {other}"), location.clone());
                return None;
            }
        };

        // Repeat specification.
        let mut is_container = false;
        let mut repeat = None;
        if self.eat(&Token::LBracket) {
            is_container = true;
            if !matches!(self.peek(), Token::RBracket) {
                repeat = self.expression();
            }
            self.expect(&Token::RBracket, "']'");
        }

        let mut attributes = AttributeSet::new();
        self.attributes(&mut attributes);

        // Sink forwarding.
        let mut sinks = Vec::new();
        while self.eat(&Token::Arrow) {
            if let Some(sink) = self.expression() {
                sinks.push(sink);
            }
        }

        // Guard condition.
        let condition = if self.eat_keyword("if") {
            self.expect(&Token::LParen, "'('");
            let cond = self.expression();
            self.expect(&Token::RParen, "')'");
            cond
        } else {
            None
        };

        // Inline hooks.
        let mut hooks = Vec::new();
        loop {
            let flavor = if self.eat_keyword("foreach") {
                HookFlavor::Foreach
            } else if matches!(self.peek(), Token::LBrace) {
                HookFlavor::Standard
            } else {
                break;
            };
            let Some(body) = self.block() else { break };
            hooks.push(self.ctx.new_hook(Hook {
                flavor,
                path: Vec::new(),
                unit: crate::ast::node::TypeIndex::NONE,
                field: None,
                special: None,
                params: Vec::new(),
                body,
                dd_type: None,
                result: None,
                scope: None,
                location: location.clone(),
            }));
        }

        self.expect(&Token::Semicolon, "';'");

        let item = match start {
            FieldStart::Unresolved(referenced) => UnitItem::UnresolvedField {
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
            },
            FieldStart::Ctor(ctor) => UnitItem::Field(UnitField {
                id,
                original_ty: None,
                ctor: Some(ctor),
                parse_ty: None,
                item_ty: None,
                dd_ty: None,
                repeat,
                is_container,
                is_skip,
                is_transient: false,
                attributes,
                condition,
                sinks,
                hooks,
                inner: None,
                location,
            }),
            FieldStart::Type(ty) => UnitItem::Field(UnitField {
                id,
                original_ty: Some(ty),
                ctor: None,
                parse_ty: None,
                item_ty: None,
                dd_ty: None,
                repeat,
                is_container,
                is_skip,
                is_transient: false,
                attributes,
                condition,
                sinks,
                hooks,
                inner: None,
                location,
            }),
        };
        Some(self.ctx.new_item(item))
    }

    fn attributes(&mut self, attributes: &mut AttributeSet) {
        while let Token::Attribute(name) = self.peek().clone() {
            let location = self.here();
            self.bump();
            let value = self.eat(&Token::Assign).then(|| self.expression()).flatten();
            match name.parse::<AttributeKind>() {
                Ok(kind) => attributes.add(Attribute { kind, value, location }),
                Err(_) => self.error(format!("unknown attribute {name}"), location),
            }
        }
    }

    // -------------------------------------------------------------------
    // Types
    // -------------------------------------------------------------------

    fn try_builtin_type(&mut self, word: &str) -> Option<TypeId> {
        let std = self.ctx.standard();
        let ty = match word {
            "bool" => std.bool_,
            "real" => std.real,
            "string" => std.string,
            "bytes" => std.bytes,
            "stream" => std.stream,
            "view" => std.view,
            "iterator" => std.iter,
            "regexp" => std.regexp,
            "addr" => std.address,
            "port" => std.port,
            "interval" => std.interval,
            "time" => std.time,
            "void" => std.void,
            "any" => std.any,
            "error" => std.error,
            "sink" => std.sink,
            "uint8" => std.uint8,
            "uint16" => std.uint16,
            "uint32" => std.uint32,
            "uint64" => std.uint64,
            "int8" => std.int8,
            "int16" => std.int16,
            "int32" => std.int32,
            "int64" => std.int64,
            _ => return None,
        };
        Some(ty)
    }

    /// Generic type forms: `vector<T>`, `optional<T>`, `map<K, V>`, ….
    /// Consumes tokens only when `word` names one.
    fn try_generic_type(&mut self, word: &str) -> Option<TypeId> {
        let kind = match word {
            "optional" | "result" | "vector" | "list" | "set" | "map" | "tuple" | "strong_ref" | "weak_ref"
            | "value_ref" => word,
            _ => return None,
        };
        let location = self.here();
        self.bump();
        self.expect(&Token::Lt, "'<'");
        let first = self.type_ref()?;
        let ty = match kind {
            "map" => {
                self.expect(&Token::Comma, "','");
                let value = self.type_ref()?;
                self.ctx.new_type(Ty::Map(first, value), location)
            }
            "tuple" => {
                let mut elems = vec![first];
                while self.eat(&Token::Comma) {
                    elems.push(self.type_ref()?);
                }
                self.ctx.new_type(Ty::Tuple(elems), location)
            }
            "optional" => self.ctx.new_type(Ty::Optional(first), location),
            "result" => self.ctx.new_type(Ty::Result(first), location),
            "vector" => self.ctx.new_type(Ty::Vector(first), location),
            "list" => self.ctx.new_type(Ty::List(first), location),
            "set" => self.ctx.new_type(Ty::Set(first), location),
            "strong_ref" => self.ctx.new_type(Ty::StrongReference(first), location),
            "weak_ref" => self.ctx.new_type(Ty::WeakReference(first), location),
            _ => self.ctx.new_type(Ty::ValueReference(first), location),
        };
        self.expect(&Token::Gt, "'>'");
        Some(ty)
    }

    fn type_ref(&mut self) -> Option<TypeId> {
        let location = self.here();
        match self.peek().clone() {
            Token::Ident(word) => {
                if let Some(ty) = self.try_builtin_type(&word) {
                    self.bump();
                    return Some(ty);
                }
                if let Some(ty) = self.try_generic_type(&word) {
                    return Some(ty);
                }
                self.bump();
                let mut path = word;
                while self.eat(&Token::ColonColon) {
                    let next = self.expect_ident("name")?;
                    path.push_str("::");
                    path.push_str(&next);
                }
                Some(self.ctx.new_type(
                    Ty::Name {
                        id: path,
                        resolved: crate::ast::node::TypeIndex::NONE,
                    },
                    location,
                ))
            }
            other => {
                self.error(format!("expected type, found {other}"), location);
                None
            }
        }
    }

    // -------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------

    fn block(&mut self) -> Option<StmtId> {
        let location = self.here();
        self.with_depth(|p| {
            p.expect(&Token::LBrace, "'{'");
            let scope = p.ctx.new_scope(Some(p.scope));
            let saved = p.scope;
            p.scope = scope;
            let mut stmts = Vec::new();
            while !matches!(p.peek(), Token::RBrace | Token::Eof) {
                match p.statement() {
                    Some(stmt) => stmts.push(stmt),
                    None => p.synchronize(),
                }
            }
            p.expect(&Token::RBrace, "'}'");
            p.scope = saved;
            let mut stmt = Stmt::new(StmtKind::Block(stmts), location);
            stmt.scope = Some(scope);
            Some(p.ctx.new_stmt(stmt))
        })
    }

    fn statement(&mut self) -> Option<StmtId> {
        let location = self.here();
        match self.peek().clone() {
            Token::LBrace => self.block(),
            Token::Ident(word) => match word.as_str() {
                "local" => {
                    self.bump();
                    let id = self.expect_ident("local name")?;
                    let ty = self.eat(&Token::Colon).then(|| self.type_ref()).flatten();
                    let init = self.eat(&Token::Assign).then(|| self.expression()).flatten();
                    self.expect(&Token::Semicolon, "';'");
                    let decl = self.ctx.new_decl(Declaration::new(
                        id.clone(),
                        DeclKind::LocalVariable { ty, init },
                        Linkage::Private,
                        location.clone(),
                    ));
                    let index = self.ctx.register_declaration(decl);
                    self.ctx.scope_mut(self.scope).insert(id, index);
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Declaration(decl), location)))
                }
                "if" => {
                    self.bump();
                    self.expect(&Token::LParen, "'('");
                    let cond = self.expression()?;
                    self.expect(&Token::RParen, "')'");
                    let then = self.statement()?;
                    let alt = self.eat_keyword("else").then(|| self.statement()).flatten();
                    Some(self.ctx.new_stmt(Stmt::new(
                        StmtKind::If {
                            init: None,
                            cond,
                            then,
                            alt,
                        },
                        location,
                    )))
                }
                "while" => {
                    self.bump();
                    self.expect(&Token::LParen, "'('");
                    let cond = self.expression()?;
                    self.expect(&Token::RParen, "')'");
                    let body = self.statement()?;
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::While { cond, body }, location)))
                }
                "for" => {
                    self.bump();
                    self.expect(&Token::LParen, "'('");
                    let id = self.expect_ident("loop variable")?;
                    if !self.eat_keyword("in") {
                        let loc = self.here();
                        self.error("expected 'in'".into(), loc);
                    }
                    let sequence = self.expression()?;
                    self.expect(&Token::RParen, "')'");
                    let scope = self.ctx.new_scope(Some(self.scope));
                    let var = self.ctx.new_decl(Declaration::new(
                        id.clone(),
                        DeclKind::LocalVariable { ty: None, init: None },
                        Linkage::Private,
                        location.clone(),
                    ));
                    let index = self.ctx.register_declaration(var);
                    self.ctx.scope_mut(scope).insert(id, index);
                    let saved = self.scope;
                    self.scope = scope;
                    let body = self.statement()?;
                    self.scope = saved;
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::For { var, sequence, body }, location)))
                }
                "switch" => {
                    self.bump();
                    self.expect(&Token::LParen, "'('");
                    let cond = self.expression()?;
                    self.expect(&Token::RParen, "')'");
                    self.expect(&Token::LBrace, "'{'");
                    let mut cases = Vec::new();
                    while !matches!(self.peek(), Token::RBrace | Token::Eof) {
                        let mut exprs = Vec::new();
                        if self.eat_keyword("case") {
                            loop {
                                if let Some(e) = self.expression() {
                                    exprs.push(e);
                                }
                                if !self.eat(&Token::Comma) {
                                    break;
                                }
                            }
                        } else if self.eat_keyword("default") {
                            // empty expression list marks the default
                        } else {
                            let loc = self.here();
                            self.error("expected 'case' or 'default'".into(), loc);
                            self.synchronize();
                            continue;
                        }
                        self.expect(&Token::Colon, "':'");
                        let body = self.statement()?;
                        cases.push(SwitchCase { exprs, body });
                    }
                    self.expect(&Token::RBrace, "'}'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Switch { cond, cases }, location)))
                }
                "try" => {
                    self.bump();
                    let body = self.block()?;
                    let mut catches = Vec::new();
                    while self.eat_keyword("catch") {
                        let param = if self.eat(&Token::LParen) {
                            let loc = self.here();
                            let id = self.expect_ident("catch parameter")?;
                            self.expect(&Token::Colon, "':'");
                            let ty = self.type_ref().unwrap_or(self.ctx.standard().error);
                            self.expect(&Token::RParen, "')'");
                            let decl = self.ctx.new_decl(Declaration::new(
                                id.clone(),
                                DeclKind::Parameter {
                                    ty,
                                    inout: false,
                                    default: None,
                                },
                                Linkage::Private,
                                loc,
                            ));
                            let index = self.ctx.register_declaration(decl);
                            let scope = self.ctx.new_scope(Some(self.scope));
                            self.ctx.scope_mut(scope).insert(id, index);
                            Some(decl)
                        } else {
                            None
                        };
                        let body = self.block()?;
                        catches.push(Catch { param, body });
                    }
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Try { body, catches }, location)))
                }
                "throw" => {
                    self.bump();
                    let value = (!matches!(self.peek(), Token::Semicolon)).then(|| self.expression()).flatten();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Throw(value), location)))
                }
                "return" => {
                    self.bump();
                    let value = (!matches!(self.peek(), Token::Semicolon)).then(|| self.expression()).flatten();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Return(value), location)))
                }
                "break" => {
                    self.bump();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Break, location)))
                }
                "continue" => {
                    self.bump();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Continue, location)))
                }
                "assert" => {
                    self.bump();
                    let cond = self.expression()?;
                    let message = self.eat(&Token::Colon).then(|| self.expression()).flatten();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Assert { cond, message }, location)))
                }
                "yield" => {
                    self.bump();
                    self.expect(&Token::Semicolon, "';'");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Yield, location)))
                }
                "delete" => {
                    self.bump();
                    let target = self.expression()?;
                    self.expect(&Token::Semicolon, "';'");
                    let deleted = self.reshape_to(target, OperatorKind::Delete, "delete needs an indexed element");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Expression(deleted), location)))
                }
                "unset" => {
                    self.bump();
                    let target = self.expression()?;
                    self.expect(&Token::Semicolon, "';'");
                    let unset = self.reshape_to(target, OperatorKind::Unset, "unset needs a member access");
                    Some(self.ctx.new_stmt(Stmt::new(StmtKind::Expression(unset), location)))
                }
                _ => self.expression_statement(location),
            },
            _ => self.expression_statement(location),
        }
    }

    fn expression_statement(&mut self, location: Location) -> Option<StmtId> {
        let expr = self.expression()?;
        self.expect(&Token::Semicolon, "';'");
        Some(self.ctx.new_stmt(Stmt::new(StmtKind::Expression(expr), location)))
    }

    /// Rewrites an index/member expression into the given mutating operator
    /// (`delete m[k]`, `unset a.b`).
    fn reshape_to(&mut self, expr: ExprId, op: OperatorKind, message: &str) -> ExprId {
        let kind = self.ctx.expr(expr).kind.clone();
        let location = self.ctx.expr(expr).location.clone();
        let expected = match op {
            OperatorKind::Delete => OperatorKind::Index,
            _ => OperatorKind::Member,
        };
        match kind {
            ExprKind::UnresolvedOperator { op: found, operands } if found == expected => {
                let ty = self.ctx.unknown_qtype();
                self.ctx
                    .new_expr(Expr::new(ExprKind::UnresolvedOperator { op, operands }, ty, location))
            }
            _ => {
                self.error(message.to_owned(), location);
                expr
            }
        }
    }

    // -------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------

    fn expression(&mut self) -> Option<ExprId> {
        self.with_depth(Self::assignment)
    }

    fn assignment(&mut self) -> Option<ExprId> {
        let lhs = self.ternary()?;
        let location = self.here();
        let op = match self.peek() {
            Token::Assign => None,
            Token::PlusAssign => Some(OperatorKind::SumAssign),
            Token::MinusAssign => Some(OperatorKind::DifferenceAssign),
            Token::StarAssign => Some(OperatorKind::MultipleAssign),
            Token::SlashAssign => Some(OperatorKind::DivisionAssign),
            _ => return Some(lhs),
        };
        self.bump();
        let rhs = self.assignment()?;
        let ty = self.ctx.unknown_qtype();
        Some(match op {
            None => self
                .ctx
                .new_expr(Expr::new(ExprKind::Assign { target: lhs, source: rhs }, ty, location)),
            Some(op) => self.ctx.new_expr(Expr::new(
                ExprKind::UnresolvedOperator {
                    op,
                    operands: smallvec![lhs, rhs],
                },
                ty,
                location,
            )),
        })
    }

    fn ternary(&mut self) -> Option<ExprId> {
        let cond = self.logical_or()?;
        if !self.eat(&Token::Question) {
            return Some(cond);
        }
        let location = self.here();
        let then = self.expression()?;
        self.expect(&Token::Colon, "':'");
        let alt = self.expression()?;
        let ty = self.ctx.unknown_qtype();
        Some(self
            .ctx
            .new_expr(Expr::new(ExprKind::Ternary { cond, then, alt }, ty, location)))
    }

    fn logical_or(&mut self) -> Option<ExprId> {
        let mut lhs = self.logical_and()?;
        while self.eat(&Token::OrOr) {
            let location = self.here();
            let rhs = self.logical_and()?;
            let ty = QualifiedType::const_rhs(self.ctx.standard().bool_);
            lhs = self.ctx.new_expr(Expr::new(ExprKind::LogicalOr(lhs, rhs), ty, location));
        }
        Some(lhs)
    }

    fn logical_and(&mut self) -> Option<ExprId> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let location = self.here();
            let rhs = self.equality()?;
            let ty = QualifiedType::const_rhs(self.ctx.standard().bool_);
            lhs = self.ctx.new_expr(Expr::new(ExprKind::LogicalAnd(lhs, rhs), ty, location));
        }
        Some(lhs)
    }

    fn binary_op(&mut self, lhs: ExprId, op: OperatorKind, next: impl FnOnce(&mut Self) -> Option<ExprId>) -> Option<ExprId> {
        let location = self.here();
        self.bump();
        let rhs = next(self)?;
        let ty = self.ctx.unknown_qtype();
        Some(self.ctx.new_expr(Expr::new(
            ExprKind::UnresolvedOperator {
                op,
                operands: smallvec![lhs, rhs],
            },
            ty,
            location,
        )))
    }

    fn equality(&mut self) -> Option<ExprId> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Token::Eq => OperatorKind::Equal,
                Token::Ne => OperatorKind::Unequal,
                _ => return Some(lhs),
            };
            lhs = self.binary_op(lhs, op, Self::comparison)?;
        }
    }

    fn comparison(&mut self) -> Option<ExprId> {
        let mut lhs = self.bitor()?;
        loop {
            let op = match self.peek() {
                Token::Lt => OperatorKind::Lower,
                Token::Le => OperatorKind::LowerEqual,
                Token::Gt => OperatorKind::Greater,
                Token::Ge => OperatorKind::GreaterEqual,
                Token::Ident(id) if id == "in" => OperatorKind::In,
                _ => return Some(lhs),
            };
            lhs = self.binary_op(lhs, op, Self::bitor)?;
        }
    }

    fn bitor(&mut self) -> Option<ExprId> {
        let mut lhs = self.bitxor()?;
        while matches!(self.peek(), Token::Pipe) {
            lhs = self.binary_op(lhs, OperatorKind::BitOr, Self::bitxor)?;
        }
        Some(lhs)
    }

    fn bitxor(&mut self) -> Option<ExprId> {
        let mut lhs = self.bitand()?;
        while matches!(self.peek(), Token::Caret) {
            lhs = self.binary_op(lhs, OperatorKind::BitXor, Self::bitand)?;
        }
        Some(lhs)
    }

    fn bitand(&mut self) -> Option<ExprId> {
        let mut lhs = self.shift()?;
        while matches!(self.peek(), Token::Amp) {
            lhs = self.binary_op(lhs, OperatorKind::BitAnd, Self::shift)?;
        }
        Some(lhs)
    }

    fn shift(&mut self) -> Option<ExprId> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Shl => OperatorKind::ShiftLeft,
                Token::Shr => OperatorKind::ShiftRight,
                _ => return Some(lhs),
            };
            lhs = self.binary_op(lhs, op, Self::additive)?;
        }
    }

    fn additive(&mut self) -> Option<ExprId> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => OperatorKind::Sum,
                Token::Minus => OperatorKind::Difference,
                _ => return Some(lhs),
            };
            lhs = self.binary_op(lhs, op, Self::multiplicative)?;
        }
    }

    fn multiplicative(&mut self) -> Option<ExprId> {
        let mut lhs = self.power()?;
        loop {
            let op = match self.peek() {
                Token::Star => OperatorKind::Multiple,
                Token::Slash => OperatorKind::Division,
                Token::Percent => OperatorKind::Modulo,
                _ => return Some(lhs),
            };
            lhs = self.binary_op(lhs, op, Self::power)?;
        }
    }

    fn power(&mut self) -> Option<ExprId> {
        let lhs = self.unary()?;
        if matches!(self.peek(), Token::StarStar) {
            // Right-associative.
            let location = self.here();
            self.bump();
            let rhs = self.power()?;
            let ty = self.ctx.unknown_qtype();
            return Some(self.ctx.new_expr(Expr::new(
                ExprKind::UnresolvedOperator {
                    op: OperatorKind::Power,
                    operands: smallvec![lhs, rhs],
                },
                ty,
                location,
            )));
        }
        Some(lhs)
    }

    fn unary(&mut self) -> Option<ExprId> {
        let location = self.here();
        let op = match self.peek() {
            Token::Not => {
                self.bump();
                let inner = self.unary()?;
                let ty = QualifiedType::const_rhs(self.ctx.standard().bool_);
                return Some(self.ctx.new_expr(Expr::new(ExprKind::LogicalNot(inner), ty, location)));
            }
            Token::Minus => Some(OperatorKind::SignNeg),
            Token::Plus => Some(OperatorKind::SignPos),
            Token::Tilde => Some(OperatorKind::Negate),
            Token::PlusPlus => Some(OperatorKind::IncrPre),
            Token::MinusMinus => Some(OperatorKind::DecrPre),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let inner = self.unary()?;
            let ty = self.ctx.unknown_qtype();
            return Some(self.ctx.new_expr(Expr::new(
                ExprKind::UnresolvedOperator {
                    op,
                    operands: smallvec![inner],
                },
                ty,
                location,
            )));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Option<ExprId> {
        let mut expr = self.primary()?;
        loop {
            let location = self.here();
            match self.peek().clone() {
                Token::Dot => {
                    self.bump();
                    let id = self.expect_ident("member name")?;
                    let member = self.member_expr(id, location.clone());
                    expr = self.unresolved(OperatorKind::Member, smallvec![expr, member], location);
                }
                Token::DotQuestion => {
                    self.bump();
                    let id = self.expect_ident("member name")?;
                    let member = self.member_expr(id, location.clone());
                    expr = self.unresolved(OperatorKind::TryMember, smallvec![expr, member], location);
                }
                Token::Question if matches!(self.peek_at(1), Token::Dot) => {
                    self.bump();
                    self.bump();
                    let id = self.expect_ident("member name")?;
                    let member = self.member_expr(id, location.clone());
                    expr = self.unresolved(OperatorKind::HasMember, smallvec![expr, member], location);
                }
                Token::LParen => {
                    self.bump();
                    let args = self.call_arguments();
                    let args_tuple = self.ctx.new_expr(Expr::new(
                        ExprKind::Ctor(Ctor::Tuple(args)),
                        self.ctx.unknown_qtype(),
                        location.clone(),
                    ));
                    // A call on a member access becomes a method call.
                    let kind = self.ctx.expr(expr).kind.clone();
                    expr = match kind {
                        ExprKind::UnresolvedOperator { op: OperatorKind::Member, operands } => self.unresolved(
                            OperatorKind::MemberCall,
                            smallvec![operands[0], operands[1], args_tuple],
                            location,
                        ),
                        _ => self.unresolved(OperatorKind::Call, smallvec![expr, args_tuple], location),
                    };
                }
                Token::LBracket => {
                    self.bump();
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'");
                    expr = self.unresolved(OperatorKind::Index, smallvec![expr, index], location);
                }
                Token::PlusPlus => {
                    self.bump();
                    expr = self.unresolved(OperatorKind::IncrPost, smallvec![expr], location);
                }
                Token::MinusMinus => {
                    self.bump();
                    expr = self.unresolved(OperatorKind::DecrPost, smallvec![expr], location);
                }
                _ => return Some(expr),
            }
        }
    }

    fn member_expr(&mut self, id: String, location: Location) -> ExprId {
        self.ctx.new_expr(Expr::new(
            ExprKind::Member { id },
            self.ctx.unknown_qtype(),
            location,
        ))
    }

    fn unresolved(&mut self, op: OperatorKind, operands: crate::ast::expr::Operands, location: Location) -> ExprId {
        let ty = self.ctx.unknown_qtype();
        self.ctx
            .new_expr(Expr::new(ExprKind::UnresolvedOperator { op, operands }, ty, location))
    }

    fn call_arguments(&mut self) -> Vec<ExprId> {
        let mut args = Vec::new();
        while !matches!(self.peek(), Token::RParen | Token::Eof) {
            if let Some(arg) = self.expression() {
                args.push(arg);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'");
        args
    }

    fn primary(&mut self) -> Option<ExprId> {
        let location = self.here();
        match self.peek().clone() {
            Token::Int(value) => {
                self.bump();
                let ty = QualifiedType::const_rhs(self.ctx.standard().uint64);
                Some(self.ctx.new_expr(Expr::new(
                    ExprKind::Ctor(Ctor::Unsigned { value, width: 64 }),
                    ty,
                    location,
                )))
            }
            Token::Real(value) => {
                self.bump();
                let ty = QualifiedType::const_rhs(self.ctx.standard().real);
                Some(self.ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::Real(value)), ty, location)))
            }
            Token::Str(value) => {
                self.bump();
                let ty = QualifiedType::const_rhs(self.ctx.standard().string);
                Some(self.ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::String(value)), ty, location)))
            }
            Token::BytesLit(value) => {
                self.bump();
                let ty = QualifiedType::const_rhs(self.ctx.standard().bytes);
                Some(self.ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::Bytes(value)), ty, location)))
            }
            Token::Regex(pattern) => {
                self.bump();
                let ty = QualifiedType::const_rhs(self.ctx.standard().regexp);
                Some(self.ctx.new_expr(Expr::new(
                    ExprKind::Ctor(Ctor::RegExp(vec![pattern])),
                    ty,
                    location,
                )))
            }
            Token::DollarDollar => {
                self.bump();
                Some(self
                    .ctx
                    .new_expr(Expr::new(ExprKind::Dollar, self.ctx.unknown_qtype(), location)))
            }
            Token::Pipe => {
                // `|e|`, size of.
                self.bump();
                let inner = self.expression()?;
                self.expect(&Token::Pipe, "'|'");
                Some(self.unresolved(OperatorKind::Size, smallvec![inner], location))
            }
            Token::LParen => {
                self.bump();
                let first = self.expression()?;
                if self.eat(&Token::Comma) {
                    let mut elems = vec![first];
                    while !matches!(self.peek(), Token::RParen | Token::Eof) {
                        if let Some(e) = self.expression() {
                            elems.push(e);
                        }
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "')'");
                    Some(self.ctx.new_expr(Expr::new(
                        ExprKind::Ctor(Ctor::Tuple(elems)),
                        self.ctx.unknown_qtype(),
                        location,
                    )))
                } else {
                    self.expect(&Token::RParen, "')'");
                    Some(self
                        .ctx
                        .new_expr(Expr::new(ExprKind::Grouping(first), self.ctx.unknown_qtype(), location)))
                }
            }
            Token::LBracket => {
                self.bump();
                let mut elems = Vec::new();
                if !matches!(self.peek(), Token::RBracket) {
                    let first = self.expression()?;
                    if self.eat_keyword("for") {
                        // `[output for id in input if cond]`
                        let var = self.expect_ident("comprehension variable")?;
                        if !self.eat_keyword("in") {
                            let loc = self.here();
                            self.error("expected 'in'".into(), loc);
                        }
                        let input = self.expression()?;
                        let cond = self.eat_keyword("if").then(|| self.expression()).flatten();
                        self.expect(&Token::RBracket, "']'");
                        return Some(self.ctx.new_expr(Expr::new(
                            ExprKind::ListComprehension {
                                input,
                                output: first,
                                var,
                                cond,
                            },
                            self.ctx.unknown_qtype(),
                            location,
                        )));
                    }
                    elems.push(first);
                    while self.eat(&Token::Comma) {
                        if let Some(e) = self.expression() {
                            elems.push(e);
                        }
                    }
                }
                self.expect(&Token::RBracket, "']'");
                let elem_ty = self.ctx.standard().unknown;
                Some(self.ctx.new_expr(Expr::new(
                    ExprKind::Ctor(Ctor::List {
                        elem: elem_ty,
                        elems,
                    }),
                    self.ctx.unknown_qtype(),
                    location,
                )))
            }
            Token::Ident(word) => match word.as_str() {
                "True" => {
                    self.bump();
                    let ty = QualifiedType::const_rhs(self.ctx.standard().bool_);
                    Some(self.ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::Bool(true)), ty, location)))
                }
                "False" => {
                    self.bump();
                    let ty = QualifiedType::const_rhs(self.ctx.standard().bool_);
                    Some(self.ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::Bool(false)), ty, location)))
                }
                "Null" => {
                    self.bump();
                    let ty = QualifiedType::const_rhs(self.ctx.standard().null);
                    Some(self.ctx.new_expr(Expr::new(ExprKind::Ctor(Ctor::Null), ty, location)))
                }
                "self" => {
                    self.bump();
                    Some(self
                        .ctx
                        .new_expr(Expr::new(ExprKind::SelfRef, self.ctx.unknown_qtype(), location)))
                }
                "cast" => {
                    self.bump();
                    self.expect(&Token::Lt, "'<'");
                    let ty = self.type_ref()?;
                    self.expect(&Token::Gt, "'>'");
                    self.expect(&Token::LParen, "'('");
                    let value = self.expression()?;
                    self.expect(&Token::RParen, "')'");
                    let type_expr = self.ctx.new_expr(Expr::new(
                        ExprKind::TypeExpr(ty),
                        QualifiedType::const_rhs(ty),
                        location.clone(),
                    ));
                    Some(self.unresolved(OperatorKind::Cast, smallvec![value, type_expr], location))
                }
                "new" => {
                    self.bump();
                    let ty = self.type_ref()?;
                    let type_expr = self.ctx.new_expr(Expr::new(
                        ExprKind::TypeExpr(ty),
                        QualifiedType::const_rhs(ty),
                        location.clone(),
                    ));
                    Some(self.unresolved(OperatorKind::New, smallvec![type_expr], location))
                }
                "begin" | "end" if matches!(self.peek_at(1), Token::LParen) => {
                    let op = if word == "begin" { OperatorKind::Begin } else { OperatorKind::End };
                    self.bump();
                    self.bump();
                    let inner = self.expression()?;
                    self.expect(&Token::RParen, "')'");
                    Some(self.unresolved(op, smallvec![inner], location))
                }
                _ => {
                    // A (possibly qualified) name; built-in type names in
                    // expression position become type expressions so that
                    // `uint8(…)` resolves as a type-constructor call.
                    if let Some(ty) = self.try_builtin_type(&word) {
                        self.bump();
                        return Some(self.ctx.new_expr(Expr::new(
                            ExprKind::TypeExpr(ty),
                            QualifiedType::const_rhs(ty),
                            location,
                        )));
                    }
                    self.bump();
                    let mut path = word;
                    while self.eat(&Token::ColonColon) {
                        let next = self.expect_ident("name")?;
                        path.push_str("::");
                        path.push_str(&next);
                    }
                    Some(self.ctx.new_expr(Expr::new(
                        ExprKind::Name {
                            id: path,
                            resolved: crate::ast::node::DeclarationIndex::NONE,
                        },
                        self.ctx.unknown_qtype(),
                        location,
                    )))
                }
            },
            other => {
                self.error(format!("expected expression, found {other}"), location);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> (AstContext, ModuleId) {
        let mut ctx = AstContext::new();
        let module = parse_module(&mut ctx, source, Path::new("test.sdl"), Dialect::Sdl);
        let errors: Vec<String> = ctx.diagnostics.emitted().iter().map(ToString::to_string).collect();
        let module = module.unwrap_or_else(|()| panic!("parse failed: {errors:?}"));
        (ctx, module)
    }

    #[test]
    fn parses_minimal_module() {
        let (ctx, module) = parse_ok("module Test;");
        assert_eq!(ctx.module(module).id, "Test");
    }

    #[test]
    fn parses_literal_field_unit() {
        let (ctx, module) = parse_ok("module M;\ntype X = unit { x: b\"HELLO\"; };");
        let decls = &ctx.module(module).decls;
        assert_eq!(decls.len(), 1);
        let decl = ctx.decl(decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!("expected type decl") };
        let Ty::Unit(unit) = ctx.ty(*ty) else { panic!("expected unit type") };
        assert_eq!(unit.items.len(), 1);
        let field = ctx.item(unit.items[0]).as_field().expect("field");
        assert_eq!(field.id.as_deref(), Some("x"));
        assert!(field.ctor.is_some());
    }

    #[test]
    fn parses_field_attributes_and_repeat() {
        let (ctx, module) = parse_ok("module M;\ntype X = unit { n: uint8; xs: uint16[n] &byte-order=Big; };");
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(*ty) else { panic!() };
        let xs = ctx.item(unit.items[1]).as_field().expect("field");
        assert!(xs.is_container);
        assert!(xs.repeat.is_some());
        assert!(xs.attributes.has(AttributeKind::ByteOrder));
    }

    #[test]
    fn parses_unresolved_field_reference() {
        let (ctx, module) = parse_ok("module M;\ntype Inner = unit { x: uint8; };\ntype Outer = unit { i: Inner; };");
        let outer = ctx.decl(ctx.module(module).decls[1]);
        let DeclKind::Type { ty } = &outer.kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(*ty) else { panic!() };
        assert!(matches!(ctx.item(unit.items[0]), UnitItem::UnresolvedField { referenced, .. } if referenced == "Inner"));
    }

    #[test]
    fn parses_unit_hooks_and_properties() {
        let (ctx, module) = parse_ok(
            "module M;\ntype X = unit {\n  %random-access;\n  %mime-type = \"text/plain\";\n  on %done { local n = 1; }\n  x: bytes &size=4;\n};",
        );
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(*ty) else { panic!() };
        let kinds: Vec<_> = unit.items.iter().map(|&i| ctx.item(i)).collect();
        assert!(matches!(kinds[0], UnitItem::Property { kind: PropertyKind::RandomAccess, .. }));
        assert!(matches!(kinds[1], UnitItem::Property { kind: PropertyKind::MimeType, .. }));
        assert!(matches!(kinds[2], UnitItem::UnitHook { .. }));
    }

    #[test]
    fn parses_anonymous_and_skip_fields() {
        let (ctx, module) = parse_ok("module M;\ntype X = unit { : skip bytes &size=2; y: uint8; };");
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(*ty) else { panic!() };
        let anon = ctx.item(unit.items[0]).as_field().expect("field");
        assert!(anon.is_anonymous());
        assert!(anon.is_skip);
    }

    #[test]
    fn parses_switch_item() {
        let (ctx, module) = parse_ok(
            "module M;\ntype X = unit {\n  tag: uint8;\n  switch (self.tag) {\n    1 -> a: uint8;\n    * -> b: uint16;\n  };\n};",
        );
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!() };
        let Ty::Unit(unit) = ctx.ty(*ty) else { panic!() };
        let UnitItem::Switch(sw) = ctx.item(unit.items[1]) else { panic!("expected switch") };
        assert_eq!(sw.cases.len(), 2);
        assert!(sw.cases[1].exprs.is_empty(), "default case has no expressions");
    }

    #[test]
    fn parses_function_and_statements() {
        let (_ctx, _) = parse_ok(
            "module M;\nfunction f(a: uint64, inout b: bytes) : uint64 {\n  local x = a + 1;\n  if (x > 2) { return x; } else { return a; }\n}",
        );
    }

    #[test]
    fn parses_expressions_with_precedence() {
        let (ctx, module) = parse_ok("module M;\nconst X = 1 + 2 * 3;");
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Constant { value, .. } = &decl.kind else { panic!() };
        let ExprKind::UnresolvedOperator { op, operands } = &ctx.expr(*value).kind else {
            panic!("expected operator")
        };
        assert_eq!(*op, OperatorKind::Sum);
        let ExprKind::UnresolvedOperator { op: inner, .. } = &ctx.expr(operands[1]).kind else {
            panic!("expected nested operator")
        };
        assert_eq!(*inner, OperatorKind::Multiple);
    }

    #[test]
    fn parses_method_calls_and_members() {
        let (ctx, module) = parse_ok("module M;\nconst X = b\"a,b\".split1(b\",\");");
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Constant { value, .. } = &decl.kind else { panic!() };
        let ExprKind::UnresolvedOperator { op, operands } = &ctx.expr(*value).kind else { panic!() };
        assert_eq!(*op, OperatorKind::MemberCall);
        assert!(matches!(&ctx.expr(operands[1]).kind, ExprKind::Member { id } if id == "split1"));
    }

    #[test]
    fn parses_module_hook() {
        let (ctx, module) = parse_ok("module M;\non X::%done { local a = 1; }");
        assert_eq!(ctx.module(module).hooks.len(), 1);
        let hook = ctx.hook(ctx.module(module).hooks[0]);
        assert_eq!(hook.path, vec!["X".to_owned()]);
        assert_eq!(hook.special, Some(SpecialHook::Done));
    }

    #[test]
    fn syntax_error_is_reported_not_panicked() {
        let mut ctx = AstContext::new();
        let result = parse_module(&mut ctx, "module M;\ntype = ;", Path::new("bad.sdl"), Dialect::Sdl);
        assert!(result.is_err());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn parses_enum_with_labels() {
        let (ctx, module) = parse_ok("module M;\ntype Proto = enum { TCP, UDP = 17 };");
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!() };
        let Ty::Enum(e) = ctx.ty(*ty) else { panic!() };
        assert_eq!(e.label_value("TCP"), Some(0));
        assert_eq!(e.label_value("UDP"), Some(17));
        assert!(decl.scope.is_some(), "labels resolve through the decl scope");
    }

    #[test]
    fn parses_bitfield_type() {
        let (ctx, module) = parse_ok("module M;\ntype F = bitfield(8) { flag: 0; rest: 1..7; };");
        let decl = ctx.decl(ctx.module(module).decls[0]);
        let DeclKind::Type { ty } = &decl.kind else { panic!() };
        let Ty::Bitfield(bf) = ctx.ty(*ty) else { panic!() };
        assert_eq!(bf.width, 8);
        assert_eq!(bf.bits.len(), 2);
        assert_eq!(bf.bits[1].lower, 1);
        assert_eq!(bf.bits[1].upper, 7);
    }
}
