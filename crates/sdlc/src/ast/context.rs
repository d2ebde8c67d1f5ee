//! The AST context: owner of every node, the registration tables, and the
//! module registry.
//!
//! All nodes live in per-kind arenas inside the context and are addressed
//! by index. Arenas are append-only: replacing a node moves the displaced
//! payload into a fresh slot (recorded as the replacement's `original`) so
//! superseded nodes stay readable for diagnostics while lookups through the
//! parent edge see the new node.
//!
//! Declarations and types additionally register in append-only tables that
//! hand out `DeclarationIndex`/`TypeIndex` handles. Handles survive node
//! replacement: `replace_*` re-points the table entry in place, enabling
//! forward references among mutually-dependent declarations.

use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::{
    ast::{
        decl::{DeclKind, Declaration},
        expr::{Expr, ExprKind},
        node::{
            DeclId, DeclarationIndex, ExprId, HookId, ItemId, Location, ModuleId, ScopeId, StmtId, TypeId, TypeIndex,
        },
        scope::{LookupResult, Resolved, Scope, ScopeEntry},
        stmt::Stmt,
        types::{QualifiedType, Ty, TypeNode},
        unit::{Hook, UnitItem},
    },
    diagnostics::Diagnostics,
};

/// Surface dialect of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// The declarative parser-description language (`.sdl`).
    Sdl,
    /// The imperative intermediate language (`.hlt`).
    Iml,
}

impl Dialect {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sdl") => Some(Self::Sdl),
            Some("hlt") => Some(Self::Iml),
            _ => None,
        }
    }
}

/// Unique module identity: module ID plus source path plus a uniquifying
/// serial for same-named modules in different scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleUid(String);

impl ModuleUid {
    pub fn new(id: &str, path: &Path) -> Self {
        Self(format!("{id}@{}", path.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named top-level container of declarations.
#[derive(Debug)]
pub struct Module {
    pub id: String,
    pub uid: ModuleUid,
    pub path: PathBuf,
    /// Import search scope the module was found under, if any.
    pub scope_tag: Option<String>,
    pub dialect: Dialect,
    pub decls: Vec<DeclId>,
    /// Module-level hook bodies (`on Unit::field { … }`).
    pub hooks: Vec<crate::ast::node::HookId>,
    /// Module-level properties, copied into units that do not override them.
    pub properties: Vec<(crate::ast::unit::PropertyKind, Option<crate::ast::node::ExprId>)>,
    pub scope: ScopeId,
    /// Modules this one imports.
    pub dependencies: Vec<ModuleId>,
    /// Set once the one-shot normalization pass ran.
    pub normalized: bool,
    pub location: Location,
}

/// The pre-created types every program shares.
///
/// Operator signatures resolve their named types against these at registry
/// construction, which must succeed before resolution begins.
#[derive(Debug, Clone, Copy)]
pub struct StandardTypes {
    pub unknown: TypeId,
    pub auto: TypeId,
    pub any: TypeId,
    pub void: TypeId,
    pub bool_: TypeId,
    pub real: TypeId,
    pub string: TypeId,
    pub bytes: TypeId,
    pub stream: TypeId,
    pub view: TypeId,
    pub iter: TypeId,
    pub regexp: TypeId,
    pub address: TypeId,
    pub port: TypeId,
    pub interval: TypeId,
    pub time: TypeId,
    pub error: TypeId,
    pub null: TypeId,
    pub sink: TypeId,
    pub operand_list: TypeId,
    pub uint8: TypeId,
    pub uint16: TypeId,
    pub uint32: TypeId,
    pub uint64: TypeId,
    pub int8: TypeId,
    pub int16: TypeId,
    pub int32: TypeId,
    pub int64: TypeId,
    /// `vector<bytes>`, the type of `bytes::split`.
    pub vector_of_bytes: TypeId,
    /// `tuple<bytes, bytes>`, the type of `bytes::split1`.
    pub bytes_pair: TypeId,
}

impl StandardTypes {
    pub fn unsigned(self, width: u16) -> Option<TypeId> {
        match width {
            8 => Some(self.uint8),
            16 => Some(self.uint16),
            32 => Some(self.uint32),
            64 => Some(self.uint64),
            _ => None,
        }
    }

    pub fn signed(self, width: u16) -> Option<TypeId> {
        match width {
            8 => Some(self.int8),
            16 => Some(self.int16),
            32 => Some(self.int32),
            64 => Some(self.int64),
            _ => None,
        }
    }
}

/// The context owning one program's AST.
#[derive(Debug)]
pub struct AstContext {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    decls: Vec<Declaration>,
    types: Vec<TypeNode>,
    items: Vec<UnitItem>,
    hooks: Vec<Hook>,
    scopes: Vec<Scope>,
    modules: Vec<Module>,

    /// Registration tables; slot 0 is reserved so index 0 means "none".
    decl_table: Vec<DeclId>,
    type_table: Vec<TypeId>,

    module_by_uid: AHashMap<ModuleUid, ModuleId>,
    module_by_path: AHashMap<PathBuf, ModuleId>,
    module_by_id_scope: AHashMap<(String, Option<String>), ModuleId>,

    canonical_serials: AHashMap<String, u32>,

    /// The root scope holding standard types and all modules.
    root_scope: ScopeId,
    standard: StandardTypes,

    pub diagnostics: Diagnostics,
}

impl Default for AstContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AstContext {
    pub fn new() -> Self {
        let mut ctx = Self {
            exprs: Vec::new(),
            stmts: Vec::new(),
            decls: Vec::new(),
            types: Vec::new(),
            items: Vec::new(),
            hooks: Vec::new(),
            scopes: vec![Scope::new(None)],
            modules: Vec::new(),
            decl_table: vec![DeclId::new(0)],
            type_table: vec![TypeId::new(0)],
            module_by_uid: AHashMap::new(),
            module_by_path: AHashMap::new(),
            module_by_id_scope: AHashMap::new(),
            canonical_serials: AHashMap::new(),
            root_scope: ScopeId::new(0),
            standard: StandardTypes {
                unknown: TypeId::new(0),
                auto: TypeId::new(0),
                any: TypeId::new(0),
                void: TypeId::new(0),
                bool_: TypeId::new(0),
                real: TypeId::new(0),
                string: TypeId::new(0),
                bytes: TypeId::new(0),
                stream: TypeId::new(0),
                view: TypeId::new(0),
                iter: TypeId::new(0),
                regexp: TypeId::new(0),
                address: TypeId::new(0),
                port: TypeId::new(0),
                interval: TypeId::new(0),
                time: TypeId::new(0),
                error: TypeId::new(0),
                null: TypeId::new(0),
                sink: TypeId::new(0),
                operand_list: TypeId::new(0),
                uint8: TypeId::new(0),
                uint16: TypeId::new(0),
                uint32: TypeId::new(0),
                uint64: TypeId::new(0),
                int8: TypeId::new(0),
                int16: TypeId::new(0),
                int32: TypeId::new(0),
                int64: TypeId::new(0),
                vector_of_bytes: TypeId::new(0),
                bytes_pair: TypeId::new(0),
            },
            diagnostics: Diagnostics::new(),
        };
        ctx.install_standard_types();
        ctx
    }

    fn install_standard_types(&mut self) {
        let mut make = |ctx: &mut Self, ty: Ty| {
            let id = ctx.new_type(ty, Location::none());
            ctx.register_type(id);
            id
        };
        self.standard = StandardTypes {
            unknown: make(self, Ty::Unknown),
            auto: make(self, Ty::Auto),
            any: make(self, Ty::Any),
            void: make(self, Ty::Void),
            bool_: make(self, Ty::Bool),
            real: make(self, Ty::Real),
            string: make(self, Ty::String),
            bytes: make(self, Ty::Bytes),
            stream: make(self, Ty::Stream),
            view: make(self, Ty::StreamView),
            iter: make(self, Ty::StreamIter),
            regexp: make(self, Ty::RegExp),
            address: make(self, Ty::Address),
            port: make(self, Ty::Port),
            interval: make(self, Ty::Interval),
            time: make(self, Ty::Time),
            error: make(self, Ty::Error),
            null: make(self, Ty::Null),
            sink: make(self, Ty::Sink),
            operand_list: make(self, Ty::OperandList),
            uint8: make(self, Ty::UnsignedInteger(8)),
            uint16: make(self, Ty::UnsignedInteger(16)),
            uint32: make(self, Ty::UnsignedInteger(32)),
            uint64: make(self, Ty::UnsignedInteger(64)),
            int8: make(self, Ty::SignedInteger(8)),
            int16: make(self, Ty::SignedInteger(16)),
            int32: make(self, Ty::SignedInteger(32)),
            int64: make(self, Ty::SignedInteger(64)),
            vector_of_bytes: TypeId::new(0),
            bytes_pair: TypeId::new(0),
        };
        let bytes = self.standard.bytes;
        self.standard.vector_of_bytes = make(self, Ty::Vector(bytes));
        self.standard.bytes_pair = make(self, Ty::Tuple(vec![bytes, bytes]));
        self.install_runtime_enums();
    }

    /// Enumerations the runtime library provides; their labels resolve
    /// both qualified (`ByteOrder::Big`) and bare (`Big`).
    fn install_runtime_enums(&mut self) {
        let enums: [(&str, &[&str]); 6] = [
            ("ByteOrder", &["Little", "Big", "Network", "Host"]),
            ("BitOrder", &["LSB0", "MSB0"]),
            ("Charset", &["UTF8", "ASCII", "LATIN1"]),
            ("RealType", &["IEEE754_Single", "IEEE754_Double"]),
            ("ReassemblerPolicy", &["First"]),
            ("Direction", &["Originator", "Responder", "Both", "Undef"]),
        ];
        for (name, labels) in enums {
            let ty = self.new_type(
                Ty::Enum(crate::ast::types::EnumType {
                    id: name.to_owned(),
                    labels: labels.iter().enumerate().map(|(i, l)| ((*l).to_owned(), i as i64)).collect(),
                }),
                Location::none(),
            );
            self.register_type(ty);

            let scope = self.new_scope(None);
            for label in labels {
                let value = self.new_expr(Expr::new(
                    ExprKind::Ctor(crate::ast::expr::Ctor::Enum {
                        ty,
                        label: (*label).to_owned(),
                    }),
                    crate::ast::types::QualifiedType::const_rhs(ty),
                    Location::none(),
                ));
                let decl = self.new_decl(Declaration::new(
                    *label,
                    DeclKind::Constant { ty: Some(ty), value },
                    crate::ast::decl::Linkage::Public,
                    Location::none(),
                ));
                let index = self.register_declaration(decl);
                self.scope_mut(scope).insert(*label, index);
                let root = self.root_scope;
                self.scope_mut(root).insert(*label, index);
            }

            let mut type_decl = Declaration::new(
                name,
                DeclKind::Type { ty },
                crate::ast::decl::Linkage::Public,
                Location::none(),
            );
            type_decl.scope = Some(scope);
            let type_decl = self.new_decl(type_decl);
            let index = self.register_declaration(type_decl);
            self.type_node_mut(ty).declaration = index;
            let root = self.root_scope;
            self.scope_mut(root).insert(name, index);
        }
    }

    pub fn standard(&self) -> StandardTypes {
        self.standard
    }

    pub fn root_scope(&self) -> ScopeId {
        self.root_scope
    }

    /// The qualified type resolution starts every expression with.
    pub fn unknown_qtype(&self) -> QualifiedType {
        QualifiedType::const_rhs(self.standard.unknown)
    }

    // -------------------------------------------------------------------
    // Arena allocation and access
    // -------------------------------------------------------------------

    pub fn new_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::new(self.exprs.len());
        self.exprs.push(expr);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    /// Replaces the expression at `id`, preserving the displaced payload in
    /// a fresh slot recorded as the replacement's `original`.
    pub fn replace_expr(&mut self, id: ExprId, mut new: Expr) {
        let preserved = ExprId::new(self.exprs.len());
        let old = self.exprs[id.index()].clone();
        self.exprs.push(old);
        new.original = Some(preserved);
        self.exprs[id.index()] = new;
    }

    pub fn new_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId::new(self.stmts.len());
        self.stmts.push(stmt);
        id
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    pub fn new_decl(&mut self, decl: Declaration) -> DeclId {
        let id = DeclId::new(self.decls.len());
        self.decls.push(decl);
        id
    }

    pub fn decl(&self, id: DeclId) -> &Declaration {
        &self.decls[id.index()]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Declaration {
        &mut self.decls[id.index()]
    }

    pub fn new_type(&mut self, ty: Ty, location: Location) -> TypeId {
        let id = TypeId::new(self.types.len());
        self.types.push(TypeNode::new(ty, location));
        id
    }

    pub fn type_node(&self, id: TypeId) -> &TypeNode {
        &self.types[id.index()]
    }

    pub fn type_node_mut(&mut self, id: TypeId) -> &mut TypeNode {
        &mut self.types[id.index()]
    }

    pub fn ty(&self, id: TypeId) -> &Ty {
        &self.types[id.index()].ty
    }

    pub fn new_item(&mut self, item: UnitItem) -> ItemId {
        let id = ItemId::new(self.items.len());
        self.items.push(item);
        id
    }

    pub fn item(&self, id: ItemId) -> &UnitItem {
        &self.items[id.index()]
    }

    pub fn item_mut(&mut self, id: ItemId) -> &mut UnitItem {
        &mut self.items[id.index()]
    }

    pub fn new_hook(&mut self, hook: Hook) -> HookId {
        let id = HookId::new(self.hooks.len());
        self.hooks.push(hook);
        id
    }

    pub fn hook(&self, id: HookId) -> &Hook {
        &self.hooks[id.index()]
    }

    pub fn hook_mut(&mut self, id: HookId) -> &mut Hook {
        &mut self.hooks[id.index()]
    }

    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId::new(self.scopes.len());
        self.scopes.push(Scope::new(parent));
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    // -------------------------------------------------------------------
    // Registration tables
    // -------------------------------------------------------------------

    /// Registers a declaration, returning its index. Idempotent:
    /// re-registering returns the existing index.
    pub fn register_declaration(&mut self, id: DeclId) -> DeclarationIndex {
        let existing = self.decls[id.index()].index;
        if existing.is_set() {
            return existing;
        }
        let index = DeclarationIndex::new(u32::try_from(self.decl_table.len()).expect("table overflow"));
        self.decl_table.push(id);
        let decl = &mut self.decls[id.index()];
        decl.index = index;
        if decl.canonical_id.is_empty() {
            decl.canonical_id = decl.id.clone();
        }
        index
    }

    /// Looks up a registered declaration. Never returns a dangling node for
    /// a registered index.
    pub fn lookup_declaration(&self, index: DeclarationIndex) -> &Declaration {
        assert!(index.is_set(), "lookup of unregistered declaration");
        let id = self.decl_table[index.value() as usize];
        &self.decls[id.index()]
    }

    pub fn lookup_declaration_mut(&mut self, index: DeclarationIndex) -> &mut Declaration {
        assert!(index.is_set(), "lookup of unregistered declaration");
        let id = self.decl_table[index.value() as usize];
        &mut self.decls[id.index()]
    }

    pub fn lookup_declaration_id(&self, index: DeclarationIndex) -> DeclId {
        assert!(index.is_set(), "lookup of unregistered declaration");
        self.decl_table[index.value() as usize]
    }

    /// Re-points a declaration index at `new`. The new node inherits the
    /// index; the old node's own stored index stays readable.
    pub fn replace_declaration(&mut self, index: DeclarationIndex, new: DeclId) {
        assert!(index.is_set(), "replace of unregistered declaration");
        self.decl_table[index.value() as usize] = new;
        self.decls[new.index()].index = index;
    }

    /// Registers a type, returning its index. Idempotent.
    pub fn register_type(&mut self, id: TypeId) -> TypeIndex {
        let existing = self.types[id.index()].index;
        if existing.is_set() {
            return existing;
        }
        let index = TypeIndex::new(u32::try_from(self.type_table.len()).expect("table overflow"));
        self.type_table.push(id);
        self.types[id.index()].index = index;
        index
    }

    /// Looks up a registered type. Never returns a dangling node for a
    /// registered index.
    pub fn lookup_type(&self, index: TypeIndex) -> &TypeNode {
        assert!(index.is_set(), "lookup of unregistered type");
        let id = self.type_table[index.value() as usize];
        &self.types[id.index()]
    }

    pub fn lookup_type_id(&self, index: TypeIndex) -> TypeId {
        assert!(index.is_set(), "lookup of unregistered type");
        self.type_table[index.value() as usize]
    }

    /// Re-points a type index at `new`, carrying the declaring
    /// declaration's index over to the new type.
    pub fn replace_type(&mut self, index: TypeIndex, new: TypeId) {
        assert!(index.is_set(), "replace of unregistered type");
        let old = self.type_table[index.value() as usize];
        let declared_by = self.types[old.index()].declaration;
        self.type_table[index.value() as usize] = new;
        let node = &mut self.types[new.index()];
        node.index = index;
        if declared_by.is_set() {
            node.declaration = declared_by;
        }
    }

    /// Returns `id` made unique within this context, appending a serial
    /// suffix when needed.
    pub fn unique_canonical_id(&mut self, id: &str) -> String {
        let serial = self.canonical_serials.entry(id.to_owned()).or_insert(0);
        *serial += 1;
        if *serial == 1 {
            id.to_owned()
        } else {
            format!("{id}_{serial}")
        }
    }

    // -------------------------------------------------------------------
    // Modules
    // -------------------------------------------------------------------

    pub fn add_module(&mut self, module: Module) -> ModuleId {
        let id = ModuleId::new(self.modules.len());
        self.module_by_uid.insert(module.uid.clone(), id);
        self.module_by_path.insert(module.path.clone(), id);
        self.module_by_id_scope
            .insert((module.id.clone(), module.scope_tag.clone()), id);
        self.modules.push(module);
        id
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.index()]
    }

    pub fn module_by_uid(&self, uid: &ModuleUid) -> Option<ModuleId> {
        self.module_by_uid.get(uid).copied()
    }

    pub fn module_by_path(&self, path: &Path) -> Option<ModuleId> {
        self.module_by_path.get(path).copied()
    }

    pub fn module_by_id(&self, id: &str, scope: Option<&str>) -> Option<ModuleId> {
        self.module_by_id_scope
            .get(&(id.to_owned(), scope.map(str::to_owned)))
            .copied()
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter().enumerate().map(|(i, m)| (ModuleId::new(i), m))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Modules `uid` imports; with `recursive`, the transitive closure in
    /// depth-first order, each module once.
    pub fn dependencies(&self, uid: &ModuleUid, recursive: bool) -> Vec<ModuleUid> {
        let Some(module) = self.module_by_uid(uid) else {
            return Vec::new();
        };
        let mut seen: Vec<ModuleId> = Vec::new();
        let mut stack: Vec<ModuleId> = self.modules[module.index()].dependencies.clone();
        stack.reverse();
        while let Some(next) = stack.pop() {
            if seen.contains(&next) {
                continue;
            }
            seen.push(next);
            if recursive {
                for dep in self.modules[next.index()].dependencies.iter().rev() {
                    stack.push(*dep);
                }
            }
        }
        seen.into_iter().map(|id| self.modules[id.index()].uid.clone()).collect()
    }

    // -------------------------------------------------------------------
    // Scope lookup
    // -------------------------------------------------------------------

    /// Looks up a possibly-qualified ID starting at `scope`, walking
    /// outward toward the root. External entries resolve only if the target
    /// declaration is public or a type declaration. A stop marker shadows
    /// outer scopes.
    pub fn lookup_id(&self, scope: ScopeId, id: &str) -> LookupResult {
        if let Some((head, rest)) = id.split_once("::") {
            return self.lookup_qualified(scope, head, rest);
        }
        self.lookup_plain(scope, id)
    }

    fn lookup_plain(&self, mut scope: ScopeId, id: &str) -> LookupResult {
        let mut result = LookupResult::default();
        loop {
            if let Some(entries) = self.scope(scope).entries_for(id) {
                for entry in entries {
                    match entry {
                        ScopeEntry::Stop => return result,
                        ScopeEntry::Declaration { index, external } => {
                            if *external && !self.externally_visible(*index) {
                                continue;
                            }
                            result.matches.push(Resolved {
                                index: *index,
                                external: *external,
                            });
                        }
                    }
                }
                if !result.is_empty() {
                    return result;
                }
            }
            match self.scope(scope).parent {
                Some(parent) => scope = parent,
                None => return result,
            }
        }
    }

    fn lookup_qualified(&self, scope: ScopeId, head: &str, rest: &str) -> LookupResult {
        let heads = self.lookup_plain(scope, head);
        for candidate in &heads.matches {
            let decl = self.lookup_declaration(candidate.index);
            match &decl.kind {
                DeclKind::ImportedModule { module: Some(module), .. } => {
                    let module_scope = self.module(*module).scope;
                    let mut result = LookupResult::default();
                    if let Some(entries) = self.scope(module_scope).entries_for(rest) {
                        for entry in entries {
                            if let ScopeEntry::Declaration { index, .. } = entry {
                                if self.externally_visible(*index) {
                                    result.matches.push(Resolved {
                                        index: *index,
                                        external: true,
                                    });
                                }
                            }
                        }
                    }
                    if !result.is_empty() {
                        return result;
                    }
                }
                DeclKind::Type { .. } => {
                    if let Some(scope) = decl.scope {
                        let inner = self.lookup_plain(scope, rest);
                        if !inner.is_empty() {
                            return inner;
                        }
                    }
                }
                _ => {}
            }
        }
        LookupResult::default()
    }

    /// Whether an import may see this declaration: public linkage, or a
    /// type declaration (types are universally visible to support
    /// out-of-module hooks).
    fn externally_visible(&self, index: DeclarationIndex) -> bool {
        let decl = self.lookup_declaration(index);
        decl.linkage != crate::ast::decl::Linkage::Private || decl.is_type()
    }

    /// The declared type behind an index, following `Ty::Name` references.
    pub fn resolve_type(&self, mut id: TypeId) -> TypeId {
        for _ in 0..64 {
            match self.ty(id) {
                Ty::Name { resolved, .. } if resolved.is_set() => {
                    id = self.lookup_type_id(*resolved);
                }
                _ => return id,
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::decl::Linkage;

    fn constant(ctx: &mut AstContext, id: &str) -> DeclId {
        let value = ctx.new_expr(Expr::new(
            ExprKind::Ctor(crate::ast::expr::Ctor::Bool(true)),
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

    #[test]
    fn registration_is_idempotent() {
        let mut ctx = AstContext::new();
        let decl = constant(&mut ctx, "x");
        let a = ctx.register_declaration(decl);
        let b = ctx.register_declaration(decl);
        assert_eq!(a, b);
    }

    #[test]
    fn replace_repoints_lookup_but_not_old_index() {
        let mut ctx = AstContext::new();
        let old = constant(&mut ctx, "x");
        let index = ctx.register_declaration(old);
        let new = constant(&mut ctx, "y");
        ctx.replace_declaration(index, new);
        assert_eq!(ctx.lookup_declaration(index).id, "y");
        // The displaced node keeps its stored index.
        assert_eq!(ctx.decl(old).index, index);
        assert_eq!(ctx.decl(new).index, index);
    }

    #[test]
    fn replace_type_carries_declaring_declaration() {
        let mut ctx = AstContext::new();
        let old_ty = ctx.new_type(Ty::Bytes, Location::none());
        let index = ctx.register_type(old_ty);
        ctx.type_node_mut(old_ty).declaration = DeclarationIndex::new(3);
        let new_ty = ctx.new_type(Ty::Stream, Location::none());
        ctx.replace_type(index, new_ty);
        assert_eq!(ctx.lookup_type(index).ty, Ty::Stream);
        assert_eq!(ctx.type_node(new_ty).declaration, DeclarationIndex::new(3));
    }

    #[test]
    fn unique_canonical_ids_get_serial_suffixes() {
        let mut ctx = AstContext::new();
        assert_eq!(ctx.unique_canonical_id("anon"), "anon");
        assert_eq!(ctx.unique_canonical_id("anon"), "anon_2");
        assert_eq!(ctx.unique_canonical_id("anon"), "anon_3");
        assert_eq!(ctx.unique_canonical_id("other"), "other");
    }

    #[test]
    fn scope_lookup_walks_outward() {
        let mut ctx = AstContext::new();
        let decl = constant(&mut ctx, "x");
        let index = ctx.register_declaration(decl);
        let root = ctx.root_scope();
        ctx.scope_mut(root).insert("x", index);
        let inner = ctx.new_scope(Some(root));
        let found = ctx.lookup_id(inner, "x");
        assert_eq!(found.single().map(|r| r.index), Some(index));
    }

    #[test]
    fn stop_marker_shadows_outer_scope() {
        let mut ctx = AstContext::new();
        let decl = constant(&mut ctx, "x");
        let index = ctx.register_declaration(decl);
        let root = ctx.root_scope();
        ctx.scope_mut(root).insert("x", index);
        let inner = ctx.new_scope(Some(root));
        ctx.scope_mut(inner).insert_stop("x");
        assert!(ctx.lookup_id(inner, "x").is_empty());
    }

    #[test]
    fn external_entries_respect_linkage() {
        let mut ctx = AstContext::new();
        let decl = constant(&mut ctx, "x");
        let index = ctx.register_declaration(decl);
        let scope = ctx.new_scope(None);
        ctx.scope_mut(scope).insert_external("x", index);
        // Private non-type declaration is invisible through an import.
        assert!(ctx.lookup_id(scope, "x").is_empty());
        ctx.lookup_declaration_mut(index).linkage = Linkage::Public;
        assert!(!ctx.lookup_id(scope, "x").is_empty());
    }
}
