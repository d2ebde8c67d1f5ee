//! The driver: the stable interface the CLI (and tests) program against.
//!
//! Operations: `parse_source`, `import_module`, `process_ast`,
//! `dependencies`, `emit`, and `linker_meta_data`. The driver owns the
//! context and operator registry, orchestrates the pass pipeline, and
//! holds the compiled IML modules until emission.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use serde::Serialize;

use crate::{
    ast::{
        context::{AstContext, Dialect, ModuleUid},
        node::ModuleId,
    },
    codegen::{self, ParserRecord},
    diagnostics::Diagnostic,
    iml::ImlModule,
    operators::Registry,
    optimizer, parse, resolver, validator,
};

/// Compilation switches.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Directories searched by `import_module`.
    pub import_paths: Vec<PathBuf>,
    /// Keep every field of every type: the public API is frozen, so the
    /// unused-field pass is skipped.
    pub strict_abi: bool,
    /// Skip the optimizer entirely.
    pub skip_optimizer: bool,
}

/// Linker metadata for one processed program, serialized as JSON.
#[derive(Debug, Serialize)]
pub struct LinkerMetaData {
    pub modules: Vec<LinkerModule>,
    pub parsers: Vec<ParserRecord>,
}

#[derive(Debug, Serialize)]
pub struct LinkerModule {
    pub uid: String,
    pub dependencies: Vec<String>,
}

/// The compiler driver.
pub struct Driver {
    ctx: AstContext,
    registry: Registry,
    options: CompilerOptions,
    compiled: AHashMap<String, ImlModule>,
    parsers: Vec<ParserRecord>,
    processed: bool,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}

impl Driver {
    pub fn new(options: CompilerOptions) -> Self {
        let ctx = AstContext::new();
        let registry = Registry::build(&ctx);
        Self {
            ctx,
            registry,
            options,
            compiled: AHashMap::new(),
            parsers: Vec::new(),
            processed: false,
        }
    }

    pub fn context(&self) -> &AstContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AstContext {
        &mut self.ctx
    }

    /// The accumulated user-facing diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.ctx.diagnostics.emitted()
    }

    pub fn has_errors(&self) -> bool {
        self.ctx.diagnostics.has_errors()
    }

    // ---------------------------------------------------------------
    // Source intake
    // ---------------------------------------------------------------

    /// Parses and registers a source file. Idempotent: a path already
    /// registered returns its existing module.
    pub fn parse_source(&mut self, path: &Path) -> Result<ModuleUid, ()> {
        if let Some(existing) = self.ctx.module_by_path(path) {
            return Ok(self.ctx.module(existing).uid.clone());
        }
        let Some(dialect) = Dialect::from_path(path) else {
            self.ctx.diagnostics.error(
                format!("unknown source extension: {}", path.display()),
                crate::ast::node::Location::none(),
            );
            return Err(());
        };
        let source = std::fs::read_to_string(path).map_err(|err| {
            self.ctx.diagnostics.error(
                format!("cannot read {}: {err}", path.display()),
                crate::ast::node::Location::none(),
            );
        })?;
        self.parse_string(&source, path, dialect)
    }

    /// Parses in-memory source registered under `path`.
    pub fn parse_string(&mut self, source: &str, path: &Path, dialect: Dialect) -> Result<ModuleUid, ()> {
        if let Some(existing) = self.ctx.module_by_path(path) {
            return Ok(self.ctx.module(existing).uid.clone());
        }
        let module = parse::parse_module(&mut self.ctx, source, path, dialect)?;
        tracing::debug!(uid = %self.ctx.module(module).uid, "parsed module");
        Ok(self.ctx.module(module).uid.clone())
    }

    /// Locates `id` in the import search paths and parses it.
    pub fn import_module(&mut self, id: &str, search_scope: Option<&str>) -> Result<ModuleUid, ()> {
        if let Some(existing) = self.ctx.module_by_id(id, search_scope) {
            return Ok(self.ctx.module(existing).uid.clone());
        }
        let mut candidates = Vec::new();
        for dir in &self.options.import_paths {
            for ext in ["sdl", "hlt"] {
                let mut path = dir.clone();
                if let Some(scope) = search_scope {
                    path.push(scope);
                }
                path.push(format!("{id}.{ext}"));
                candidates.push(path);
            }
        }
        for candidate in candidates {
            if candidate.is_file() {
                return self.parse_source(&candidate);
            }
        }
        self.ctx.diagnostics.error(
            format!("cannot find module '{id}' in import paths"),
            crate::ast::node::Location::none(),
        );
        Err(())
    }

    // ---------------------------------------------------------------
    // Pipeline
    // ---------------------------------------------------------------

    /// Runs the full pass pipeline: resolve to fixed point, validate,
    /// optimize, build productions, generate IML.
    pub fn process_ast(&mut self) -> Result<(), ()> {
        if self.processed {
            return if self.has_errors() { Err(()) } else { Ok(()) };
        }
        self.processed = true;

        resolver::resolve(&mut self.ctx, &self.registry)?;
        validator::validate(&mut self.ctx, &self.registry);
        if self.has_errors() {
            return Err(());
        }

        if !self.options.strict_abi && !self.options.skip_optimizer {
            let changed = optimizer::remove_unused_fields(&mut self.ctx, &self.registry);
            tracing::debug!(changed, "unused-field pass done");
        }

        let modules: Vec<ModuleId> = self.ctx.modules().map(|(id, _)| id).collect();
        for module in modules {
            let output = codegen::compile_module(&mut self.ctx, &self.registry, module);
            self.compiled.insert(output.module.id.clone(), output.module);
            self.parsers.extend(output.parsers);
        }

        if self.has_errors() {
            return Err(());
        }
        Ok(())
    }

    /// Modules `uid` depends on, directly or (with `recursive`)
    /// transitively.
    pub fn dependencies(&self, uid: &ModuleUid, recursive: bool) -> Vec<ModuleUid> {
        self.ctx.dependencies(uid, recursive)
    }

    /// Renders the compiled IML for a module by name.
    pub fn emit(&self, module: &str) -> Option<String> {
        self.compiled.get(module).map(ToString::to_string)
    }

    /// Every compiled module name, sorted.
    pub fn compiled_modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.compiled.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Parser registry entries produced by codegen.
    pub fn parsers(&self) -> &[ParserRecord] {
        &self.parsers
    }

    /// The linker metadata record, as JSON.
    pub fn linker_meta_data(&self) -> serde_json::Value {
        let modules = self
            .ctx
            .modules()
            .map(|(_, m)| LinkerModule {
                uid: m.uid.to_string(),
                dependencies: self
                    .ctx
                    .dependencies(&m.uid, false)
                    .into_iter()
                    .map(|d| d.to_string())
                    .collect(),
            })
            .collect();
        let meta = LinkerMetaData {
            modules,
            parsers: self.parsers.clone(),
        };
        serde_json::to_value(meta).expect("linker metadata serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with(source: &str) -> Driver {
        let mut driver = Driver::default();
        driver
            .parse_string(source, Path::new("test.sdl"), Dialect::Sdl)
            .expect("parse");
        driver
    }

    #[test]
    fn process_and_emit_simple_unit() {
        let mut driver = driver_with("module Proto;\npublic type Message = unit { x: bytes &size=4; };");
        driver.process_ast().unwrap_or_else(|()| {
            panic!("diagnostics: {:?}", driver.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>())
        });
        let text = driver.emit("Proto").expect("compiled module");
        assert!(text.contains("module Proto;"));
        assert!(text.contains("Proto::Message::parse"));
        assert!(text.contains("sdlc_rt::wait_for_input"));
    }

    #[test]
    fn public_units_produce_registry_records() {
        let mut driver = driver_with(
            "module Proto;\npublic type Message = unit { %mime-type = \"app/test\"; x: bytes &size=1; };",
        );
        driver.process_ast().expect("process");
        assert_eq!(driver.parsers().len(), 1);
        assert_eq!(driver.parsers()[0].name, "Proto::Message");
        assert_eq!(driver.parsers()[0].mime_types, vec!["app/test".to_owned()]);
        let meta = driver.linker_meta_data();
        assert_eq!(meta["parsers"][0]["name"], "Proto::Message");
    }

    #[test]
    fn private_units_stay_out_of_the_registry() {
        let mut driver = driver_with("module Proto;\ntype Message = unit { x: bytes &size=1; };");
        driver.process_ast().expect("process");
        assert!(driver.parsers().is_empty());
    }

    #[test]
    fn processing_is_idempotent() {
        let mut driver = driver_with("module Proto;\npublic type M = unit { x: uint8; };");
        driver.process_ast().expect("first");
        driver.process_ast().expect("second");
        assert_eq!(driver.parsers().len(), 1);
    }

    #[test]
    fn errors_surface_through_process() {
        let mut driver = driver_with("module Proto;\ntype M = unit { x: bytes; };");
        assert!(driver.process_ast().is_err());
        assert!(driver.has_errors());
    }

    #[test]
    fn literal_unit_compiles_to_literal_match() {
        let mut driver = driver_with("module Proto;\npublic type M = unit { x: b\"HELLO\"; };");
        driver.process_ast().expect("process");
        let text = driver.emit("Proto").expect("module");
        assert!(text.contains("b\"HELLO\""), "emitted: {text}");
        assert!(text.contains("expecting 5 bytes"), "emitted: {text}");
    }

    #[test]
    fn vector_loop_compiles_with_count() {
        let mut driver = driver_with(
            "module Proto;\npublic type M = unit { n: uint8; xs: uint16[n] &byte-order=Big; };",
        );
        driver.process_ast().expect("process");
        let text = driver.emit("Proto").expect("module");
        assert!(text.contains("unpack<uint16>"), "emitted: {text}");
        assert!(text.contains("ByteOrder::Big"), "emitted: {text}");
        assert!(text.contains("push_back"), "emitted: {text}");
    }
}
