#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts follow wire formats")]
#![expect(clippy::cast_possible_wrap, reason = "two's-complement casts are intentional")]
#![expect(clippy::must_use_candidate, reason = "builder-style APIs read better unannotated")]
#![expect(clippy::missing_panics_doc, reason = "panics mark internal invariants")]
#![expect(clippy::module_name_repetitions, reason = "types are re-exported at the crate root")]

//! A compiler toolchain and runtime for SDL, a declarative
//! parser-description language, and IML, its imperative intermediate
//! language.
//!
//! The compiler side ingests SDL/IML source, drives it through a
//! fixed-point resolver, validation, and optimization, and generates
//! explicit parse-state machines as IML for an external native back-end.
//! The runtime side provides the value types, cooperative parser fibers,
//! and the out-of-order stream-reassembly sink that generated parsers
//! link against.

pub mod ast;
pub mod coercion;
pub mod codegen;
pub mod diagnostics;
pub mod driver;
pub mod folder;
pub mod iml;
pub mod lexer;
pub mod normalizer;
pub mod operators;
pub mod optimizer;
pub mod parse;
pub mod production;
pub mod resolver;
pub mod runtime;
pub mod validator;
mod visit;

pub use crate::{
    ast::{AstContext, Dialect, ModuleUid},
    diagnostics::{Diagnostic, Diagnostics, Priority, Severity},
    driver::{CompilerOptions, Driver, LinkerMetaData},
    iml::{ImlBlock, ImlExpr, ImlFunction, ImlModule, ImlStmt, ImlType},
    operators::{OperatorKind, Registry},
    production::{GrammarBuilder, LoopBound, Production},
    runtime::{
        memory_statistics, Bytes, ErrorKind, Fiber, FiberStatus, MatchState, MimeType, Parse, ReassemblerPolicy,
        RegExp, RtResult, RuntimeError, Sink, SinkHooks, Stream, StreamIter, View,
    },
};
