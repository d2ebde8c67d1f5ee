//! The global parser registry.
//!
//! Every compiled unit with public linkage registers an entry with enough
//! metadata for lookup by name, by MIME type, and by port. Entries carry the
//! linker scope of their module so that private parsers of other modules are
//! filtered out of cross-module lookups.
//!
//! The registry is module-level state. Generated modules register their
//! parsers from an explicit `register_parsers`-style constructor invoked by
//! the driver at startup; tests register hand-built parsers directly.

use std::{
    fmt,
    sync::{Mutex, OnceLock},
};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::runtime::{
    error::{RtResult, RuntimeError},
    fiber::Parse,
    net::{Direction, Port},
    sink::SinkHooks,
};

/// A MIME type in `main/sub` form. Either part may be the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MimeType {
    pub main: String,
    pub sub: String,
}

impl MimeType {
    pub fn new(main: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            sub: sub.into(),
        }
    }

    /// Parses the `main/sub` form; both parts must be non-empty.
    pub fn parse(text: &str) -> RtResult<Self> {
        match text.split_once('/') {
            Some((main, sub)) if !main.is_empty() && !sub.is_empty() => Ok(Self::new(main, sub)),
            _ => Err(RuntimeError::invalid_value(format!("invalid MIME type {text:?}"))),
        }
    }

    /// The registry key: wildcards kept verbatim.
    pub fn key(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main, self.sub)
    }
}

/// A port a parser advertises itself for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub port: Port,
    pub direction: Direction,
}

/// A freshly instantiated unit parser ready to connect to a sink.
pub struct ConnectedUnit {
    pub parser: Box<dyn Parse>,
    pub hooks: Option<Box<dyn SinkHooks>>,
}

type Instantiate = Box<dyn Fn() -> ConnectedUnit + Send>;

/// Registry entry for one compiled unit parser.
pub struct ParserMetadata {
    /// Canonical unit name.
    pub name: String,
    pub description: String,
    pub mime_types: Vec<MimeType>,
    pub ports: Vec<PortSpec>,
    pub is_public: bool,
    /// Scope tag of the producing module's link unit.
    pub linker_scope: u64,
    /// Creates a fresh parser instance for sink connection.
    pub instantiate: Instantiate,
}

impl fmt::Debug for ParserMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserMetadata")
            .field("name", &self.name)
            .field("mime_types", &self.mime_types)
            .field("ports", &self.ports)
            .field("is_public", &self.is_public)
            .field("linker_scope", &self.linker_scope)
            .finish_non_exhaustive()
    }
}

/// Lookup tables over all registered parsers.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<ParserMetadata>,
    by_name: AHashMap<String, usize>,
    by_mime_type: AHashMap<String, Vec<usize>>,
}

impl ParserRegistry {
    pub fn register(&mut self, metadata: ParserMetadata) {
        let index = self.parsers.len();
        self.by_name.insert(metadata.name.clone(), index);
        for mt in &metadata.mime_types {
            self.by_mime_type.entry(mt.key()).or_default().push(index);
        }
        self.parsers.push(metadata);
    }

    /// Looks up a parser by canonical name. Private parsers resolve only
    /// within their own linker scope.
    pub fn by_name(&self, name: &str, scope: u64) -> Option<&ParserMetadata> {
        let p = self.by_name.get(name).map(|&i| &self.parsers[i])?;
        (p.is_public || p.linker_scope == scope).then_some(p)
    }

    /// All parsers advertised for `mt` exactly (no wildcard fallback here;
    /// the sink applies the `main/*` and `*/*` fallbacks itself).
    pub fn by_mime_type(&self, mt: &MimeType, scope: u64) -> Vec<&ParserMetadata> {
        self.by_mime_type
            .get(&mt.key())
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &self.parsers[i])
                    .filter(|p| p.is_public || p.linker_scope == scope)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All parsers advertised for `port`, honoring direction.
    pub fn by_port(&self, port: Port, direction: Direction, scope: u64) -> Vec<&ParserMetadata> {
        self.parsers
            .iter()
            .filter(|p| p.is_public || p.linker_scope == scope)
            .filter(|p| {
                p.ports
                    .iter()
                    .any(|spec| spec.port == port && directions_compatible(spec.direction, direction))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn clear(&mut self) {
        self.parsers.clear();
        self.by_name.clear();
        self.by_mime_type.clear();
    }
}

fn directions_compatible(advertised: Direction, requested: Direction) -> bool {
    matches!(advertised, Direction::Both | Direction::Undef)
        || matches!(requested, Direction::Both | Direction::Undef)
        || advertised == requested
}

static GLOBAL: OnceLock<Mutex<ParserRegistry>> = OnceLock::new();

/// Runs `f` with the global registry locked.
pub fn with_registry<R>(f: impl FnOnce(&mut ParserRegistry) -> R) -> R {
    let mutex = GLOBAL.get_or_init(|| Mutex::new(ParserRegistry::default()));
    let mut guard = mutex.lock().expect("parser registry lock poisoned");
    f(&mut guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        error::RtResult,
        fiber::FiberStatus,
        stream::Stream,
    };

    struct Nop;

    impl Parse for Nop {
        fn resume(&mut self, _input: &mut Stream) -> RtResult<FiberStatus> {
            Ok(FiberStatus::Done)
        }
    }

    fn entry(name: &str, public: bool, scope: u64, mime: &[&str]) -> ParserMetadata {
        ParserMetadata {
            name: name.to_owned(),
            description: String::new(),
            mime_types: mime.iter().map(|m| MimeType::parse(m).unwrap()).collect(),
            ports: vec![],
            is_public: public,
            linker_scope: scope,
            instantiate: Box::new(|| ConnectedUnit {
                parser: Box::new(Nop),
                hooks: None,
            }),
        }
    }

    #[test]
    fn mime_type_requires_main_and_sub() {
        assert!(MimeType::parse("text/plain").is_ok());
        assert!(MimeType::parse("text").is_err());
        assert!(MimeType::parse("/plain").is_err());
    }

    #[test]
    fn private_parsers_hidden_across_scopes() {
        let mut reg = ParserRegistry::default();
        reg.register(entry("mine", false, 7, &[]));
        assert!(reg.by_name("mine", 7).is_some());
        assert!(reg.by_name("mine", 8).is_none());
    }

    #[test]
    fn mime_lookup_filters_scope() {
        let mut reg = ParserRegistry::default();
        reg.register(entry("pub", true, 1, &["text/plain"]));
        reg.register(entry("priv", false, 1, &["text/plain"]));
        let mt = MimeType::parse("text/plain").unwrap();
        assert_eq!(reg.by_mime_type(&mt, 1).len(), 2);
        assert_eq!(reg.by_mime_type(&mt, 2).len(), 1);
    }
}
