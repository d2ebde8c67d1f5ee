//! Unit items: fields, variables, sinks, switches, properties, hooks, and
//! the attribute vocabulary.

use smallvec::SmallVec;
use strum::{Display, EnumString, IntoStaticStr};

use crate::ast::node::{DeclId, ExprId, HookId, ItemId, Location, StmtId, TypeId, TypeIndex};

/// Field and type attributes (`&size=`, `&until=`, …).
///
/// The strum serialization carries the surface spelling, so parsing and
/// diagnostics round-trip through the same names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum AttributeKind {
    #[strum(serialize = "&size")]
    Size,
    #[strum(serialize = "&count")]
    Count,
    #[strum(serialize = "&eod")]
    Eod,
    #[strum(serialize = "&until")]
    Until,
    #[strum(serialize = "&until-including")]
    UntilIncluding,
    #[strum(serialize = "&while")]
    While,
    #[strum(serialize = "&chunked")]
    Chunked,
    #[strum(serialize = "&convert")]
    Convert,
    #[strum(serialize = "&parse-from")]
    ParseFrom,
    #[strum(serialize = "&parse-at")]
    ParseAt,
    #[strum(serialize = "&type")]
    Type,
    #[strum(serialize = "&ipv4")]
    IPv4,
    #[strum(serialize = "&ipv6")]
    IPv6,
    #[strum(serialize = "&byte-order")]
    ByteOrder,
    #[strum(serialize = "&bit-order")]
    BitOrder,
    #[strum(serialize = "&try")]
    Try,
    #[strum(serialize = "&requires")]
    Requires,
    #[strum(serialize = "&default")]
    Default,
    #[strum(serialize = "&optional")]
    Optional,
    #[strum(serialize = "&no-emit")]
    NoEmit,
    #[strum(serialize = "&always-emit")]
    AlwaysEmit,
    #[strum(serialize = "&needed-by-feature")]
    NeededByFeature,
    #[strum(serialize = "&synchronize-at")]
    SynchronizeAt,
    #[strum(serialize = "&synchronize-after")]
    SynchronizeAfter,
    #[strum(serialize = "&cxxname")]
    Cxxname,
    #[strum(serialize = "&static")]
    Static,
}

/// One attribute instance, optionally carrying a value expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub kind: AttributeKind,
    pub value: Option<ExprId>,
    pub location: Location,
}

/// An ordered attribute collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeSet(SmallVec<[Attribute; 4]>);

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attribute: Attribute) {
        self.0.push(attribute);
    }

    pub fn has(&self, kind: AttributeKind) -> bool {
        self.0.iter().any(|a| a.kind == kind)
    }

    pub fn find(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.0.iter().find(|a| a.kind == kind)
    }

    pub fn value_of(&self, kind: AttributeKind) -> Option<ExprId> {
        self.find(kind).and_then(|a| a.value)
    }

    pub fn remove(&mut self, kind: AttributeKind) {
        self.0.retain(|a| a.kind != kind);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Unit properties (`%byte-order`, `%mime-type`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum PropertyKind {
    #[strum(serialize = "%byte-order")]
    ByteOrder,
    #[strum(serialize = "%bit-order")]
    BitOrder,
    #[strum(serialize = "%description")]
    Description,
    #[strum(serialize = "%mime-type")]
    MimeType,
    #[strum(serialize = "%port")]
    Port,
    #[strum(serialize = "%random-access")]
    RandomAccess,
    #[strum(serialize = "%filter")]
    Filter,
    #[strum(serialize = "%context")]
    Context,
    #[strum(serialize = "%sync-advance-block-size")]
    SyncAdvanceBlockSize,
}

/// Flavor of a hook body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum HookFlavor {
    #[default]
    Standard,
    /// Runs once per container element; `$$` is the element.
    Foreach,
}

/// Special unit hooks recognized by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum SpecialHook {
    #[strum(serialize = "%init")]
    Init,
    #[strum(serialize = "%done")]
    Done,
    #[strum(serialize = "%error")]
    Error,
    #[strum(serialize = "%print")]
    Print,
}

/// A hook body attached to a unit or field.
#[derive(Debug, Clone)]
pub struct Hook {
    pub flavor: HookFlavor,
    /// For external hooks (`on Unit::field { … }`): the dotted path as
    /// written; empty for inline hooks.
    pub path: Vec<String>,
    /// The unit type the hook binds to; stamped during resolution.
    pub unit: TypeIndex,
    /// The field the hook is attached to, if any.
    pub field: Option<ItemId>,
    /// The special hook this body implements, if recognized by name.
    pub special: Option<SpecialHook>,
    pub params: Vec<DeclId>,
    pub body: StmtId,
    /// The `$$` type visible inside the body; stamped during resolution.
    pub dd_type: Option<TypeId>,
    /// Result type, for hooks that return a value (`%print`).
    pub result: Option<TypeId>,
    /// Scope holding the hook's parameters; created during resolution.
    pub scope: Option<crate::ast::node::ScopeId>,
    pub location: Location,
}

/// A parsed field of a unit.
#[derive(Debug, Clone)]
pub struct UnitField {
    /// Anonymous fields carry no ID.
    pub id: Option<String>,
    /// The type expression as written (before parse/item derivation).
    pub original_ty: Option<TypeId>,
    /// A literal ctor field (`x: b"HELLO"`), if the field matches a
    /// constant instead of a type.
    pub ctor: Option<ExprId>,
    /// How bytes are read; derived by the resolver.
    pub parse_ty: Option<TypeId>,
    /// The field's value type after `&convert`; derived by the resolver.
    pub item_ty: Option<TypeId>,
    /// The `$$` type visible to this field's hooks; derived by the resolver.
    pub dd_ty: Option<TypeId>,
    /// Repeat-count expression for `T[n]` container fields.
    pub repeat: Option<ExprId>,
    /// True for `x: T[]`-style container fields.
    pub is_container: bool,
    /// Declared with `skip`.
    pub is_skip: bool,
    /// No struct member is generated for transient fields; normalized once
    /// during the first resolver pass.
    pub is_transient: bool,
    pub attributes: AttributeSet,
    /// `if` guard condition.
    pub condition: Option<ExprId>,
    /// Sinks this field's data is forwarded to.
    pub sinks: Vec<ExprId>,
    /// Inline hooks.
    pub hooks: Vec<HookId>,
    /// Nested anonymous item (inline switch or unit).
    pub inner: Option<ItemId>,
    pub location: Location,
}

impl UnitField {
    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }
}

/// One case of a unit-level `switch` item.
#[derive(Debug, Clone)]
pub struct UnitSwitchCase {
    /// Empty for the default case.
    pub exprs: Vec<ExprId>,
    pub items: Vec<ItemId>,
    pub location: Location,
}

/// A unit-level `switch` dispatching on an expression or on look-ahead.
#[derive(Debug, Clone)]
pub struct UnitSwitch {
    /// Absent for look-ahead switches.
    pub cond: Option<ExprId>,
    pub cases: Vec<UnitSwitchCase>,
    pub condition: Option<ExprId>,
    pub location: Location,
}

/// Items of a unit, in declaration order.
#[derive(Debug, Clone)]
pub enum UnitItem {
    Field(UnitField),
    /// A named state variable, not parsed from input.
    Variable {
        id: String,
        ty: TypeId,
        default: Option<ExprId>,
        attributes: AttributeSet,
        location: Location,
    },
    Sink {
        id: String,
        location: Location,
    },
    Property {
        kind: PropertyKind,
        value: Option<ExprId>,
        location: Location,
    },
    UnitHook {
        hook: HookId,
        location: Location,
    },
    Switch(UnitSwitch),
    /// A field whose ID has not yet been resolved to a type or constant;
    /// promoted to `Field` by the resolver.
    UnresolvedField {
        id: Option<String>,
        referenced: String,
        attributes: AttributeSet,
        condition: Option<ExprId>,
        sinks: Vec<ExprId>,
        hooks: Vec<HookId>,
        repeat: Option<ExprId>,
        is_container: bool,
        is_skip: bool,
        location: Location,
    },
}

impl UnitItem {
    pub fn location(&self) -> &Location {
        match self {
            Self::Field(f) => &f.location,
            Self::Variable { location, .. }
            | Self::Sink { location, .. }
            | Self::Property { location, .. }
            | Self::UnitHook { location, .. }
            | Self::UnresolvedField { location, .. } => location,
            Self::Switch(s) => &s.location,
        }
    }

    pub fn as_field(&self) -> Option<&UnitField> {
        match self {
            Self::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_field_mut(&mut self) -> Option<&mut UnitField> {
        match self {
            Self::Field(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_names_round_trip() {
        let name: &'static str = AttributeKind::UntilIncluding.into();
        assert_eq!(name, "&until-including");
        assert_eq!("&parse-from".parse::<AttributeKind>().unwrap(), AttributeKind::ParseFrom);
        assert!("&bogus".parse::<AttributeKind>().is_err());
    }

    #[test]
    fn property_names_round_trip() {
        assert_eq!("%mime-type".parse::<PropertyKind>().unwrap(), PropertyKind::MimeType);
        let name: &'static str = PropertyKind::SyncAdvanceBlockSize.into();
        assert_eq!(name, "%sync-advance-block-size");
    }

    #[test]
    fn special_hooks_recognized_by_name() {
        assert_eq!("%error".parse::<SpecialHook>().unwrap(), SpecialHook::Error);
        assert!("%bogus".parse::<SpecialHook>().is_err());
    }
}
