//! The unqualified type catalogue and qualified-type wrapper.

use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::ast::node::{DeclId, DeclarationIndex, ExprId, ItemId, Location, TypeId, TypeIndex};

/// Constness of a qualified type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Constness {
    Const,
    Mutable,
}

/// Which side of an assignment a qualified type may stand on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Side {
    Lhs,
    Rhs,
}

/// A type reference together with constness and side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualifiedType {
    pub ty: TypeId,
    pub constness: Constness,
    pub side: Side,
}

impl QualifiedType {
    pub fn const_rhs(ty: TypeId) -> Self {
        Self {
            ty,
            constness: Constness::Const,
            side: Side::Rhs,
        }
    }

    pub fn mutable_rhs(ty: TypeId) -> Self {
        Self {
            ty,
            constness: Constness::Mutable,
            side: Side::Rhs,
        }
    }

    pub fn mutable_lhs(ty: TypeId) -> Self {
        Self {
            ty,
            constness: Constness::Mutable,
            side: Side::Lhs,
        }
    }

    pub fn is_const(self) -> bool {
        self.constness == Constness::Const
    }

    #[must_use]
    pub fn as_const(self) -> Self {
        Self {
            constness: Constness::Const,
            ..self
        }
    }

    #[must_use]
    pub fn as_mutable(self) -> Self {
        Self {
            constness: Constness::Mutable,
            ..self
        }
    }
}

/// Flavor of a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FunctionFlavor {
    Plain,
    Hook,
    Method,
}

/// One parameter of a function type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParam {
    pub id: String,
    pub ty: TypeId,
    /// Parameters are read-only unless declared `inout`.
    pub inout: bool,
    pub default: Option<ExprId>,
}

/// A callable's type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub flavor: FunctionFlavor,
    pub params: Vec<FunctionParam>,
    pub result: TypeId,
    pub result_constness: Constness,
}

/// One named bit range of a bitfield, `lower..=upper` within the word.
#[derive(Debug, Clone, PartialEq)]
pub struct BitRange {
    pub id: String,
    pub lower: u16,
    pub upper: u16,
    /// Expected constant value, when the range participates in literal
    /// matching (anonymous bitfield fields with fixed bits).
    pub expected: Option<ExprId>,
}

/// A fixed-width bitfield type.
#[derive(Debug, Clone, PartialEq)]
pub struct BitfieldType {
    pub width: u16,
    pub bits: Vec<BitRange>,
}

impl BitfieldType {
    pub fn bit(&self, id: &str) -> Option<&BitRange> {
        self.bits.iter().find(|b| b.id == id)
    }
}

/// An enumeration type. The `Undef` label is implicit in lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub id: String,
    pub labels: Vec<(String, i64)>,
}

impl EnumType {
    pub fn label_value(&self, label: &str) -> Option<i64> {
        self.labels.iter().find(|(id, _)| id == label).map(|(_, v)| *v)
    }
}

/// A plain record type. Fields are `Field` declarations in the context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructType {
    pub fields: Vec<DeclId>,
    /// Type parameters accepted at construction (`&cxxname` interop).
    pub params: Vec<DeclId>,
}

/// A unit type: a record of fields plus a parse procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitType {
    pub id: String,
    /// The implicit `self` parameter declaration; unset while the type is
    /// still a template.
    pub self_decl: DeclarationIndex,
    pub params: Vec<DeclId>,
    pub items: Vec<ItemId>,
    /// True once the unit advertises `%random-access`.
    pub random_access: bool,
    /// True once the unit advertises `%filter`.
    pub is_filter: bool,
    /// True if the unit may be connected to a sink.
    pub supports_sinks: bool,
    /// The `%context` type, if declared.
    pub context: Option<TypeId>,
}

impl UnitType {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            self_decl: DeclarationIndex::NONE,
            params: Vec::new(),
            items: Vec::new(),
            random_access: false,
            is_filter: false,
            supports_sinks: true,
            context: None,
        }
    }
}

/// Tag set for quick kind dispatch without matching the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum TypeTag {
    Bool,
    SignedInteger,
    UnsignedInteger,
    Real,
    Address,
    Port,
    Interval,
    Time,
    String,
    Bytes,
    Stream,
    StreamView,
    StreamIter,
    RegExp,
    Bitfield,
    Enum,
    Error,
    Null,
    Void,
    Tuple,
    Struct,
    Union,
    Optional,
    Result,
    Vector,
    List,
    Set,
    Map,
    StrongReference,
    WeakReference,
    ValueReference,
    Function,
    Unit,
    Sink,
    Auto,
    Unknown,
    Any,
    Member,
    Library,
    OperandList,
    Name,
}

/// An unqualified type.
#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    // Value types.
    Bool,
    SignedInteger(u16),
    UnsignedInteger(u16),
    Real,
    Address,
    Port,
    Interval,
    Time,
    String,
    Bytes,
    Stream,
    StreamView,
    StreamIter,
    RegExp,
    Bitfield(BitfieldType),
    Enum(EnumType),
    Error,
    Null,
    Void,

    // Composite types.
    Tuple(Vec<TypeId>),
    Struct(StructType),
    Union(StructType),
    Optional(TypeId),
    Result(TypeId),
    Vector(TypeId),
    List(TypeId),
    Set(TypeId),
    Map(TypeId, TypeId),
    StrongReference(TypeId),
    WeakReference(TypeId),
    ValueReference(TypeId),

    // Callables.
    Function(FunctionType),

    // Parser-specific types.
    Unit(UnitType),
    Sink,

    // Meta types.
    Auto,
    Unknown,
    Any,
    /// A member-name operand in an operator signature.
    Member(String),
    /// An opaque type provided by the runtime library.
    Library(String),
    /// The parameter list of a call operand.
    OperandList,
    /// A not-yet-resolved type reference by name.
    Name {
        id: String,
        resolved: TypeIndex,
    },
}

impl Ty {
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Bool => TypeTag::Bool,
            Self::SignedInteger(_) => TypeTag::SignedInteger,
            Self::UnsignedInteger(_) => TypeTag::UnsignedInteger,
            Self::Real => TypeTag::Real,
            Self::Address => TypeTag::Address,
            Self::Port => TypeTag::Port,
            Self::Interval => TypeTag::Interval,
            Self::Time => TypeTag::Time,
            Self::String => TypeTag::String,
            Self::Bytes => TypeTag::Bytes,
            Self::Stream => TypeTag::Stream,
            Self::StreamView => TypeTag::StreamView,
            Self::StreamIter => TypeTag::StreamIter,
            Self::RegExp => TypeTag::RegExp,
            Self::Bitfield(_) => TypeTag::Bitfield,
            Self::Enum(_) => TypeTag::Enum,
            Self::Error => TypeTag::Error,
            Self::Null => TypeTag::Null,
            Self::Void => TypeTag::Void,
            Self::Tuple(_) => TypeTag::Tuple,
            Self::Struct(_) => TypeTag::Struct,
            Self::Union(_) => TypeTag::Union,
            Self::Optional(_) => TypeTag::Optional,
            Self::Result(_) => TypeTag::Result,
            Self::Vector(_) => TypeTag::Vector,
            Self::List(_) => TypeTag::List,
            Self::Set(_) => TypeTag::Set,
            Self::Map(_, _) => TypeTag::Map,
            Self::StrongReference(_) => TypeTag::StrongReference,
            Self::WeakReference(_) => TypeTag::WeakReference,
            Self::ValueReference(_) => TypeTag::ValueReference,
            Self::Function(_) => TypeTag::Function,
            Self::Unit(_) => TypeTag::Unit,
            Self::Sink => TypeTag::Sink,
            Self::Auto => TypeTag::Auto,
            Self::Unknown => TypeTag::Unknown,
            Self::Any => TypeTag::Any,
            Self::Member(_) => TypeTag::Member,
            Self::Library(_) => TypeTag::Library,
            Self::OperandList => TypeTag::OperandList,
            Self::Name { .. } => TypeTag::Name,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::SignedInteger(_) | Self::UnsignedInteger(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::StrongReference(_) | Self::WeakReference(_) | Self::ValueReference(_)
        )
    }

    /// The referenced type for reference types, the element for
    /// optional/result wrappers.
    pub fn dereferenced(&self) -> Option<TypeId> {
        match self {
            Self::StrongReference(t)
            | Self::WeakReference(t)
            | Self::ValueReference(t)
            | Self::Optional(t)
            | Self::Result(t) => Some(*t),
            _ => None,
        }
    }

    /// The element type of iterable containers.
    pub fn element(&self) -> Option<TypeId> {
        match self {
            Self::Vector(t) | Self::List(t) | Self::Set(t) => Some(*t),
            _ => None,
        }
    }

    /// True for types a variable or parameter may have.
    pub fn is_allocable(&self) -> bool {
        !matches!(
            self,
            Self::Void | Self::Auto | Self::Unknown | Self::Member(_) | Self::OperandList | Self::Null
        )
    }
}

/// A type node in the arena: the type plus its registration state.
#[derive(Debug, Clone)]
pub struct TypeNode {
    pub ty: Ty,
    /// Assigned on registration; `NONE` until then.
    pub index: TypeIndex,
    /// The type declaration this type belongs to, if any. Updated when a
    /// type declaration's type is replaced.
    pub declaration: DeclarationIndex,
    pub location: Location,
}

impl TypeNode {
    pub fn new(ty: Ty, location: Location) -> Self {
        Self {
            ty,
            index: TypeIndex::NONE,
            declaration: DeclarationIndex::NONE,
            location,
        }
    }
}

/// Widths accepted for integer types.
pub const INTEGER_WIDTHS: [u16; 4] = [8, 16, 32, 64];

/// Renders a type for diagnostics.
pub fn render(ctx: &crate::ast::context::AstContext, id: TypeId) -> String {
    let id = ctx.resolve_type(id);
    match ctx.ty(id) {
        Ty::Bool => "bool".into(),
        Ty::SignedInteger(w) => format!("int{w}"),
        Ty::UnsignedInteger(w) => format!("uint{w}"),
        Ty::Real => "real".into(),
        Ty::Address => "addr".into(),
        Ty::Port => "port".into(),
        Ty::Interval => "interval".into(),
        Ty::Time => "time".into(),
        Ty::String => "string".into(),
        Ty::Bytes => "bytes".into(),
        Ty::Stream => "stream".into(),
        Ty::StreamView => "view".into(),
        Ty::StreamIter => "iterator".into(),
        Ty::RegExp => "regexp".into(),
        Ty::Bitfield(bf) => format!("bitfield({})", bf.width),
        Ty::Enum(e) => format!("enum {}", e.id),
        Ty::Error => "error".into(),
        Ty::Null => "null".into(),
        Ty::Void => "void".into(),
        Ty::Tuple(elems) => {
            let inner: Vec<String> = elems.iter().map(|&e| render(ctx, e)).collect();
            format!("tuple<{}>", inner.join(", "))
        }
        Ty::Struct(_) => "struct".into(),
        Ty::Union(_) => "union".into(),
        Ty::Optional(t) => format!("optional<{}>", render(ctx, *t)),
        Ty::Result(t) => format!("result<{}>", render(ctx, *t)),
        Ty::Vector(t) => format!("vector<{}>", render(ctx, *t)),
        Ty::List(t) => format!("list<{}>", render(ctx, *t)),
        Ty::Set(t) => format!("set<{}>", render(ctx, *t)),
        Ty::Map(k, v) => format!("map<{}, {}>", render(ctx, *k), render(ctx, *v)),
        Ty::StrongReference(t) => format!("strong_ref<{}>", render(ctx, *t)),
        Ty::WeakReference(t) => format!("weak_ref<{}>", render(ctx, *t)),
        Ty::ValueReference(t) => format!("value_ref<{}>", render(ctx, *t)),
        Ty::Function(_) => "function".into(),
        Ty::Unit(u) => format!("unit {}", u.id),
        Ty::Sink => "sink".into(),
        Ty::Auto => "auto".into(),
        Ty::Unknown => "<unknown>".into(),
        Ty::Any => "any".into(),
        Ty::Member(m) => format!("<member {m}>"),
        Ty::Library(l) => format!("<library {l}>"),
        Ty::OperandList => "<operand-list>".into(),
        Ty::Name { id, .. } => id.clone(),
    }
}

/// Operand list used by operator signatures: at most three positional
/// operands, stored inline.
pub type OperandTypes = SmallVec<[TypeId; 3]>;
