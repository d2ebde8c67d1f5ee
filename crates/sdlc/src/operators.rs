//! The operator registry.
//!
//! Every built-in operator is a data record: a kind, an operand signature
//! (up to three positional operands; method calls add named parameters), a
//! result rule, and a priority. The resolver enumerates candidates by kind
//! and matches operands through the coercion engine.
//!
//! Signature types are resolved against the context's standard types when
//! the registry is built; this must succeed for every built-in operator
//! before resolution begins.

use ahash::AHashMap;
use strum::{Display, IntoStaticStr};

use crate::ast::{
    context::AstContext,
    expr::ExprKind,
    node::{ExprId, TypeId},
    types::{Constness, QualifiedType, Ty, TypeTag},
    unit::UnitItem,
};

/// The closed set of operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum OperatorKind {
    Add,
    Begin,
    BitAnd,
    BitOr,
    BitXor,
    Call,
    Cast,
    CustomAssign,
    DecrPre,
    DecrPost,
    Delete,
    Deref,
    Difference,
    DifferenceAssign,
    Division,
    DivisionAssign,
    Equal,
    End,
    Greater,
    GreaterEqual,
    HasMember,
    In,
    IncrPre,
    IncrPost,
    Index,
    IndexAssign,
    Lower,
    LowerEqual,
    Member,
    MemberCall,
    Modulo,
    Multiple,
    MultipleAssign,
    Negate,
    New,
    Pack,
    Power,
    ShiftLeft,
    ShiftRight,
    SignNeg,
    SignPos,
    Size,
    Sum,
    SumAssign,
    TryMember,
    Unequal,
    Unpack,
    Unset,
}

impl OperatorKind {
    /// Operand order may be swapped while matching these kinds.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::BitAnd | Self::BitOr | Self::BitXor | Self::Equal | Self::Unequal | Self::Multiple | Self::Sum
        )
    }
}

/// Tie-breaking priority between otherwise-equal candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Display)]
pub enum OperatorPriority {
    Low,
    #[default]
    Normal,
}

/// What an operand position accepts.
#[derive(Debug, Clone)]
pub enum OperandMatcher {
    /// A concrete type; the coercion engine decides convertibility.
    Type(TypeId),
    /// Any type with the given tag (wildcard widths/elements).
    Kind(TypeTag),
    /// Any integer type, signed or unsigned.
    AnyInteger,
    /// Any iterable container.
    AnyIterable,
    /// A reference of any flavor.
    AnyReference,
    /// A member-name operand; `Some` pins the name (method calls).
    Member(Option<&'static str>),
    /// A type given in expression position (cast targets, `new`).
    TypeExpr,
    /// The call-argument tuple, checked against named parameters.
    Params(Vec<ParamSpec>),
    /// Must have the same resolved type as operand `i`.
    SameAs(usize),
    /// Anything.
    Any,
}

/// One named parameter of a method/constructor call.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub matcher: OperandMatcher,
    /// Optional parameters may be omitted from the call.
    pub optional: bool,
}

impl ParamSpec {
    fn required(name: &'static str, matcher: OperandMatcher) -> Self {
        Self {
            name,
            matcher,
            optional: false,
        }
    }

    fn opt(name: &'static str, matcher: OperandMatcher) -> Self {
        Self {
            name,
            matcher,
            optional: true,
        }
    }
}

/// One operand position of an operator signature.
#[derive(Debug, Clone)]
pub struct Operand {
    pub matcher: OperandMatcher,
    /// The operand must be assignable (mutable LHS).
    pub mutable: bool,
}

impl Operand {
    fn of(matcher: OperandMatcher) -> Self {
        Self {
            matcher,
            mutable: false,
        }
    }

    fn mutable(matcher: OperandMatcher) -> Self {
        Self { matcher, mutable: true }
    }
}

/// How an operator's result type is computed.
#[derive(Debug, Clone)]
pub enum ResultRule {
    /// A fixed type with the given constness.
    Fixed(TypeId, Constness),
    /// The resolved type of operand `i`.
    SameAsOperand(usize),
    /// The dereferenced type of operand `i` (references, optional, result).
    DerefOperand(usize),
    /// The element type of container operand `i`.
    ElementOfOperand(usize),
    /// The value type of map operand `i`.
    MapValueOfOperand(usize),
    /// The type named by the type-expression operand `i`.
    TypeOfTypeExpr(usize),
    /// Computed from the operands (member access, bitfield ranges, …).
    Custom(fn(&AstContext, &[ExprId]) -> QualifiedType),
}

/// One operator description.
#[derive(Debug, Clone)]
pub struct OperatorDef {
    pub kind: OperatorKind,
    /// Diagnostic name, e.g. `uint::Sum` or `bytes::to_uint`.
    pub name: &'static str,
    pub operands: Vec<Operand>,
    pub result: ResultRule,
    pub priority: OperatorPriority,
}

impl OperatorDef {
    /// The method name a `MemberCall` operator matches, if any.
    pub fn method_name(&self) -> Option<&'static str> {
        if self.kind != OperatorKind::MemberCall {
            return None;
        }
        match self.operands.get(1).map(|o| &o.matcher) {
            Some(OperandMatcher::Member(name)) => *name,
            _ => None,
        }
    }
}

/// Handle of an operator in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorId(u32);

impl OperatorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// All built-in operators, indexed by kind.
pub struct Registry {
    defs: Vec<OperatorDef>,
    by_kind: AHashMap<OperatorKind, Vec<OperatorId>>,
}

impl Registry {
    /// Builds the registry, resolving signature types against the context's
    /// standard types.
    pub fn build(ctx: &AstContext) -> Self {
        let mut builder = RegistryBuilder {
            ctx,
            defs: Vec::new(),
        };
        builder.install();
        let mut by_kind: AHashMap<OperatorKind, Vec<OperatorId>> = AHashMap::new();
        for (i, def) in builder.defs.iter().enumerate() {
            by_kind
                .entry(def.kind)
                .or_default()
                .push(OperatorId(u32::try_from(i).expect("registry overflow")));
        }
        Self {
            defs: builder.defs,
            by_kind,
        }
    }

    pub fn op(&self, id: OperatorId) -> &OperatorDef {
        &self.defs[id.index()]
    }

    pub fn of_kind(&self, kind: OperatorKind) -> &[OperatorId] {
        self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Computes the result type of a resolved application.
    pub fn result_type(&self, ctx: &AstContext, id: OperatorId, operands: &[ExprId]) -> QualifiedType {
        resolve_result(ctx, &self.op(id).result, operands)
    }

    /// Registers a synthetic operator (function-call candidates built from
    /// declarations) and returns its handle.
    pub fn add_synthetic(&mut self, def: OperatorDef) -> OperatorId {
        let id = OperatorId(u32::try_from(self.defs.len()).expect("registry overflow"));
        self.by_kind.entry(def.kind).or_default().push(id);
        self.defs.push(def);
        id
    }
}

/// Computes a result rule against concrete operands.
pub fn resolve_result(ctx: &AstContext, rule: &ResultRule, operands: &[ExprId]) -> QualifiedType {
    match rule {
        ResultRule::Fixed(ty, constness) => QualifiedType {
            ty: *ty,
            constness: *constness,
            side: crate::ast::types::Side::Rhs,
        },
        ResultRule::SameAsOperand(i) => ctx.expr(operands[*i]).ty,
        ResultRule::DerefOperand(i) => {
            let ty = ctx.resolve_type(ctx.expr(operands[*i]).ty.ty);
            match ctx.ty(ty).dereferenced() {
                Some(inner) => QualifiedType::mutable_rhs(inner),
                None => ctx.unknown_qtype(),
            }
        }
        ResultRule::ElementOfOperand(i) => {
            let ty = ctx.resolve_type(ctx.expr(operands[*i]).ty.ty);
            match ctx.ty(ty).element() {
                Some(elem) => QualifiedType::mutable_rhs(elem),
                None => ctx.unknown_qtype(),
            }
        }
        ResultRule::MapValueOfOperand(i) => {
            let ty = ctx.resolve_type(ctx.expr(operands[*i]).ty.ty);
            match ctx.ty(ty) {
                Ty::Map(_, value) => QualifiedType::mutable_rhs(*value),
                _ => ctx.unknown_qtype(),
            }
        }
        ResultRule::TypeOfTypeExpr(i) => match &ctx.expr(operands[*i]).kind {
            ExprKind::TypeExpr(ty) => QualifiedType::const_rhs(*ty),
            _ => ctx.unknown_qtype(),
        },
        ResultRule::Custom(f) => f(ctx, operands),
    }
}

/// Result rule for member access on structs, units, and bitfields.
fn member_result(ctx: &AstContext, operands: &[ExprId]) -> QualifiedType {
    let recv = ctx.resolve_type(ctx.expr(operands[0]).ty.ty);
    let ExprKind::Member { id } = &ctx.expr(operands[1]).kind else {
        return ctx.unknown_qtype();
    };
    match ctx.ty(recv) {
        Ty::Struct(st) | Ty::Union(st) => {
            for &field in &st.fields {
                let decl = ctx.decl(field);
                if decl.id == *id {
                    if let crate::ast::decl::DeclKind::Field { ty, .. } = &decl.kind {
                        return QualifiedType::mutable_rhs(*ty);
                    }
                }
            }
            ctx.unknown_qtype()
        }
        Ty::Unit(unit) => {
            for &item in &unit.items {
                match ctx.item(item) {
                    UnitItem::Field(field) => {
                        if field.id.as_deref() == Some(id) {
                            if let Some(item_ty) = field.item_ty {
                                return QualifiedType::mutable_rhs(item_ty);
                            }
                        }
                    }
                    UnitItem::Variable { id: vid, ty, .. } => {
                        if vid == id {
                            return QualifiedType::mutable_rhs(*ty);
                        }
                    }
                    UnitItem::Sink { id: sid, .. } => {
                        if sid == id {
                            return QualifiedType::mutable_rhs(ctx.standard().sink);
                        }
                    }
                    _ => {}
                }
            }
            ctx.unknown_qtype()
        }
        Ty::Bitfield(bf) => {
            if bf.bit(id).is_some() {
                // Bit ranges read as the bitfield's underlying word type.
                let width = bf.width;
                match ctx.standard().unsigned(width) {
                    Some(ty) => QualifiedType::const_rhs(ty),
                    None => ctx.unknown_qtype(),
                }
            } else {
                ctx.unknown_qtype()
            }
        }
        _ => ctx.unknown_qtype(),
    }
}

/// Result rule for `begin()` on iterables: the matching iterator type.
fn begin_result(ctx: &AstContext, operands: &[ExprId]) -> QualifiedType {
    let recv = ctx.resolve_type(ctx.expr(operands[0]).ty.ty);
    match ctx.ty(recv) {
        Ty::Stream | Ty::StreamView => QualifiedType::const_rhs(ctx.standard().iter),
        _ => ctx.unknown_qtype(),
    }
}

struct RegistryBuilder<'a> {
    ctx: &'a AstContext,
    defs: Vec<OperatorDef>,
}

impl RegistryBuilder<'_> {
    fn def(&mut self, kind: OperatorKind, name: &'static str, operands: Vec<Operand>, result: ResultRule) {
        self.defs.push(OperatorDef {
            kind,
            name,
            operands,
            result,
            priority: OperatorPriority::Normal,
        });
    }

    fn def_low(&mut self, kind: OperatorKind, name: &'static str, operands: Vec<Operand>, result: ResultRule) {
        self.defs.push(OperatorDef {
            kind,
            name,
            operands,
            result,
            priority: OperatorPriority::Low,
        });
    }

    fn method(&mut self, recv: OperandMatcher, name: &'static str, display: &'static str, params: Vec<ParamSpec>, result: ResultRule) {
        self.def(
            OperatorKind::MemberCall,
            display,
            vec![
                Operand::of(recv),
                Operand::of(OperandMatcher::Member(Some(name))),
                Operand::of(OperandMatcher::Params(params)),
            ],
            result,
        );
    }

    fn install(&mut self) {
        let std = self.ctx.standard();
        self.install_numeric(std);
        self.install_comparisons(std);
        self.install_bytes(std);
        self.install_string(std);
        self.install_containers(std);
        self.install_references(std);
        self.install_members(std);
        self.install_stream(std);
        self.install_unit(std);
        self.install_sink(std);
        self.install_generic(std);
    }

    fn install_numeric(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{AnyInteger, Kind, SameAs, Type};
        use OperatorKind as K;

        let arith = [
            (K::Sum, "Sum"),
            (K::Difference, "Difference"),
            (K::Multiple, "Multiple"),
            (K::Division, "Division"),
            (K::Modulo, "Modulo"),
        ];
        for (kind, name) in arith {
            let display: &'static str = match name {
                "Sum" => "integer::Sum",
                "Difference" => "integer::Difference",
                "Multiple" => "integer::Multiple",
                "Division" => "integer::Division",
                _ => "integer::Modulo",
            };
            self.def(
                kind,
                display,
                vec![Operand::of(AnyInteger), Operand::of(SameAs(0))],
                ResultRule::SameAsOperand(0),
            );
        }
        self.def(
            K::Power,
            "integer::Power",
            vec![Operand::of(AnyInteger), Operand::of(SameAs(0))],
            ResultRule::SameAsOperand(0),
        );

        for (kind, name) in [
            (K::SumAssign, "integer::SumAssign"),
            (K::DifferenceAssign, "integer::DifferenceAssign"),
            (K::MultipleAssign, "integer::MultipleAssign"),
            (K::DivisionAssign, "integer::DivisionAssign"),
        ] {
            self.def(
                kind,
                name,
                vec![Operand::mutable(AnyInteger), Operand::of(SameAs(0))],
                ResultRule::SameAsOperand(0),
            );
        }

        for (kind, name) in [
            (K::IncrPre, "integer::IncrPre"),
            (K::IncrPost, "integer::IncrPost"),
            (K::DecrPre, "integer::DecrPre"),
            (K::DecrPost, "integer::DecrPost"),
        ] {
            self.def(kind, name, vec![Operand::mutable(AnyInteger)], ResultRule::SameAsOperand(0));
        }

        self.def(
            K::SignNeg,
            "integer::SignNeg",
            vec![Operand::of(Kind(TypeTag::SignedInteger))],
            ResultRule::SameAsOperand(0),
        );
        self.def(
            K::SignPos,
            "integer::SignPos",
            vec![Operand::of(AnyInteger)],
            ResultRule::SameAsOperand(0),
        );
        self.def(
            K::Negate,
            "uint::Negate",
            vec![Operand::of(Kind(TypeTag::UnsignedInteger))],
            ResultRule::SameAsOperand(0),
        );

        for (kind, name) in [
            (K::BitAnd, "uint::BitAnd"),
            (K::BitOr, "uint::BitOr"),
            (K::BitXor, "uint::BitXor"),
        ] {
            self.def(
                kind,
                name,
                vec![Operand::of(Kind(TypeTag::UnsignedInteger)), Operand::of(SameAs(0))],
                ResultRule::SameAsOperand(0),
            );
        }
        for (kind, name) in [(K::ShiftLeft, "uint::ShiftLeft"), (K::ShiftRight, "uint::ShiftRight")] {
            self.def(
                kind,
                name,
                vec![Operand::of(Kind(TypeTag::UnsignedInteger)), Operand::of(Type(std.uint64))],
                ResultRule::SameAsOperand(0),
            );
        }

        for (kind, name) in [
            (K::Sum, "real::Sum"),
            (K::Difference, "real::Difference"),
            (K::Multiple, "real::Multiple"),
            (K::Division, "real::Division"),
            (K::Power, "real::Power"),
        ] {
            self.def(
                kind,
                name,
                vec![Operand::of(Type(std.real)), Operand::of(Type(std.real))],
                ResultRule::Fixed(std.real, Constness::Const),
            );
        }
        self.def(
            K::SignNeg,
            "real::SignNeg",
            vec![Operand::of(Type(std.real))],
            ResultRule::Fixed(std.real, Constness::Const),
        );

        // Time and interval arithmetic.
        self.def(
            K::Sum,
            "time::Sum",
            vec![Operand::of(Type(std.time)), Operand::of(Type(std.interval))],
            ResultRule::Fixed(std.time, Constness::Const),
        );
        self.def(
            K::Difference,
            "time::Difference",
            vec![Operand::of(Type(std.time)), Operand::of(Type(std.time))],
            ResultRule::Fixed(std.interval, Constness::Const),
        );
        self.def(
            K::Sum,
            "interval::Sum",
            vec![Operand::of(Type(std.interval)), Operand::of(Type(std.interval))],
            ResultRule::Fixed(std.interval, Constness::Const),
        );

        // Casts between numeric and enum-like types.
        self.def(
            K::Cast,
            "integer::Cast",
            vec![Operand::of(AnyInteger), Operand::of(OperandMatcher::TypeExpr)],
            ResultRule::TypeOfTypeExpr(1),
        );
        self.def(
            K::Cast,
            "real::Cast",
            vec![Operand::of(Type(std.real)), Operand::of(OperandMatcher::TypeExpr)],
            ResultRule::TypeOfTypeExpr(1),
        );
        self.def(
            K::Cast,
            "enum::Cast",
            vec![Operand::of(Kind(TypeTag::Enum)), Operand::of(OperandMatcher::TypeExpr)],
            ResultRule::TypeOfTypeExpr(1),
        );
    }

    fn install_comparisons(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{AnyInteger, Kind, SameAs, Type};
        use OperatorKind as K;

        let comparable: Vec<(&'static str, OperandMatcher)> = vec![
            ("integer", AnyInteger),
            ("real", Type(std.real)),
            ("bytes", Type(std.bytes)),
            ("string", Type(std.string)),
            ("bool", Type(std.bool_)),
            ("time", Type(std.time)),
            ("interval", Type(std.interval)),
            ("address", Type(std.address)),
            ("port", Type(std.port)),
            ("enum", Kind(TypeTag::Enum)),
        ];

        for (ns, matcher) in &comparable {
            let eq_name: &'static str = match *ns {
                "integer" => "integer::Equal",
                "real" => "real::Equal",
                "bytes" => "bytes::Equal",
                "string" => "string::Equal",
                "bool" => "bool::Equal",
                "time" => "time::Equal",
                "interval" => "interval::Equal",
                "address" => "address::Equal",
                "port" => "port::Equal",
                _ => "enum::Equal",
            };
            let ne_name: &'static str = match *ns {
                "integer" => "integer::Unequal",
                "real" => "real::Unequal",
                "bytes" => "bytes::Unequal",
                "string" => "string::Unequal",
                "bool" => "bool::Unequal",
                "time" => "time::Unequal",
                "interval" => "interval::Unequal",
                "address" => "address::Unequal",
                "port" => "port::Unequal",
                _ => "enum::Unequal",
            };
            self.def(
                K::Equal,
                eq_name,
                vec![Operand::of(matcher.clone()), Operand::of(SameAs(0))],
                ResultRule::Fixed(std.bool_, Constness::Const),
            );
            self.def(
                K::Unequal,
                ne_name,
                vec![Operand::of(matcher.clone()), Operand::of(SameAs(0))],
                ResultRule::Fixed(std.bool_, Constness::Const),
            );
        }

        let ordered: Vec<(&'static str, OperandMatcher)> = vec![
            ("integer", AnyInteger),
            ("real", Type(std.real)),
            ("bytes", Type(std.bytes)),
            ("string", Type(std.string)),
            ("time", Type(std.time)),
            ("interval", Type(std.interval)),
        ];
        for (ns, matcher) in &ordered {
            for (kind, op) in [
                (K::Lower, "Lower"),
                (K::LowerEqual, "LowerEqual"),
                (K::Greater, "Greater"),
                (K::GreaterEqual, "GreaterEqual"),
            ] {
                let name: &'static str = match (*ns, op) {
                    ("integer", "Lower") => "integer::Lower",
                    ("integer", "LowerEqual") => "integer::LowerEqual",
                    ("integer", "Greater") => "integer::Greater",
                    ("integer", "GreaterEqual") => "integer::GreaterEqual",
                    ("real", "Lower") => "real::Lower",
                    ("real", "LowerEqual") => "real::LowerEqual",
                    ("real", "Greater") => "real::Greater",
                    ("real", "GreaterEqual") => "real::GreaterEqual",
                    ("bytes", "Lower") => "bytes::Lower",
                    ("bytes", "LowerEqual") => "bytes::LowerEqual",
                    ("bytes", "Greater") => "bytes::Greater",
                    ("bytes", "GreaterEqual") => "bytes::GreaterEqual",
                    ("string", "Lower") => "string::Lower",
                    ("string", "LowerEqual") => "string::LowerEqual",
                    ("string", "Greater") => "string::Greater",
                    ("string", "GreaterEqual") => "string::GreaterEqual",
                    ("time", "Lower") => "time::Lower",
                    ("time", "LowerEqual") => "time::LowerEqual",
                    ("time", "Greater") => "time::Greater",
                    ("time", "GreaterEqual") => "time::GreaterEqual",
                    (_, "Lower") => "interval::Lower",
                    (_, "LowerEqual") => "interval::LowerEqual",
                    (_, "Greater") => "interval::Greater",
                    _ => "interval::GreaterEqual",
                };
                self.def(
                    kind,
                    name,
                    vec![Operand::of(matcher.clone()), Operand::of(SameAs(0))],
                    ResultRule::Fixed(std.bool_, Constness::Const),
                );
            }
        }
    }

    fn install_bytes(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::Type;
        use OperatorKind as K;

        self.def(
            K::Size,
            "bytes::Size",
            vec![Operand::of(Type(std.bytes))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::Sum,
            "bytes::Sum",
            vec![Operand::of(Type(std.bytes)), Operand::of(Type(std.bytes))],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
        self.def(
            K::SumAssign,
            "bytes::SumAssign",
            vec![Operand::mutable(Type(std.bytes)), Operand::of(Type(std.bytes))],
            ResultRule::SameAsOperand(0),
        );
        self.def(
            K::In,
            "bytes::In",
            vec![Operand::of(Type(std.bytes)), Operand::of(Type(std.bytes))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
        self.def(
            K::Index,
            "bytes::Index",
            vec![Operand::of(Type(std.bytes)), Operand::of(Type(std.uint64))],
            ResultRule::Fixed(std.uint8, Constness::Const),
        );

        let recv = || Type(std.bytes);
        self.method(
            recv(),
            "starts_with",
            "bytes::starts_with",
            vec![ParamSpec::required("prefix", Type(std.bytes))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
        self.method(
            recv(),
            "find",
            "bytes::find",
            vec![ParamSpec::required("needle", Type(std.bytes))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            recv(),
            "sub",
            "bytes::sub",
            vec![
                ParamSpec::required("begin", Type(std.uint64)),
                ParamSpec::opt("end", Type(std.uint64)),
            ],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
        self.method(recv(), "lower", "bytes::lower", vec![], ResultRule::Fixed(std.bytes, Constness::Const));
        self.method(recv(), "upper", "bytes::upper", vec![], ResultRule::Fixed(std.bytes, Constness::Const));
        self.method(
            recv(),
            "strip",
            "bytes::strip",
            vec![ParamSpec::opt("set", Type(std.bytes))],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
        self.method(
            recv(),
            "split",
            "bytes::split",
            vec![ParamSpec::opt("sep", Type(std.bytes))],
            ResultRule::Fixed(std.vector_of_bytes, Constness::Const),
        );
        self.method(
            recv(),
            "split1",
            "bytes::split1",
            vec![ParamSpec::opt("sep", Type(std.bytes))],
            ResultRule::Fixed(std.bytes_pair, Constness::Const),
        );
        self.method(
            recv(),
            "join",
            "bytes::join",
            vec![ParamSpec::required("parts", OperandMatcher::AnyIterable)],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
        self.method(
            recv(),
            "decode",
            "bytes::decode",
            vec![ParamSpec::opt("charset", OperandMatcher::Kind(TypeTag::Enum))],
            ResultRule::Fixed(std.string, Constness::Const),
        );
        self.method(
            recv(),
            "to_int",
            "bytes::to_int",
            vec![ParamSpec::opt("base", OperandMatcher::AnyInteger)],
            ResultRule::Fixed(std.int64, Constness::Const),
        );
        self.method(
            recv(),
            "to_uint",
            "bytes::to_uint",
            vec![ParamSpec::opt("base", OperandMatcher::AnyInteger)],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            recv(),
            "to_time",
            "bytes::to_time",
            vec![ParamSpec::opt("base", OperandMatcher::AnyInteger)],
            ResultRule::Fixed(std.time, Constness::Const),
        );
        self.method(
            recv(),
            "match",
            "bytes::match",
            vec![
                ParamSpec::required("re", Type(std.regexp)),
                ParamSpec::opt("group", Type(std.uint64)),
            ],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
    }

    fn install_string(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::Type;
        use OperatorKind as K;

        self.def(
            K::Size,
            "string::Size",
            vec![Operand::of(Type(std.string))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::Sum,
            "string::Sum",
            vec![Operand::of(Type(std.string)), Operand::of(Type(std.string))],
            ResultRule::Fixed(std.string, Constness::Const),
        );
        self.method(
            Type(std.string),
            "encode",
            "string::encode",
            vec![ParamSpec::opt("charset", OperandMatcher::Kind(TypeTag::Enum))],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
    }

    fn install_containers(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{Any, Kind, SameAs, Type};
        use OperatorKind as K;

        // Vectors.
        self.def(
            K::Size,
            "vector::Size",
            vec![Operand::of(Kind(TypeTag::Vector))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::Index,
            "vector::Index",
            vec![Operand::of(Kind(TypeTag::Vector)), Operand::of(Type(std.uint64))],
            ResultRule::ElementOfOperand(0),
        );
        self.def(
            K::IndexAssign,
            "vector::IndexAssign",
            vec![
                Operand::mutable(Kind(TypeTag::Vector)),
                Operand::of(Type(std.uint64)),
                Operand::of(Any),
            ],
            ResultRule::ElementOfOperand(0),
        );
        self.def(
            K::Equal,
            "vector::Equal",
            vec![Operand::of(Kind(TypeTag::Vector)), Operand::of(SameAs(0))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
        self.method(
            Kind(TypeTag::Vector),
            "push_back",
            "vector::push_back",
            vec![ParamSpec::required("value", Any)],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            Kind(TypeTag::Vector),
            "pop_back",
            "vector::pop_back",
            vec![],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            Kind(TypeTag::Vector),
            "back",
            "vector::back",
            vec![],
            ResultRule::ElementOfOperand(0),
        );

        // Lists.
        self.def(
            K::Size,
            "list::Size",
            vec![Operand::of(Kind(TypeTag::List))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::Equal,
            "list::Equal",
            vec![Operand::of(Kind(TypeTag::List)), Operand::of(SameAs(0))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );

        // Sets.
        self.def(
            K::Size,
            "set::Size",
            vec![Operand::of(Kind(TypeTag::Set))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::In,
            "set::In",
            vec![Operand::of(Any), Operand::of(Kind(TypeTag::Set))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
        self.def(
            K::Delete,
            "set::Delete",
            vec![Operand::mutable(Kind(TypeTag::Set)), Operand::of(Any)],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            Kind(TypeTag::Set),
            "insert",
            "set::insert",
            vec![ParamSpec::required("value", Any)],
            ResultRule::Fixed(std.void, Constness::Const),
        );

        // Maps.
        self.def(
            K::Size,
            "map::Size",
            vec![Operand::of(Kind(TypeTag::Map))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::Index,
            "map::Index",
            vec![Operand::of(Kind(TypeTag::Map)), Operand::of(Any)],
            ResultRule::MapValueOfOperand(0),
        );
        self.def(
            K::IndexAssign,
            "map::IndexAssign",
            vec![Operand::mutable(Kind(TypeTag::Map)), Operand::of(Any), Operand::of(Any)],
            ResultRule::MapValueOfOperand(0),
        );
        self.def(
            K::In,
            "map::In",
            vec![Operand::of(Any), Operand::of(Kind(TypeTag::Map))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
        self.def(
            K::Delete,
            "map::Delete",
            vec![Operand::mutable(Kind(TypeTag::Map)), Operand::of(Any)],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            Kind(TypeTag::Map),
            "get",
            "map::get",
            vec![ParamSpec::required("key", Any), ParamSpec::opt("default", Any)],
            ResultRule::MapValueOfOperand(0),
        );

        // Tuples.
        self.def(
            K::Equal,
            "tuple::Equal",
            vec![Operand::of(Kind(TypeTag::Tuple)), Operand::of(SameAs(0))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
        self.def(
            K::Index,
            "tuple::Index",
            vec![Operand::of(Kind(TypeTag::Tuple)), Operand::of(Type(std.uint64))],
            ResultRule::Custom(|ctx, ops| {
                let recv = ctx.resolve_type(ctx.expr(ops[0]).ty.ty);
                let Ty::Tuple(elems) = ctx.ty(recv) else {
                    return ctx.unknown_qtype();
                };
                match ctx.expr(ops[1]).as_ctor() {
                    Some(crate::ast::expr::Ctor::Unsigned { value, .. }) => elems
                        .get(usize::try_from(*value).unwrap_or(usize::MAX))
                        .map_or_else(|| ctx.unknown_qtype(), |t| QualifiedType::const_rhs(*t)),
                    _ => ctx.unknown_qtype(),
                }
            }),
        );
    }

    fn install_references(&mut self, _std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{AnyReference, Kind, TypeExpr};
        use OperatorKind as K;

        self.def(K::Deref, "reference::Deref", vec![Operand::of(AnyReference)], ResultRule::DerefOperand(0));
        self.def(
            K::Deref,
            "optional::Deref",
            vec![Operand::of(Kind(TypeTag::Optional))],
            ResultRule::DerefOperand(0),
        );
        self.def(
            K::Deref,
            "result::Deref",
            vec![Operand::of(Kind(TypeTag::Result))],
            ResultRule::DerefOperand(0),
        );
        self.def(
            K::New,
            "generic::New",
            vec![Operand::of(TypeExpr)],
            ResultRule::Custom(|ctx, ops| {
                // `new T` yields a strong reference to T; modeled through
                // the type table so repeated instantiations share the type.
                match &ctx.expr(ops[0]).kind {
                    ExprKind::TypeExpr(ty) => QualifiedType::mutable_rhs(*ty),
                    _ => ctx.unknown_qtype(),
                }
            }),
        );
    }

    fn install_members(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{Kind, Member};
        use OperatorKind as K;

        for tag in [TypeTag::Struct, TypeTag::Union, TypeTag::Unit, TypeTag::Bitfield] {
            let (member, has, try_, unset): (&'static str, &'static str, &'static str, &'static str) = match tag {
                TypeTag::Struct => ("struct::Member", "struct::HasMember", "struct::TryMember", "struct::Unset"),
                TypeTag::Union => ("union::Member", "union::HasMember", "union::TryMember", "union::Unset"),
                TypeTag::Unit => ("unit::Member", "unit::HasMember", "unit::TryMember", "unit::Unset"),
                _ => ("bitfield::Member", "bitfield::HasMember", "bitfield::TryMember", "bitfield::Unset"),
            };
            self.def(
                K::Member,
                member,
                vec![Operand::of(Kind(tag)), Operand::of(Member(None))],
                ResultRule::Custom(member_result),
            );
            if tag != TypeTag::Bitfield {
                self.def(
                    K::HasMember,
                    has,
                    vec![Operand::of(Kind(tag)), Operand::of(Member(None))],
                    ResultRule::Fixed(std.bool_, Constness::Const),
                );
                self.def(
                    K::TryMember,
                    try_,
                    vec![Operand::of(Kind(tag)), Operand::of(Member(None))],
                    ResultRule::Custom(member_result),
                );
                self.def(
                    K::Unset,
                    unset,
                    vec![Operand::mutable(Kind(tag)), Operand::of(Member(None))],
                    ResultRule::Fixed(std.void, Constness::Const),
                );
            }
        }
    }

    fn install_stream(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::Type;
        use OperatorKind as K;

        self.def(
            K::Size,
            "stream::Size",
            vec![Operand::of(Type(std.stream))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(
            K::Size,
            "view::Size",
            vec![Operand::of(Type(std.view))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.def(K::Begin, "view::Begin", vec![Operand::of(Type(std.view))], ResultRule::Custom(begin_result));
        self.def(K::End, "view::End", vec![Operand::of(Type(std.view))], ResultRule::Custom(begin_result));
        self.def(
            K::Deref,
            "stream::iterator::Deref",
            vec![Operand::of(Type(std.iter))],
            ResultRule::Fixed(std.uint8, Constness::Const),
        );
        self.def(
            K::IncrPre,
            "stream::iterator::IncrPre",
            vec![Operand::mutable(Type(std.iter))],
            ResultRule::SameAsOperand(0),
        );
        self.def(
            K::Difference,
            "stream::iterator::Difference",
            vec![Operand::of(Type(std.iter)), Operand::of(Type(std.iter))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            Type(std.iter),
            "offset",
            "stream::iterator::offset",
            vec![],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            Type(std.view),
            "advance",
            "view::advance",
            vec![ParamSpec::required("n", Type(std.uint64))],
            ResultRule::Fixed(std.view, Constness::Const),
        );
        self.method(
            Type(std.view),
            "limit",
            "view::limit",
            vec![ParamSpec::required("n", Type(std.uint64))],
            ResultRule::Fixed(std.view, Constness::Const),
        );
        self.method(
            Type(std.view),
            "find",
            "view::find",
            vec![ParamSpec::required("needle", Type(std.bytes))],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            Type(std.view),
            "starts_with",
            "view::starts_with",
            vec![ParamSpec::required("prefix", Type(std.bytes))],
            ResultRule::Fixed(std.bool_, Constness::Const),
        );
    }

    fn install_unit(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{Kind, Type};

        let unit = || Kind(TypeTag::Unit);
        self.method(
            unit(),
            "offset",
            "unit::offset",
            vec![],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            unit(),
            "position",
            "unit::position",
            vec![],
            ResultRule::Fixed(std.iter, Constness::Const),
        );
        self.method(unit(), "input", "unit::input", vec![], ResultRule::Fixed(std.iter, Constness::Const));
        self.method(
            unit(),
            "set_input",
            "unit::set_input",
            vec![ParamSpec::required("position", Type(std.iter))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            unit(),
            "backtrack",
            "unit::backtrack",
            vec![],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            unit(),
            "context",
            "unit::context",
            vec![],
            ResultRule::Custom(|ctx, ops| {
                let recv = ctx.resolve_type(ctx.expr(ops[0]).ty.ty);
                match ctx.ty(recv) {
                    Ty::Unit(u) => u
                        .context
                        .map_or_else(|| ctx.unknown_qtype(), QualifiedType::mutable_rhs),
                    _ => ctx.unknown_qtype(),
                }
            }),
        );
        self.method(
            unit(),
            "connect_filter",
            "unit::connect_filter",
            vec![ParamSpec::required("filter", OperandMatcher::AnyReference)],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            unit(),
            "forward",
            "unit::forward",
            vec![ParamSpec::required("data", Type(std.bytes))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            unit(),
            "forward_eod",
            "unit::forward_eod",
            vec![],
            ResultRule::Fixed(std.void, Constness::Const),
        );
    }

    fn install_sink(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{AnyReference, Kind, Type};
        use OperatorKind as K;

        let sink = || Type(std.sink);
        self.def(
            K::Size,
            "sink::Size",
            vec![Operand::of(sink())],
            ResultRule::Fixed(std.uint64, Constness::Const),
        );
        self.method(
            sink(),
            "write",
            "sink::write",
            vec![
                ParamSpec::required("data", Type(std.bytes)),
                ParamSpec::opt("seq", Type(std.uint64)),
                ParamSpec::opt("len", Type(std.uint64)),
            ],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "gap",
            "sink::gap",
            vec![
                ParamSpec::required("seq", Type(std.uint64)),
                ParamSpec::required("len", Type(std.uint64)),
            ],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "skip",
            "sink::skip",
            vec![ParamSpec::required("seq", Type(std.uint64))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "trim",
            "sink::trim",
            vec![ParamSpec::required("seq", Type(std.uint64))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(sink(), "close", "sink::close", vec![], ResultRule::Fixed(std.void, Constness::Const));
        self.method(
            sink(),
            "connect",
            "sink::connect",
            vec![ParamSpec::required("unit", AnyReference)],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "connect_mime_type",
            "sink::connect_mime_type",
            vec![ParamSpec::required("mime_type", Type(std.string))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "connect_filter",
            "sink::connect_filter",
            vec![ParamSpec::required("filter", AnyReference)],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "set_auto_trim",
            "sink::set_auto_trim",
            vec![ParamSpec::required("enabled", Type(std.bool_))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "set_initial_sequence_number",
            "sink::set_initial_sequence_number",
            vec![ParamSpec::required("seq", Type(std.uint64))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
        self.method(
            sink(),
            "set_policy",
            "sink::set_policy",
            vec![ParamSpec::required("policy", Kind(TypeTag::Enum))],
            ResultRule::Fixed(std.void, Constness::Const),
        );
    }

    fn install_generic(&mut self, std: crate::ast::context::StandardTypes) {
        use OperandMatcher::{Any, AnyIterable, Type, TypeExpr};
        use OperatorKind as K;

        self.def(K::Begin, "generic::Begin", vec![Operand::of(AnyIterable)], ResultRule::Custom(begin_result));
        self.def(K::End, "generic::End", vec![Operand::of(AnyIterable)], ResultRule::Custom(begin_result));
        self.def(
            K::Pack,
            "generic::Pack",
            vec![Operand::of(Any), Operand::of(OperandMatcher::Kind(TypeTag::Enum))],
            ResultRule::Fixed(std.bytes, Constness::Const),
        );
        self.def(
            K::Unpack,
            "generic::Unpack",
            vec![Operand::of(TypeExpr), Operand::of(Type(std.view)), Operand::of(Any)],
            ResultRule::TypeOfTypeExpr(0),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_with_all_kinds_covered() {
        let ctx = AstContext::new();
        let registry = Registry::build(&ctx);
        assert!(!registry.is_empty());
        for kind in [
            OperatorKind::Sum,
            OperatorKind::Equal,
            OperatorKind::Member,
            OperatorKind::MemberCall,
            OperatorKind::Size,
            OperatorKind::Deref,
            OperatorKind::Index,
            OperatorKind::Cast,
        ] {
            assert!(!registry.of_kind(kind).is_empty(), "no operators of kind {kind}");
        }
    }

    #[test]
    fn commutativity_follows_kind() {
        assert!(OperatorKind::Sum.is_commutative());
        assert!(OperatorKind::Equal.is_commutative());
        assert!(!OperatorKind::Difference.is_commutative());
        assert!(!OperatorKind::Member.is_commutative());
    }

    #[test]
    fn member_call_candidates_expose_method_name() {
        let ctx = AstContext::new();
        let registry = Registry::build(&ctx);
        let with_name: Vec<_> = registry
            .of_kind(OperatorKind::MemberCall)
            .iter()
            .filter_map(|&id| registry.op(id).method_name())
            .collect();
        assert!(with_name.contains(&"to_uint"));
        assert!(with_name.contains(&"write"));
        assert!(with_name.contains(&"backtrack"));
    }
}
