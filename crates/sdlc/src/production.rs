//! The per-unit parse-graph intermediate representation.
//!
//! For every unit the compiler derives a production tree describing how to
//! parse it; the parser-builder then walks the tree emitting IML. Literal
//! productions carry a token ID used by the look-ahead machinery and by
//! error messages.

use crate::ast::{
    context::AstContext,
    expr::{Ctor, ExprKind},
    node::{ExprId, HookId, ItemId, TypeId},
    types::Ty,
    unit::{AttributeKind, UnitItem},
};

/// Token identifier for look-ahead literals.
pub type TokenId = u32;

/// When a hook production fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    Before,
    After,
    Foreach,
}

/// Loop bound of a repeated production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopBound {
    /// Repeat until the input ends.
    UntilInput,
    /// Repeat exactly `expr` times.
    Count(ExprId),
    /// Repeat while `expr` holds.
    While(ExprId),
    /// Repeat until the parsed element equals `expr`; the terminator is
    /// not stored.
    Until(ExprId),
    /// Like `Until`, but the terminator is stored.
    UntilIncluding(ExprId),
}

/// One node of a unit's parse graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Production {
    /// Match exactly the literal's bytes; record the value.
    Literal {
        ctor: ExprId,
        token: Option<TokenId>,
        field: Option<ItemId>,
    },
    /// Invoke the parse routine of a type.
    Type { ty: TypeId, field: ItemId },
    /// Parse each child in turn.
    Sequence(Vec<Production>),
    /// Evaluate guards in order; first true wins; `default` otherwise.
    Alternation {
        arms: Vec<(Option<ExprId>, Production)>,
        default: Option<Box<Production>>,
    },
    /// Two alternatives resolvable by a one-token window.
    LookAhead(Box<Production>, Box<Production>),
    /// Repeat `body` per the bound.
    Loop {
        body: Box<Production>,
        bound: LoopBound,
        field: ItemId,
    },
    /// A no-parse local binding.
    Variable { item: ItemId },
    /// Sink construction.
    Sink { item: ItemId },
    /// A `switch` over a scrutinee (or over look-ahead when absent);
    /// compiled to an alternation.
    Switch {
        scrutinee: Option<ExprId>,
        cases: Vec<(Vec<ExprId>, Production)>,
        default: Option<Box<Production>>,
    },
    /// Run a hook at the given point.
    Hook { when: HookPoint, hook: HookId },
}

impl Production {
    /// The token ID if this production starts with a known literal.
    pub fn first_token(&self) -> Option<TokenId> {
        match self {
            Self::Literal { token, .. } => *token,
            Self::Sequence(children) => children.first().and_then(Self::first_token),
            Self::Loop { body, .. } => body.first_token(),
            _ => None,
        }
    }
}

/// Builds the production tree for a resolved unit type.
pub struct GrammarBuilder<'a> {
    ctx: &'a AstContext,
    next_token: TokenId,
}

impl<'a> GrammarBuilder<'a> {
    pub fn new(ctx: &'a AstContext) -> Self {
        Self { ctx, next_token: 1 }
    }

    /// The top-level production of `unit_ty`: a sequence over its items.
    pub fn build(&mut self, unit_ty: TypeId) -> Production {
        let items = match self.ctx.ty(unit_ty) {
            Ty::Unit(unit) => unit.items.clone(),
            _ => return Production::Sequence(Vec::new()),
        };
        self.build_sequence(&items)
    }

    fn build_sequence(&mut self, items: &[ItemId]) -> Production {
        let mut seq: Vec<Production> = Vec::new();
        for &item in items {
            let Some(production) = self.build_item(item) else { continue };

            // An unbounded loop directly followed by a literal resolves by
            // look-ahead: the literal decides when the loop ends.
            let followed_literal = matches!(
                (&production, seq.last()),
                (
                    Production::Literal { .. },
                    Some(Production::Loop {
                        bound: LoopBound::UntilInput,
                        ..
                    })
                )
            );
            if followed_literal {
                let loop_production = seq.pop().expect("matched Some above");
                seq.push(Production::LookAhead(Box::new(loop_production), Box::new(production)));
            } else {
                seq.push(production);
            }
        }
        Production::Sequence(seq)
    }

    fn build_item(&mut self, item: ItemId) -> Option<Production> {
        match self.ctx.item(item).clone() {
            UnitItem::Field(field) => {
                let base = if let Some(ctor) = field.ctor {
                    let token = self.literal_token(ctor);
                    Production::Literal {
                        ctor,
                        token,
                        field: Some(item),
                    }
                } else {
                    let ty = field.parse_ty.unwrap_or_else(|| {
                        field.original_ty.expect("field has either a ctor or a type")
                    });
                    Production::Type {
                        ty: self.ctx.resolve_type(ty),
                        field: item,
                    }
                };

                let mut production = if field.is_container {
                    let bound = self.loop_bound(&field);
                    Production::Loop {
                        body: Box::new(base),
                        bound,
                        field: item,
                    }
                } else {
                    base
                };

                // Field hooks wrap the parse: before hooks, the parse, then
                // after/foreach hooks.
                if !field.hooks.is_empty() {
                    let mut seq = vec![production];
                    for &hook in &field.hooks {
                        let when = match self.ctx.hook(hook).flavor {
                            crate::ast::unit::HookFlavor::Foreach => HookPoint::Foreach,
                            crate::ast::unit::HookFlavor::Standard => HookPoint::After,
                        };
                        seq.push(Production::Hook { when, hook });
                    }
                    production = Production::Sequence(seq);
                }

                // A guard condition turns the field into a one-armed
                // alternation.
                if let Some(cond) = field.condition {
                    production = Production::Alternation {
                        arms: vec![(Some(cond), production)],
                        default: None,
                    };
                }
                Some(production)
            }
            UnitItem::Variable { .. } => Some(Production::Variable { item }),
            UnitItem::Sink { .. } => Some(Production::Sink { item }),
            UnitItem::Switch(sw) => {
                let mut cases = Vec::new();
                let mut default = None;
                for case in &sw.cases {
                    let body = self.build_sequence(&case.items);
                    if case.exprs.is_empty() {
                        default = Some(Box::new(body));
                    } else {
                        cases.push((case.exprs.clone(), body));
                    }
                }
                Some(Production::Switch {
                    scrutinee: sw.cond,
                    cases,
                    default,
                })
            }
            UnitItem::UnitHook { .. } | UnitItem::Property { .. } => None,
            UnitItem::UnresolvedField { .. } => None,
        }
    }

    fn loop_bound(&mut self, field: &crate::ast::unit::UnitField) -> LoopBound {
        if let Some(count) = field.repeat.or_else(|| field.attributes.value_of(AttributeKind::Count)) {
            return LoopBound::Count(count);
        }
        if let Some(cond) = field.attributes.value_of(AttributeKind::While) {
            return LoopBound::While(cond);
        }
        if let Some(term) = field.attributes.value_of(AttributeKind::Until) {
            return LoopBound::Until(term);
        }
        if let Some(term) = field.attributes.value_of(AttributeKind::UntilIncluding) {
            return LoopBound::UntilIncluding(term);
        }
        LoopBound::UntilInput
    }

    /// Literals eligible for look-ahead get a token ID.
    fn literal_token(&mut self, ctor: ExprId) -> Option<TokenId> {
        match &self.ctx.expr(ctor).kind {
            ExprKind::Ctor(Ctor::Bytes(_) | Ctor::RegExp(_)) => {
                let id = self.next_token;
                self.next_token += 1;
                Some(id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{ast::context::Dialect, ast::decl::DeclKind, operators::Registry};

    fn grammar_for(source: &str) -> (AstContext, Production) {
        let mut ctx = AstContext::new();
        crate::parse::parse_module(&mut ctx, source, Path::new("t.sdl"), Dialect::Sdl).expect("parse");
        let registry = Registry::build(&ctx);
        crate::resolver::resolve(&mut ctx, &registry).expect("resolve");
        let (_, module) = ctx.modules().next().expect("module");
        let DeclKind::Type { ty } = ctx.decl(module.decls[0]).kind else { panic!() };
        let unit_ty = ctx.resolve_type(ty);
        let production = GrammarBuilder::new(&ctx).build(unit_ty);
        (ctx, production)
    }

    #[test]
    fn literal_field_becomes_literal_production() {
        let (_, g) = grammar_for("module M;\ntype X = unit { x: b\"HELLO\"; };");
        let Production::Sequence(seq) = g else { panic!() };
        assert!(matches!(seq[0], Production::Literal { token: Some(_), .. }));
    }

    #[test]
    fn counted_container_becomes_count_loop() {
        let (_, g) = grammar_for("module M;\ntype X = unit { n: uint8; xs: uint16[n]; };");
        let Production::Sequence(seq) = g else { panic!() };
        assert!(matches!(seq[0], Production::Type { .. }));
        assert!(matches!(
            &seq[1],
            Production::Loop {
                bound: LoopBound::Count(_),
                ..
            }
        ));
    }

    #[test]
    fn unbounded_loop_before_literal_becomes_look_ahead() {
        let (_, g) = grammar_for("module M;\ntype X = unit { xs: uint8[]; t: b\"END\"; };");
        let Production::Sequence(seq) = g else { panic!() };
        assert_eq!(seq.len(), 1);
        assert!(matches!(seq[0], Production::LookAhead(_, _)));
    }

    #[test]
    fn switch_with_scrutinee_keeps_cases_and_default() {
        let (_, g) = grammar_for(
            "module M;\ntype X = unit { t: uint8; switch (self.t) { 1 -> a: uint8; * -> b: uint16; }; };",
        );
        let Production::Sequence(seq) = g else { panic!() };
        let Production::Switch { scrutinee, cases, default } = &seq[1] else { panic!() };
        assert!(scrutinee.is_some());
        assert_eq!(cases.len(), 1);
        assert!(default.is_some());
    }

    #[test]
    fn guarded_field_becomes_alternation() {
        let (_, g) = grammar_for("module M;\ntype X = unit { f: uint8; x: uint8 if (self.f == 1); };");
        let Production::Sequence(seq) = g else { panic!() };
        assert!(matches!(&seq[1], Production::Alternation { arms, .. } if arms.len() == 1));
    }
}
