//! Literal matching.
//!
//! The emitted shape depends on the literal mode:
//!
//! - `Default`/`Skip`: a two-arm conditional on `lahead`: consume an
//!   already-peeked token, or wait for enough input, check, and advance.
//!   `Skip` emits the same code without binding a destination.
//! - `Try`: a probing expression yielding whether the literal matches at
//!   the current position, without committing.
//!
//! Regex literals run a token-matcher loop reacting to the three matcher
//! outcomes; integer and bitfield literals parse the underlying type and
//! compare against the expected value.

use crate::{
    ast::{expr::Ctor, node::ExprId, types::Ty},
    codegen::{LiteralMode, ParserBuilder},
    folder::{self, FoldStyle},
    iml::{ImlBlock, ImlExpr, ImlStmt, ImlType},
};

impl ParserBuilder<'_> {
    /// Emits a literal match; returns the value expression unless the mode
    /// is `Skip`.
    pub(crate) fn emit_literal(&mut self, ctor: ExprId, mode: LiteralMode, block: &mut ImlBlock) -> Option<ImlExpr> {
        let folded = match folder::fold(self.ctx, self.registry, ctor, FoldStyle::full()) {
            Ok(Some(folded)) => folded,
            Ok(None) => {
                let location = self.ctx.expr(ctor).location.clone();
                self.ctx
                    .diagnostics
                    .error("literal field requires a constant value", location);
                return None;
            }
            Err(err) => {
                self.ctx.diagnostics.error(err.message, err.location);
                return None;
            }
        };

        match folded {
            Ctor::Bytes(data) => self.emit_bytes_literal(&data, mode, block),
            Ctor::RegExp(patterns) => self.emit_regex_literal(&patterns, mode, block),
            Ctor::Unsigned { value, width } => self.emit_int_literal(value, width, false, mode, block),
            Ctor::Signed { value, width } => {
                self.emit_int_literal(value as u64, width, true, mode, block)
            }
            Ctor::Bitfield { ty, values } => self.emit_bitfield_literal(ty, &values, block),
            other => {
                let location = self.ctx.expr(ctor).location.clone();
                self.ctx
                    .diagnostics
                    .error(format!("cannot match literal of this kind: {other:?}"), location);
                None
            }
        }
    }

    /// The `Try`-mode probe: a boolean expression that is true when the
    /// literal matches at the current position. Waits for enough input
    /// first, treating end-of-data as a failed probe.
    pub(crate) fn emit_literal_probe(&mut self, ctor: ExprId, block: &mut ImlBlock) -> ImlExpr {
        let folded = folder::fold(self.ctx, self.registry, ctor, FoldStyle::full()).ok().flatten();
        match folded {
            Some(Ctor::Bytes(data)) => {
                let len = data.len() as u64;
                let have = self.fresh("have");
                let wait = self.wait_or_eod_expr(ImlExpr::uint(len));
                block.push(ImlStmt::Local {
                    id: have.clone(),
                    ty: Some(ImlType::Bool),
                    init: Some(wait),
                });
                ImlExpr::binary(
                    "&&",
                    ImlExpr::name(have),
                    ImlExpr::method(ImlExpr::name("cur"), "starts_with", vec![ImlExpr::BytesLit(data)]),
                )
            }
            Some(Ctor::RegExp(patterns)) => ImlExpr::call(
                "sdlc_rt::try_match",
                std::iter::once(ImlExpr::name("cur"))
                    .chain(patterns.into_iter().map(ImlExpr::Str))
                    .collect(),
            ),
            _ => ImlExpr::Bool(false),
        }
    }

    fn emit_bytes_literal(&mut self, data: &[u8], mode: LiteralMode, block: &mut ImlBlock) -> Option<ImlExpr> {
        let len = data.len() as u64;

        if mode == LiteralMode::Try {
            // Probing yields the would-be new position without committing.
            let pos = self.fresh("try");
            let cond = ImlExpr::method(ImlExpr::name("cur"), "starts_with", vec![ImlExpr::BytesLit(data.to_vec())]);
            block.push(ImlStmt::Local {
                id: pos.clone(),
                ty: Some(ImlType::View),
                init: Some(ImlExpr::Ternary {
                    cond: Box::new(cond),
                    then: Box::new(ImlExpr::method(ImlExpr::name("cur"), "advance", vec![ImlExpr::uint(len)])),
                    alt: Box::new(ImlExpr::name("cur")),
                }),
            });
            return Some(ImlExpr::name(pos));
        }

        // Consume an already-peeked look-ahead token.
        let mut consume_peeked = ImlBlock::new();
        consume_peeked.push(ImlStmt::Assert {
            cond: ImlExpr::binary("!=", ImlExpr::name("lahead"), ImlExpr::SInt { value: 0, width: 32 }),
            message: Some(ImlExpr::Str("look-ahead token lost".into())),
        });
        consume_peeked.push(ImlStmt::Assign {
            target: ImlExpr::name("cur"),
            value: ImlExpr::method(ImlExpr::name("cur"), "advance_to", vec![ImlExpr::name("lahead_end")]),
        });
        consume_peeked.push(ImlStmt::Assign {
            target: ImlExpr::name("lahead"),
            value: ImlExpr::SInt { value: 0, width: 32 },
        });

        // Or match it directly from the input.
        let mut match_direct = ImlBlock::new();
        self.wait_for_input(
            ImlExpr::uint(len),
            &format!("expecting {len} bytes for literal"),
            &mut match_direct,
        );
        let mut fail = ImlBlock::new();
        fail.push(ImlStmt::Throw {
            kind: "ParseError".into(),
            message: ImlExpr::Str(format!("expecting literal {}", crate::runtime::Bytes::new(data.to_vec()))),
        });
        match_direct.push(ImlStmt::If {
            cond: ImlExpr::Unary {
                op: "!",
                operand: Box::new(ImlExpr::method(
                    ImlExpr::name("cur"),
                    "starts_with",
                    vec![ImlExpr::BytesLit(data.to_vec())],
                )),
            },
            then: fail,
            alt: None,
        });
        match_direct.push(ImlStmt::Assign {
            target: ImlExpr::name("cur"),
            value: ImlExpr::method(ImlExpr::name("cur"), "advance", vec![ImlExpr::uint(len)]),
        });

        block.push(ImlStmt::If {
            cond: ImlExpr::binary("!=", ImlExpr::name("lahead"), ImlExpr::SInt { value: 0, width: 32 }),
            then: consume_peeked,
            alt: Some(match_direct),
        });

        if mode == LiteralMode::Skip {
            return None;
        }
        let value = self.fresh("lit");
        block.push(ImlStmt::Local {
            id: value.clone(),
            ty: Some(ImlType::Bytes),
            init: Some(ImlExpr::BytesLit(data.to_vec())),
        });
        Some(ImlExpr::name(value))
    }

    fn emit_regex_literal(&mut self, patterns: &[String], mode: LiteralMode, block: &mut ImlBlock) -> Option<ImlExpr> {
        let matcher = self.fresh("ms");
        let value = self.fresh("m");
        block.push(ImlStmt::Local {
            id: matcher.clone(),
            ty: None,
            init: Some(ImlExpr::method(
                ImlExpr::call(
                    "sdlc_rt::regexp",
                    patterns.iter().map(|p| ImlExpr::Str(p.clone())).collect(),
                ),
                "token_matcher",
                vec![],
            )),
        });
        block.push(ImlStmt::Local {
            id: value.clone(),
            ty: Some(ImlType::Bytes),
            init: None,
        });

        let mut loop_body = ImlBlock::new();
        let result = self.fresh("r");
        loop_body.push(ImlStmt::Local {
            id: result.clone(),
            ty: None,
            init: Some(ImlExpr::method(
                ImlExpr::name(matcher),
                "advance",
                vec![
                    ImlExpr::name("cur"),
                    ImlExpr::call("sdlc_rt::at_eod", vec![ImlExpr::name("data"), ImlExpr::name("cur")]),
                ],
            )),
        });
        let accept = ImlExpr::Index(Box::new(ImlExpr::name(result.clone())), Box::new(ImlExpr::uint(0)));
        let consumed = ImlExpr::Index(Box::new(ImlExpr::name(result)), Box::new(ImlExpr::uint(1)));

        // Need more data: wait, then retry from the matcher's state.
        let mut need_more = ImlBlock::new();
        need_more.push(ImlStmt::Expr(self.wait_or_eod_expr(ImlExpr::uint(1))));
        need_more.push(ImlStmt::Continue);
        loop_body.push(ImlStmt::If {
            cond: ImlExpr::binary("<", accept.clone(), ImlExpr::SInt { value: 0, width: 32 }),
            then: need_more,
            alt: None,
        });

        // Definite no-match is a parse error.
        let mut no_match = ImlBlock::new();
        no_match.push(ImlStmt::Throw {
            kind: "ParseError".into(),
            message: ImlExpr::Str(format!("failed to match regular expression /{}/", patterns.join("|"))),
        });
        loop_body.push(ImlStmt::If {
            cond: ImlExpr::binary("==", accept, ImlExpr::SInt { value: 0, width: 32 }),
            then: no_match,
            alt: None,
        });

        // Match: bind the consumed bytes and trim the view to the end.
        loop_body.push(ImlStmt::Assign {
            target: ImlExpr::name(value.clone()),
            value: ImlExpr::method(
                ImlExpr::name("cur"),
                "sub",
                vec![ImlExpr::uint(0), consumed.clone()],
            ),
        });
        loop_body.push(ImlStmt::Assign {
            target: ImlExpr::name("cur"),
            value: ImlExpr::method(ImlExpr::name("cur"), "advance", vec![consumed]),
        });
        loop_body.push(ImlStmt::Break);

        block.push(ImlStmt::While {
            cond: ImlExpr::Bool(true),
            body: loop_body,
        });

        (mode != LiteralMode::Skip).then(|| ImlExpr::name(value))
    }

    /// Integer literal: parse the integer type, then compare.
    fn emit_int_literal(
        &mut self,
        value: u64,
        width: u16,
        signed: bool,
        mode: LiteralMode,
        block: &mut ImlBlock,
    ) -> Option<ImlExpr> {
        let len = u64::from(width / 8);
        self.wait_for_input(ImlExpr::uint(len), &format!("expecting {len} bytes"), block);

        let ty = if signed { ImlType::SInt(width) } else { ImlType::UInt(width) };
        let parsed = self.fresh("p");
        let order = ImlExpr::name("ByteOrder::Network");
        block.push(ImlStmt::Local {
            id: parsed.clone(),
            ty: None,
            init: Some(ImlExpr::Unpack {
                ty,
                args: vec![ImlExpr::name("cur"), order],
            }),
        });
        let got = ImlExpr::Index(Box::new(ImlExpr::name(parsed.clone())), Box::new(ImlExpr::uint(0)));

        let expected = if signed {
            ImlExpr::SInt {
                value: value as i64,
                width,
            }
        } else {
            ImlExpr::UInt { value, width }
        };
        // On mismatch the view is left untouched, so the error position
        // points at the literal.
        let mut fail = ImlBlock::new();
        fail.push(ImlStmt::Throw {
            kind: "ParseError".into(),
            message: ImlExpr::Str(format!("expecting value {value}")),
        });
        block.push(ImlStmt::If {
            cond: ImlExpr::binary("!=", got.clone(), expected),
            then: fail,
            alt: None,
        });
        block.push(ImlStmt::Assign {
            target: ImlExpr::name("cur"),
            value: ImlExpr::Index(Box::new(ImlExpr::name(parsed)), Box::new(ImlExpr::uint(1))),
        });

        (mode != LiteralMode::Skip).then_some(got)
    }

    /// Bitfield literal: parse the word, then compare each declared range
    /// that carries an expected value.
    fn emit_bitfield_literal(
        &mut self,
        ty: crate::ast::node::TypeId,
        values: &[(String, u64)],
        block: &mut ImlBlock,
    ) -> Option<ImlExpr> {
        let resolved = self.ctx.resolve_type(ty);
        let Ty::Bitfield(bf) = self.ctx.ty(resolved).clone() else {
            return None;
        };
        let len = u64::from(bf.width / 8);
        self.wait_for_input(ImlExpr::uint(len), &format!("expecting {len} bytes"), block);

        let parsed = self.fresh("bf");
        block.push(ImlStmt::Local {
            id: parsed.clone(),
            ty: None,
            init: Some(ImlExpr::Unpack {
                ty: ImlType::UInt(bf.width),
                args: vec![
                    ImlExpr::name("cur"),
                    ImlExpr::name("ByteOrder::Network"),
                    ImlExpr::name("BitOrder::LSB0"),
                ],
            }),
        });
        let word = ImlExpr::Index(Box::new(ImlExpr::name(parsed.clone())), Box::new(ImlExpr::uint(0)));

        for (id, expected) in values {
            let Some(range) = bf.bit(id) else { continue };
            let bits = ImlExpr::call(
                "sdlc_rt::bits",
                vec![
                    word.clone(),
                    ImlExpr::uint(u64::from(range.lower)),
                    ImlExpr::uint(u64::from(range.upper)),
                ],
            );
            let mut fail = ImlBlock::new();
            fail.push(ImlStmt::Throw {
                kind: "ParseError".into(),
                message: ImlExpr::Str(format!("expecting {expected} in bit range '{id}'")),
            });
            block.push(ImlStmt::If {
                cond: ImlExpr::binary("!=", bits, ImlExpr::uint(*expected)),
                then: fail,
                alt: None,
            });
        }

        block.push(ImlStmt::Assign {
            target: ImlExpr::name("cur"),
            value: ImlExpr::Index(Box::new(ImlExpr::name(parsed)), Box::new(ImlExpr::uint(1))),
        });
        Some(word)
    }
}
