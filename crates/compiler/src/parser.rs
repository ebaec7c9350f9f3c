//! Parser (C4)
//!
//! Recursive descent over declarations/statements with a Pratt expression
//! grammar, panic-mode error recovery (§4.2). Consumes the lexer's token
//! sequence and produces a [`Module`].

use crate::ast::*;
use crate::token::{Keyword, Literal, NumSuffix, Op, Token, TokenKind};
use seraphic_core::{Diagnostic, DiagnosticKind, Diagnostics, Severity, SourceLocation};

/// Declaration keywords `synchronize()` treats as statement-boundary
/// anchors (§4.2).
const DECL_SYNC_KEYWORDS: &[Keyword] = &[
    Keyword::Fn,
    Keyword::Let,
    Keyword::Const,
    Keyword::Struct,
    Keyword::Enum,
    Keyword::Use,
    Keyword::Impl,
    Keyword::Foreign,
    Keyword::Type,
];

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    filename: &'a str,
}

type PResult<T> = Result<T, ()>;

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token<'a>>, filename: &'a str) -> Self {
        Parser {
            tokens,
            pos: 0,
            filename,
        }
    }

    // -- token stream primitives -----------------------------------------

    fn current(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &Token<'a> {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn is_at_end(&self) -> bool {
        self.current().is_eof()
    }

    fn advance(&mut self) -> Token<'a> {
        let tok = self.current().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        tok
    }

    fn check_op(&self, op: Op) -> bool {
        self.current().as_op() == Some(op)
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        self.current().as_keyword() == Some(kw)
    }

    fn match_op(&mut self, op: Op) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, diags: &mut Diagnostics, message: impl Into<String>) {
        if diags.is_in_panic() {
            return;
        }
        diags.push(Diagnostic::new(
            DiagnosticKind::Syntax,
            Severity::Error,
            self.current().loc,
            message,
        ));
        diags.enter_panic();
    }

    fn consume_op(&mut self, op: Op, diags: &mut Diagnostics, what: &str) -> PResult<Token<'a>> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            self.error(diags, format!("expected {what}"));
            Err(())
        }
    }

    fn expect_ident(&mut self, diags: &mut Diagnostics) -> PResult<(&'a str, SourceLocation<'a>)> {
        match self.current().kind {
            TokenKind::Ident(name) => {
                let loc = self.current().loc;
                self.advance();
                Ok((name, loc))
            }
            _ => {
                self.error(diags, "expected identifier");
                Err(())
            }
        }
    }

    /// Skip tokens until a statement boundary (a consumed `;`) or the start
    /// of a declaration keyword, matching §4.2's recovery policy. A stray
    /// `}` is consumed on the way so unbalanced braces can't loop forever.
    fn synchronize(&mut self, diags: &mut Diagnostics) {
        diags.leave_panic();
        while !self.is_at_end() {
            if self.check_op(Op::Semi) {
                self.advance();
                return;
            }
            if let Some(kw) = self.current().as_keyword() {
                if DECL_SYNC_KEYWORDS.contains(&kw) {
                    return;
                }
            }
            if self.check_op(Op::RBrace) {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    // -- module / declarations -------------------------------------------

    pub fn parse(&mut self, diags: &mut Diagnostics) -> Module<'a> {
        let mut decls = Vec::new();
        while !self.is_at_end() {
            match self.parse_decl(diags) {
                Ok(decl) => decls.push(decl),
                Err(()) => self.synchronize(diags),
            }
        }
        Module { decls }
    }

    fn parse_effect_annotation(&mut self, diags: &mut Diagnostics) -> Option<EffectAnnotation> {
        if !self.check_op(Op::LBracket) {
            return None;
        }
        self.advance();
        let mut effects = Vec::new();
        if self.match_kw(Keyword::Pure) {
            effects.push(Effect::Pure);
        } else if self.match_kw(Keyword::Effects) {
            let _ = self.consume_op(Op::LParen, diags, "'(' after effects");
            loop {
                let name_tok = self.current().clone();
                let effect = match name_tok.kind {
                    TokenKind::Keyword(Keyword::Void) => Some(Effect::Void),
                    TokenKind::Keyword(Keyword::Persist) => Some(Effect::Persist),
                    TokenKind::Keyword(Keyword::Network) => Some(Effect::Network),
                    TokenKind::Keyword(Keyword::Timer) => Some(Effect::Timer),
                    TokenKind::Keyword(Keyword::Io) => Some(Effect::Io),
                    TokenKind::Ident(_) => {
                        diags.push(Diagnostic::new(
                            DiagnosticKind::Syntax,
                            Severity::Warning,
                            name_tok.loc,
                            "unknown effect name",
                        ));
                        None
                    }
                    _ => None,
                };
                self.advance();
                if let Some(e) = effect {
                    effects.push(e);
                }
                if !self.match_op(Op::Comma) {
                    break;
                }
            }
            let _ = self.consume_op(Op::RParen, diags, "')' after effect list");
        }
        let _ = self.consume_op(Op::RBracket, diags, "']' after effect annotation");
        Some(EffectAnnotation { effects })
    }

    fn parse_decl(&mut self, diags: &mut Diagnostics) -> PResult<Decl<'a>> {
        let effects = self.parse_effect_annotation(diags);
        if self.check_kw(Keyword::Fn) {
            return Ok(Decl::Function(self.parse_function(diags, effects, None)?));
        }
        if self.check_kw(Keyword::Let) || self.check_kw(Keyword::Const) {
            return Ok(Decl::Let(self.parse_let(diags)?));
        }
        if self.check_kw(Keyword::Struct) {
            return Ok(Decl::Struct(self.parse_struct(diags)?));
        }
        if self.check_kw(Keyword::Enum) {
            return Ok(Decl::Enum(self.parse_enum(diags)?));
        }
        if self.check_kw(Keyword::Impl) {
            return Ok(Decl::Impl(self.parse_impl(diags)?));
        }
        self.error(diags, "expected a declaration (fn, let, const, struct, enum, impl)");
        Err(())
    }

    fn parse_type(&mut self, diags: &mut Diagnostics) -> PResult<Type<'a>> {
        if self.match_op(Op::VoidProp) {
            return Ok(Type::VoidAble(Box::new(self.parse_type(diags)?)));
        }
        if self.match_op(Op::Star) {
            return Ok(Type::Pointer(Box::new(self.parse_type(diags)?)));
        }
        if self.match_op(Op::Amp) {
            let mutable = self.match_kw(Keyword::Mut);
            return Ok(Type::Reference {
                mutable,
                inner: Box::new(self.parse_type(diags)?),
            });
        }
        if self.match_op(Op::LBracket) {
            let elem = self.parse_type(diags)?;
            if self.match_op(Op::Semi) {
                let len = match self.current().kind {
                    TokenKind::Literal(Literal::Int(n, _)) => {
                        self.advance();
                        n
                    }
                    _ => {
                        self.error(diags, "expected array length");
                        return Err(());
                    }
                };
                self.consume_op(Op::RBracket, diags, "']' after array type")?;
                return Ok(Type::Array {
                    elem: Box::new(elem),
                    len,
                });
            }
            self.consume_op(Op::RBracket, diags, "']' after slice element type")?;
            return Ok(Type::Slice(Box::new(elem)));
        }
        if self.check_kw(Keyword::Fn) {
            self.advance();
            self.consume_op(Op::LParen, diags, "'(' in function type")?;
            let mut params = Vec::new();
            if !self.check_op(Op::RParen) {
                loop {
                    params.push(self.parse_type(diags)?);
                    if !self.match_op(Op::Comma) {
                        break;
                    }
                }
            }
            self.consume_op(Op::RParen, diags, "')' in function type")?;
            let ret = if self.match_op(Op::Arrow) {
                self.parse_type(diags)?
            } else {
                Type::Primitive(PrimitiveType::Void)
            };
            return Ok(Type::Function {
                params,
                ret: Box::new(ret),
            });
        }
        if let Some(prim) = self.primitive_from_keyword() {
            self.advance();
            return Ok(Type::Primitive(prim));
        }
        if let TokenKind::Ident(name) = self.current().kind {
            self.advance();
            return Ok(Type::Named(name));
        }
        self.error(diags, "expected a type");
        Err(())
    }

    fn primitive_from_keyword(&self) -> Option<PrimitiveType> {
        match self.current().as_keyword()? {
            Keyword::Bool => Some(PrimitiveType::Bool),
            Keyword::Char => Some(PrimitiveType::Char),
            Keyword::I8 => Some(PrimitiveType::I8),
            Keyword::I16 => Some(PrimitiveType::I16),
            Keyword::I32 => Some(PrimitiveType::I32),
            Keyword::I64 => Some(PrimitiveType::I64),
            Keyword::U8 => Some(PrimitiveType::U8),
            Keyword::U16 => Some(PrimitiveType::U16),
            Keyword::U32 => Some(PrimitiveType::U32),
            Keyword::U64 => Some(PrimitiveType::U64),
            Keyword::Scalar => Some(PrimitiveType::Scalar),
            Keyword::Dual => Some(PrimitiveType::Dual),
            Keyword::Galactic => Some(PrimitiveType::Galactic),
            Keyword::Void => Some(PrimitiveType::Void),
            _ => None,
        }
    }

    fn parse_function(
        &mut self,
        diags: &mut Diagnostics,
        effects: Option<EffectAnnotation>,
        receiver: Option<&'a str>,
    ) -> PResult<FunctionDecl<'a>> {
        let fn_loc = self.current().loc;
        self.advance(); // 'fn'
        let (name, _) = self.expect_ident(diags)?;
        self.consume_op(Op::LParen, diags, "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check_op(Op::RParen) {
            loop {
                let (pname, ploc) = self.expect_ident(diags)?;
                self.consume_op(Op::Colon, diags, "':' after parameter name")?;
                let ty = self.parse_type(diags)?;
                params.push(Param {
                    name: pname,
                    ty,
                    span: ploc,
                });
                if !self.match_op(Op::Comma) {
                    break;
                }
            }
        }
        self.consume_op(Op::RParen, diags, "')' after parameters")?;
        let return_type = if self.match_op(Op::Arrow) {
            Some(self.parse_type(diags)?)
        } else {
            None
        };
        let body = if self.match_op(Op::Semi) {
            None
        } else {
            Some(self.parse_block(diags)?)
        };
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            effects,
            receiver,
            span: fn_loc,
        })
    }

    fn parse_let(&mut self, diags: &mut Diagnostics) -> PResult<LetDecl<'a>> {
        let loc = self.current().loc;
        let is_const = self.check_kw(Keyword::Const);
        self.advance(); // 'let' or 'const'
        let mutable = self.match_kw(Keyword::Mut);
        let (name, _) = self.expect_ident(diags)?;
        let ty = if self.match_op(Op::Colon) {
            Some(self.parse_type(diags)?)
        } else {
            None
        };
        let init = if self.match_op(Op::Assign) {
            Some(self.parse_expr(diags)?)
        } else {
            None
        };
        if ty.is_none() && init.is_none() {
            self.error(diags, "'let' requires a type annotation or an initializer");
            return Err(());
        }
        self.consume_op(Op::Semi, diags, "';' after let/const")?;
        Ok(LetDecl {
            name,
            mutable,
            ty,
            init,
            is_const,
            span: loc,
        })
    }

    fn parse_struct(&mut self, diags: &mut Diagnostics) -> PResult<StructDecl<'a>> {
        let loc = self.current().loc;
        self.advance(); // 'struct'
        let (name, _) = self.expect_ident(diags)?;
        self.consume_op(Op::LBrace, diags, "'{' after struct name")?;
        let mut fields = Vec::new();
        while !self.check_op(Op::RBrace) && !self.is_at_end() {
            let (fname, floc) = self.expect_ident(diags)?;
            self.consume_op(Op::Colon, diags, "':' after field name")?;
            let ty = self.parse_type(diags)?;
            fields.push(FieldDef {
                name: fname,
                ty,
                span: floc,
            });
            if !self.match_op(Op::Comma) {
                break;
            }
        }
        self.consume_op(Op::RBrace, diags, "'}' after struct fields")?;
        Ok(StructDecl {
            name,
            fields,
            span: loc,
        })
    }

    fn parse_enum(&mut self, diags: &mut Diagnostics) -> PResult<EnumDecl<'a>> {
        let loc = self.current().loc;
        self.advance(); // 'enum'
        let (name, _) = self.expect_ident(diags)?;
        self.consume_op(Op::LBrace, diags, "'{' after enum name")?;
        let mut variants = Vec::new();
        while !self.check_op(Op::RBrace) && !self.is_at_end() {
            let (vname, vloc) = self.expect_ident(diags)?;
            let payload = if self.match_op(Op::LParen) {
                let ty = self.parse_type(diags)?;
                self.consume_op(Op::RParen, diags, "')' after variant payload")?;
                Some(ty)
            } else {
                None
            };
            variants.push(EnumVariant {
                name: vname,
                payload,
                span: vloc,
            });
            if !self.match_op(Op::Comma) {
                break;
            }
        }
        self.consume_op(Op::RBrace, diags, "'}' after enum variants")?;
        Ok(EnumDecl {
            name,
            variants,
            span: loc,
        })
    }

    fn parse_impl(&mut self, diags: &mut Diagnostics) -> PResult<ImplDecl<'a>> {
        let loc = self.current().loc;
        self.advance(); // 'impl'
        let (type_name, _) = self.expect_ident(diags)?;
        self.consume_op(Op::LBrace, diags, "'{' after impl type")?;
        let mut methods = Vec::new();
        while !self.check_op(Op::RBrace) && !self.is_at_end() {
            let effects = self.parse_effect_annotation(diags);
            if !self.check_kw(Keyword::Fn) {
                self.error(diags, "expected 'fn' inside impl block");
                return Err(());
            }
            methods.push(self.parse_function(diags, effects, Some(type_name))?);
        }
        self.consume_op(Op::RBrace, diags, "'}' after impl body")?;
        Ok(ImplDecl {
            type_name,
            methods,
            span: loc,
        })
    }

    // -- statements --------------------------------------------------------

    fn parse_block(&mut self, diags: &mut Diagnostics) -> PResult<Block<'a>> {
        let loc = self.current().loc;
        self.consume_op(Op::LBrace, diags, "'{' to start a block")?;
        let mut stmts = Vec::new();
        let mut tail = None;
        while !self.check_op(Op::RBrace) && !self.is_at_end() {
            if self.is_expr_start() {
                let start_pos = self.pos;
                match self.parse_expr(diags) {
                    Ok(expr) => {
                        if self.match_op(Op::Semi) {
                            stmts.push(Stmt::Expr(expr));
                        } else if self.check_op(Op::RBrace) {
                            tail = Some(Box::new(expr));
                            break;
                        } else if Self::is_auto_statement(&expr) {
                            // if/match/block expressions need neither `;`
                            // nor to be the final tail (§4.2 edge case).
                            stmts.push(Stmt::Expr(expr));
                        } else {
                            self.error(diags, "expected ';' after expression statement");
                            self.pos = start_pos;
                            self.synchronize(diags);
                        }
                    }
                    Err(()) => self.synchronize(diags),
                }
            } else {
                match self.parse_stmt(diags) {
                    Ok(stmt) => stmts.push(stmt),
                    Err(()) => self.synchronize(diags),
                }
            }
        }
        self.consume_op(Op::RBrace, diags, "'}' to close a block")?;
        Ok(Block { stmts, tail, span: loc })
    }

    fn is_auto_statement(expr: &Expr<'a>) -> bool {
        matches!(
            expr.kind,
            ExprKind::If { .. } | ExprKind::Match { .. } | ExprKind::Block(_)
        )
    }

    fn is_expr_start(&self) -> bool {
        !matches!(
            self.current().as_keyword(),
            Some(
                Keyword::Let
                    | Keyword::Const
                    | Keyword::Return
                    | Keyword::Break
                    | Keyword::Continue
                    | Keyword::While
                    | Keyword::For
                    | Keyword::Persist
                    | Keyword::Aether
                    | Keyword::Recover
            )
        )
    }

    fn parse_stmt(&mut self, diags: &mut Diagnostics) -> PResult<Stmt<'a>> {
        if self.check_kw(Keyword::Let) || self.check_kw(Keyword::Const) {
            return Ok(Stmt::Let(self.parse_let(diags)?));
        }
        if self.check_kw(Keyword::Return) {
            let loc = self.current().loc;
            self.advance();
            let value = if self.check_op(Op::Semi) {
                None
            } else {
                Some(self.parse_expr(diags)?)
            };
            self.consume_op(Op::Semi, diags, "';' after return")?;
            return Ok(Stmt::Return(value, loc));
        }
        if self.check_kw(Keyword::Break) {
            let loc = self.current().loc;
            self.advance();
            self.consume_op(Op::Semi, diags, "';' after break")?;
            return Ok(Stmt::Break(loc));
        }
        if self.check_kw(Keyword::Continue) {
            let loc = self.current().loc;
            self.advance();
            self.consume_op(Op::Semi, diags, "';' after continue")?;
            return Ok(Stmt::Continue(loc));
        }
        if self.check_kw(Keyword::While) {
            let loc = self.current().loc;
            self.advance();
            let cond = self.parse_expr(diags)?;
            let body = self.parse_block(diags)?;
            return Ok(Stmt::While { cond, body, span: loc });
        }
        if self.check_kw(Keyword::For) {
            let loc = self.current().loc;
            self.advance();
            let (var, _) = self.expect_ident(diags)?;
            if !self.match_kw(Keyword::In) {
                self.error(diags, "expected 'in' after for-loop variable");
                return Err(());
            }
            let start = self.parse_range_operand(diags)?;
            let inclusive = if self.match_op(Op::DotDotEq) {
                true
            } else {
                self.consume_op(Op::DotDot, diags, "'..' or '..=' in for-loop range")?;
                false
            };
            let end = self.parse_range_operand(diags)?;
            let body = self.parse_block(diags)?;
            return Ok(Stmt::For {
                var,
                start,
                end,
                inclusive,
                body,
                span: loc,
            });
        }
        if self.check_kw(Keyword::Persist) {
            let loc = self.current().loc;
            self.advance();
            return Ok(Stmt::Persist(self.parse_block(diags)?, loc));
        }
        if self.check_kw(Keyword::Aether) {
            let loc = self.current().loc;
            self.advance();
            return Ok(Stmt::Aether(self.parse_block(diags)?, loc));
        }
        if self.check_kw(Keyword::Recover) {
            let loc = self.current().loc;
            self.advance();
            return Ok(Stmt::Recover(self.parse_block(diags)?, loc));
        }
        self.error(diags, "expected a statement");
        Err(())
    }

    fn parse_range_operand(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        // Operands of a `for`-loop range are additive expressions; this
        // avoids `..`/`..=` themselves being swallowed by the general Pratt
        // table (ranges are handled as a dedicated grammar production, not a
        // binary operator, per §4.2).
        self.parse_precedence(diags, Precedence::Range)
    }

    // -- expressions (Pratt) -----------------------------------------------

    pub fn parse_expr(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        self.parse_precedence(diags, Precedence::Assignment)
    }

    fn parse_precedence(&mut self, diags: &mut Diagnostics, min_prec: Precedence) -> PResult<Expr<'a>> {
        let mut lhs = self.parse_prefix(diags)?;
        loop {
            if self.check_op(Op::DotDot) || self.check_op(Op::DotDotEq) {
                if min_prec > Precedence::Range {
                    break;
                }
                let inclusive = self.check_op(Op::DotDotEq);
                let loc = self.current().loc;
                self.advance();
                let end = self.parse_precedence(diags, Precedence::Range)?;
                lhs = Expr::new(
                    ExprKind::Range {
                        start: Box::new(lhs),
                        end: Box::new(end),
                        inclusive,
                    },
                    loc,
                );
                continue;
            }
            if self.check_op(Op::Assign) {
                if min_prec > Precedence::Assignment {
                    break;
                }
                let loc = self.current().loc;
                self.advance();
                // right-associative
                let rhs = self.parse_precedence(diags, Precedence::Assignment)?;
                lhs = Expr::new(
                    ExprKind::Assign {
                        target: Box::new(lhs),
                        value: Box::new(rhs),
                    },
                    loc,
                );
                continue;
            }
            if self.check_kw(Keyword::As) {
                if min_prec > Precedence::Cast {
                    break;
                }
                let loc = self.current().loc;
                self.advance();
                let ty = self.parse_type(diags)?;
                lhs = Expr::new(
                    ExprKind::Cast {
                        expr: Box::new(lhs),
                        ty,
                    },
                    loc,
                );
                continue;
            }
            if let Some(op) = self.current().as_op() {
                if let Some((bin, prec)) = binary_op_and_prec(op) {
                    if prec < min_prec {
                        break;
                    }
                    let loc = self.current().loc;
                    self.advance();
                    let next_min = prec.next();
                    let rhs = self.parse_precedence(diags, next_min)?;
                    lhs = Expr::new(
                        ExprKind::Binary {
                            op: bin,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        loc,
                    );
                    continue;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        let tok = self.current().clone();
        let unary = match tok.as_op() {
            Some(Op::Minus) => Some(UnaryOp::Neg),
            Some(Op::Tilde) => Some(UnaryOp::BitNot),
            Some(Op::Amp) => Some(UnaryOp::AddrOf),
            Some(Op::Star) => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let expr = self.parse_precedence(diags, Precedence::Unary)?;
            return Ok(self.parse_postfix(
                diags,
                Expr::new(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    tok.loc,
                ),
            )?);
        }
        let primary = self.parse_primary(diags)?;
        self.parse_postfix(diags, primary)
    }

    fn parse_postfix(&mut self, diags: &mut Diagnostics, mut expr: Expr<'a>) -> PResult<Expr<'a>> {
        loop {
            if self.match_op(Op::VoidProp) {
                let span = expr.span;
                expr = Expr::new(ExprKind::VoidPropagate(Box::new(expr)), span);
                continue;
            }
            if self.match_op(Op::VoidAssert) {
                let span = expr.span;
                expr = Expr::new(ExprKind::VoidAssert(Box::new(expr)), span);
                continue;
            }
            if self.match_op(Op::LParen) {
                let mut args = Vec::new();
                if !self.check_op(Op::RParen) {
                    loop {
                        args.push(self.parse_expr(diags)?);
                        if !self.match_op(Op::Comma) {
                            break;
                        }
                    }
                }
                self.consume_op(Op::RParen, diags, "')' after call arguments")?;
                let span = expr.span;
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
                continue;
            }
            if self.match_op(Op::LBracket) {
                let index = self.parse_expr(diags)?;
                self.consume_op(Op::RBracket, diags, "']' after index")?;
                let span = expr.span;
                expr = Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
                continue;
            }
            if self.match_op(Op::Dot) {
                let (name, _) = self.expect_ident(diags)?;
                if self.match_op(Op::LParen) {
                    let mut args = Vec::new();
                    if !self.check_op(Op::RParen) {
                        loop {
                            args.push(self.parse_expr(diags)?);
                            if !self.match_op(Op::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume_op(Op::RParen, diags, "')' after method arguments")?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        },
                        span,
                    );
                } else {
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Field {
                            base: Box::new(expr),
                            field: name,
                        },
                        span,
                    );
                }
                continue;
            }
            break;
        }
        Ok(expr)
    }

    /// Look ahead to decide whether `IDENT {` commits to a struct literal:
    /// only when the brace is immediately followed by `IDENT :` or an empty
    /// `{}` (§4.2 edge case), so `match x { ... }` and `if cond { ... }`
    /// never get swallowed as a struct initializer.
    fn looks_like_struct_literal(&self) -> bool {
        if self.peek_at(1).as_op() == Some(Op::RBrace) {
            return true;
        }
        matches!(self.peek_at(1).kind, TokenKind::Ident(_))
            && self.peek_at(2).as_op() == Some(Op::Colon)
    }

    fn parse_primary(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::Literal(Literal::Int(v, suffix)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Int(v, suffix), tok.loc))
            }
            TokenKind::Literal(Literal::Float(v, _)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Float(v), tok.loc))
            }
            TokenKind::Literal(Literal::Str(s)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(s), tok.loc))
            }
            TokenKind::Literal(Literal::Char(c)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Char(c), tok.loc))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), tok.loc))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), tok.loc))
            }
            TokenKind::Keyword(Keyword::Void) => {
                self.advance();
                Ok(Expr::new(ExprKind::Void, tok.loc))
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(diags),
            TokenKind::Keyword(Keyword::Match) => self.parse_match(diags),
            TokenKind::Ident(name) => {
                self.advance();
                if self.check_op(Op::LBrace) && self.looks_like_struct_literal() {
                    return self.parse_struct_init(diags, name, tok.loc);
                }
                Ok(Expr::new(ExprKind::Ident(name), tok.loc))
            }
            TokenKind::Op(Op::LParen) => {
                self.advance();
                let inner = self.parse_expr(diags)?;
                self.consume_op(Op::RParen, diags, "')' to close parenthesized expression")?;
                Ok(inner)
            }
            TokenKind::Op(Op::LBracket) => {
                self.advance();
                let mut elems = Vec::new();
                if !self.check_op(Op::RBracket) {
                    loop {
                        elems.push(self.parse_expr(diags)?);
                        if !self.match_op(Op::Comma) {
                            break;
                        }
                    }
                }
                self.consume_op(Op::RBracket, diags, "']' after array literal")?;
                Ok(Expr::new(ExprKind::Array(elems), tok.loc))
            }
            TokenKind::Op(Op::LBrace) => {
                let block = self.parse_block(diags)?;
                Ok(Expr::new(ExprKind::Block(block), tok.loc))
            }
            TokenKind::Op(Op::Pipe) => self.parse_closure(diags),
            _ => {
                self.error(diags, "expected an expression");
                Err(())
            }
        }
    }

    fn parse_struct_init(
        &mut self,
        diags: &mut Diagnostics,
        type_name: &'a str,
        loc: SourceLocation<'a>,
    ) -> PResult<Expr<'a>> {
        self.advance(); // '{'
        let mut fields = Vec::new();
        while !self.check_op(Op::RBrace) && !self.is_at_end() {
            let (fname, _) = self.expect_ident(diags)?;
            self.consume_op(Op::Colon, diags, "':' after struct field name")?;
            let value = self.parse_expr(diags)?;
            fields.push(StructFieldInit { name: fname, value });
            if !self.match_op(Op::Comma) {
                break;
            }
        }
        self.consume_op(Op::RBrace, diags, "'}' after struct literal fields")?;
        Ok(Expr::new(ExprKind::StructInit { type_name, fields }, loc))
    }

    fn parse_if(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        let loc = self.current().loc;
        self.advance(); // 'if'
        let cond = self.parse_no_struct_literal_expr(diags)?;
        let then_branch = self.parse_block(diags)?;
        let else_branch = if self.match_kw(Keyword::Else) {
            if self.check_kw(Keyword::If) {
                Some(Box::new(self.parse_if(diags)?))
            } else {
                let block = self.parse_block(diags)?;
                Some(Box::new(Expr::new(ExprKind::Block(block), loc)))
            }
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_branch,
                else_branch,
            },
            loc,
        ))
    }

    fn parse_match(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        let loc = self.current().loc;
        self.advance(); // 'match'
        let scrutinee = self.parse_no_struct_literal_expr(diags)?;
        self.consume_op(Op::LBrace, diags, "'{' to start match arms")?;
        let mut arms = Vec::new();
        while !self.check_op(Op::RBrace) && !self.is_at_end() {
            let arm_loc = self.current().loc;
            let pattern = self.parse_pattern(diags)?;
            self.consume_op(Op::FatArrow, diags, "'=>' after match pattern")?;
            let body = self.parse_expr(diags)?;
            arms.push(MatchArm {
                pattern,
                body,
                span: arm_loc,
            });
            if !self.match_op(Op::Comma) {
                // allow a bare block-style arm without a trailing comma
            }
        }
        self.consume_op(Op::RBrace, diags, "'}' to close match")?;
        Ok(Expr::new(
            ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
            loc,
        ))
    }

    fn parse_pattern(&mut self, diags: &mut Diagnostics) -> PResult<Pattern<'a>> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::Ident("_") => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::Literal(Literal::Int(v, _)) => {
                self.advance();
                Ok(Pattern::Int(v))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Pattern::Ident(name))
            }
            _ => {
                self.error(diags, "expected a match pattern");
                Err(())
            }
        }
    }

    /// `if`/`match` scrutinees must not swallow a following `{` as a struct
    /// literal, since that brace opens the branch/arm block. We simply
    /// forbid the struct-literal commit by parsing at a precedence that
    /// still allows it — the disambiguation already requires `IDENT :` or
    /// `IDENT }` immediately inside, which a branch block never is.
    fn parse_no_struct_literal_expr(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        self.parse_expr(diags)
    }

    fn parse_closure(&mut self, diags: &mut Diagnostics) -> PResult<Expr<'a>> {
        let loc = self.current().loc;
        self.advance(); // '|'
        let mut params = Vec::new();
        if !self.check_op(Op::Pipe) {
            loop {
                let (pname, ploc) = self.expect_ident(diags)?;
                let ty = if self.match_op(Op::Colon) {
                    self.parse_type(diags)?
                } else {
                    Type::Primitive(PrimitiveType::I64)
                };
                params.push(Param {
                    name: pname,
                    ty,
                    span: ploc,
                });
                if !self.match_op(Op::Comma) {
                    break;
                }
            }
        }
        self.consume_op(Op::Pipe, diags, "'|' to close closure parameters")?;
        let body = if self.check_op(Op::LBrace) {
            self.parse_block(diags)?
        } else {
            let expr = self.parse_expr(diags)?;
            Block {
                stmts: Vec::new(),
                tail: Some(Box::new(expr)),
                span: loc,
            }
        };
        Ok(Expr::new(ExprKind::Closure { params, body }, loc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Range,
    Assignment,
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Comparison,
    Shift,
    Additive,
    Multiplicative,
    Cast,
    Unary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            Range => Assignment,
            Assignment => LogicalOr,
            LogicalOr => LogicalAnd,
            LogicalAnd => BitOr,
            BitOr => BitXor,
            BitXor => BitAnd,
            BitAnd => Equality,
            Equality => Comparison,
            Comparison => Shift,
            Shift => Additive,
            Additive => Multiplicative,
            Multiplicative => Cast,
            Cast => Unary,
            Unary => Unary,
        }
    }
}

fn binary_op_and_prec(op: Op) -> Option<(BinaryOp, Precedence)> {
    use Precedence::*;
    Some(match op {
        Op::OrOr => (BinaryOp::Or, LogicalOr),
        Op::AndAnd => (BinaryOp::And, LogicalAnd),
        Op::Pipe => (BinaryOp::BitOr, BitOr),
        Op::Caret => (BinaryOp::BitXor, BitXor),
        Op::Amp => (BinaryOp::BitAnd, BitAnd),
        Op::EqEq => (BinaryOp::Eq, Equality),
        Op::NotEq => (BinaryOp::Ne, Equality),
        Op::Lt => (BinaryOp::Lt, Comparison),
        Op::Le => (BinaryOp::Le, Comparison),
        Op::Gt => (BinaryOp::Gt, Comparison),
        Op::Ge => (BinaryOp::Ge, Comparison),
        Op::Shl => (BinaryOp::Shl, Shift),
        Op::Shr => (BinaryOp::Shr, Shift),
        Op::Plus => (BinaryOp::Add, Additive),
        Op::Minus => (BinaryOp::Sub, Additive),
        Op::Star => (BinaryOp::Mul, Multiplicative),
        Op::Slash => (BinaryOp::Div, Multiplicative),
        Op::Percent => (BinaryOp::Mod, Multiplicative),
        _ => return None,
    })
}

/// Parse a complete source buffer end to end. Test convenience wrapper,
/// equivalent to `tokenize` followed by `Parser::parse`; the driver keeps
/// lexer and parser diagnostics in separate lists so it can stop before
/// parsing a token stream the lexer already gave up on.
pub fn parse_source<'a>(source: &'a str, filename: &'a str) -> (Module<'a>, Diagnostics) {
    let (tokens, mut diags) = crate::lexer::tokenize(source, filename);
    let mut parser = Parser::new(tokens, filename);
    let module = parser.parse(&mut diags);
    (module, diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_empty_module() {
        let (module, diags) = parse_source("", "t.sr");
        assert!(!diags.has_errors());
        assert!(module.decls.is_empty());
    }

    #[test]
    fn hello_world_function() {
        let (module, diags) = parse_source("fn main() -> i32 { return 0; }", "t.sr");
        assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
        assert_eq!(module.decls.len(), 1);
        match &module.decls[0] {
            Decl::Function(f) => {
                assert_eq!(f.name, "main");
                assert!(f.body.is_some());
            }
            other => panic!("expected Function, got {other:?}"),
        }
    }

    #[test]
    fn struct_field_assignment_parses() {
        let src = "struct P { x: i32, y: i32 }\nfn main() -> i32 { let p: P; p.x = 3; p.y = 4; return p.x + p.y; }";
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
        assert_eq!(module.decls.len(), 2);
    }

    #[test]
    fn match_with_wildcard_and_int_patterns() {
        let src = "fn f(n: i64) -> i64 { match n { 1 => 10, 2 => 20, _ => 0 } }";
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
        let Decl::Function(f) = &module.decls[0] else {
            panic!("expected function");
        };
        let body = f.body.as_ref().unwrap();
        assert!(body.tail.is_some());
    }

    #[test]
    fn void_propagate_and_coalesce_roundtrip() {
        let src = "fn main() -> i64 { let x = div(10, 0)??; return x; }";
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
        assert_eq!(module.decls.len(), 1);
    }

    #[test]
    fn unclosed_paren_recovers_to_next_declaration() {
        let src = "fn broken( { }\nfn ok() -> i32 { return 1; }";
        let (module, diags) = parse_source(src, "t.sr");
        assert!(diags.has_errors());
        assert!(module.decls.iter().any(|d| matches!(d, Decl::Function(f) if f.name == "ok")));
    }

    #[test]
    fn range_is_a_dedicated_node_not_binary() {
        let src = "fn main() -> i64 { for i in 0..10 { } return 0; }";
        let (module, diags) = parse_source(src, "t.sr");
        assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
        let Decl::Function(f) = &module.decls[0] else {
            panic!("expected function")
        };
        assert!(matches!(f.body.as_ref().unwrap().stmts[0], Stmt::For { inclusive: false, .. }));
    }
}
