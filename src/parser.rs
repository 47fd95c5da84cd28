use crate::ast::*;
use crate::error::ParseError;
use crate::token::{AssignOp, Span, Spanned, Token};

/// Nesting budget for one expression. Parenthesised, assigned, conditional
/// and unary operands each take a level, as does the right side of `**`.
/// Flat operator runs collect into one chain and cost nothing, so `a+b+...`
/// compiles at any length.
pub const MAX_DEPTH: usize = 256;

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

/// Binding power of a binary operator token, with its AST form.
/// Higher binds tighter; `**` is the only right-associative one.
fn binary_op(token: &Token) -> Option<(u8, ChainOp)> {
    use ChainOp::{Binary as Bin, Logical as Logic};
    let entry = match token {
        Token::PipePipe => (1, Logic(LogicalOp::Or)),
        Token::AmpAmp => (2, Logic(LogicalOp::And)),
        Token::Pipe => (3, Bin(BinaryOp::BitOr)),
        Token::Caret => (4, Bin(BinaryOp::BitXor)),
        Token::Amp => (5, Bin(BinaryOp::BitAnd)),
        Token::EqEq => (6, Bin(BinaryOp::Eq)),
        Token::NotEq => (6, Bin(BinaryOp::Ne)),
        Token::Lt => (7, Bin(BinaryOp::Lt)),
        Token::Le => (7, Bin(BinaryOp::Le)),
        Token::Gt => (7, Bin(BinaryOp::Gt)),
        Token::Ge => (7, Bin(BinaryOp::Ge)),
        Token::Shl => (8, Bin(BinaryOp::Shl)),
        Token::Shr => (8, Bin(BinaryOp::Shr)),
        Token::UShr => (8, Bin(BinaryOp::UShr)),
        Token::Plus => (9, Bin(BinaryOp::Add)),
        Token::Minus => (9, Bin(BinaryOp::Sub)),
        Token::Star => (10, Bin(BinaryOp::Mul)),
        Token::Slash => (10, Bin(BinaryOp::Div)),
        Token::Percent => (10, Bin(BinaryOp::Rem)),
        Token::StarStar => (11, Bin(BinaryOp::Pow)),
        _ => return None,
    };
    Some(entry)
}

fn compound_op(op: AssignOp) -> BinaryOp {
    match op {
        AssignOp::Add => BinaryOp::Add,
        AssignOp::Sub => BinaryOp::Sub,
        AssignOp::Mul => BinaryOp::Mul,
        AssignOp::Div => BinaryOp::Div,
        AssignOp::Rem => BinaryOp::Rem,
        AssignOp::Pow => BinaryOp::Pow,
        AssignOp::Shl => BinaryOp::Shl,
        AssignOp::Shr => BinaryOp::Shr,
        AssignOp::UShr => BinaryOp::UShr,
        AssignOp::And => BinaryOp::BitAnd,
        AssignOp::Or => BinaryOp::BitOr,
        AssignOp::Xor => BinaryOp::BitXor,
    }
}

fn close_chain(head: Expr, links: Vec<Link>) -> Expr {
    match links.last() {
        Some(last) => {
            let span = head.span.to(last.rhs.span);
            Expr::new(
                ExprKind::Chain {
                    head: Box::new(head),
                    links,
                },
                span,
            )
        }
        None => head,
    }
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0, depth: 0 }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) -> Spanned {
        let s = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        s
    }

    fn prev_end(&self) -> usize {
        self.tokens[self.pos.saturating_sub(1)].span.end
    }

    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Token::EOF => ParseError::UnexpectedEOF {
                expected: expected.into(),
                pos: self.span().start,
            },
            found => ParseError::UnexpectedToken {
                expected: expected.into(),
                found: found.clone(),
                span: self.span(),
            },
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<Spanned, ParseError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ── Entry point ──────────────────────────────────────────

    /// Parse a whole expression; trailing tokens are an error.
    pub fn parse_program(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_sequence()?;
        if !self.check(&Token::EOF) {
            return Err(self.unexpected("operator or end of expression"));
        }
        Ok(expr)
    }

    // ── Expressions ─────────────────────────────────────────

    fn parse_sequence(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_assignment()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.parse_assignment()?);
        }
        let span = Span::new(start.start, self.prev_end());
        Ok(Expr::new(ExprKind::Sequence(items), span))
    }

    /// Take one level of the nesting budget; pair with `self.depth -= 1`.
    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep { span: self.span() });
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_assignment_inner();
        self.depth -= 1;
        result
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Eq => None,
            Token::OpAssign(op) => Some(compound_op(*op)),
            _ => return Ok(target),
        };
        let ExprKind::Ident(name) = &target.kind else {
            return Err(ParseError::InvalidAssignmentTarget { span: target.span });
        };
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.to(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                target: name.clone(),
                target_span: target.span,
                op,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(1)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_assignment()?;
        self.expect(&Token::Colon, "':'")?;
        let otherwise = self.parse_assignment()?;
        let span = cond.span.to(otherwise.span);
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    /// Precedence climbing over the binary operator table. Consecutive
    /// operators of one level extend the same chain; a lower level wraps the
    /// chain so far as the head of a new one.
    fn parse_binary(&mut self, min_power: u8) -> Result<Expr, ParseError> {
        let mut head = self.parse_unary()?;
        let mut links = Vec::new();
        let mut level = 0;
        while let Some((power, op)) = binary_op(self.peek()) {
            if power < min_power {
                break;
            }
            if power != level {
                head = close_chain(head, std::mem::take(&mut links));
                level = power;
            }
            self.advance();
            let rhs = if op == ChainOp::Binary(BinaryOp::Pow) {
                self.enter()?;
                let rhs = self.parse_binary(power)?;
                self.depth -= 1;
                rhs
            } else {
                self.parse_binary(power + 1)?
            };
            links.push(Link { op, rhs });
        }
        Ok(close_chain(head, links))
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            _ => return self.parse_primary(),
        };
        let start = self.advance().span;
        self.enter()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        let span = start.to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::Number(n) => {
                let span = self.advance().span;
                Ok(Expr::new(ExprKind::Number(n), span))
            }
            Token::Ident(_) => self.parse_name(),
            Token::LParen => {
                let start = self.advance().span;
                let inner = self.parse_sequence()?;
                let end = self.expect(&Token::RParen, "')'")?.span;
                // Keep the inner node but widen its span to the parentheses.
                Ok(Expr::new(inner.kind, start.to(end)))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    /// A name, `Math.name`, or a call of either.
    fn parse_name(&mut self) -> Result<Expr, ParseError> {
        let (mut name, mut span) = self.expect_ident()?;
        if name == "Math" && self.eat(&Token::Dot) {
            let (member, member_span) = self.expect_ident()?;
            name = member;
            span = span.to(member_span);
        }

        if !self.eat(&Token::LParen) {
            return Ok(Expr::new(ExprKind::Ident(name), span));
        }

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_assignment()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_assignment()?);
            }
        }
        let end = self.expect(&Token::RParen, "')'")?.span;
        Ok(Expr::new(
            ExprKind::Call {
                callee: name,
                callee_span: span,
                args,
            },
            span.to(end),
        ))
    }
}
