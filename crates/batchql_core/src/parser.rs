//! Recursive-descent parser for predicate text.
//!
//! ```text
//! predicate := '(' IDENT ',' IDENT ')' '=>' expr
//! expr      := and ('||' and)*
//! and       := cmp ('&&' cmp)*
//! cmp       := unary (CMP_OP unary)?
//! unary     := '!' unary | cast
//! cast      := postfix ('as' IDENT '?'?)*
//! postfix   := primary ('.' IDENT)*
//! primary   := IDENT | literal | '(' expr ')'
//! ```

use crate::error::SyntaxError;
use crate::expr::{BinaryOp, Expr, Literal, Predicate, ScalarType, Side, TypeRef};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::span::Span;

pub type ParseResult<T> = Result<T, SyntaxError>;

/// Parses `(parent, child) => body`.
pub fn parse_predicate(source: &str) -> ParseResult<Predicate> {
    let mut parser = Parser::new(source);
    let predicate = parser.parse_predicate()?;
    parser.expect(TokenKind::Eof)?;
    Ok(predicate)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    parent: &'a str,
    child: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Lexer::new(source).tokenize(),
            pos: 0,
            parent: "",
            child: "",
        }
    }

    fn current(&self) -> Token {
        // tokenize() always ends with Eof, and we never advance past it.
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self) -> TokenKind {
        self.current().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn text(&self, token: Token) -> &'a str {
        token.span.slice(self.source)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> SyntaxError {
        SyntaxError::new(message, self.source, span)
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let token = self.current();
        let found = match token.kind {
            TokenKind::Eof | TokenKind::Error => token.kind.describe().to_string(),
            _ => format!("`{}`", self.text(token)),
        };
        self.error(format!("expected {expected}, found {found}"), token.span)
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.at() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn parse_predicate(&mut self) -> ParseResult<Predicate> {
        self.expect(TokenKind::LParen)?;
        let parent = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::Comma)?;
        let child = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;

        self.parent = self.text(parent);
        self.child = self.text(child);
        if self.parent == self.child {
            return Err(self.error(
                format!("parameter `{}` is declared twice", self.child),
                child.span,
            ));
        }

        let body = self.parse_or()?;
        Ok(Predicate::new(self.parent, self.child, body))
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.at() == TokenKind::OrOr {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.at() == TokenKind::AndAnd {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::and(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_unary()?;
        let op = match self.at() {
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_unary()?;
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.at() == TokenKind::Bang {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cast()
    }

    fn parse_cast(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_postfix()?;
        while self.at() == TokenKind::As {
            self.advance();
            let name = self.expect(TokenKind::Ident)?;
            let scalar = ScalarType::from_name(self.text(name)).ok_or_else(|| {
                self.error(
                    format!("unknown conversion type `{}`", self.text(name)),
                    name.span,
                )
            })?;
            let nullable = self.at() == TokenKind::Question;
            if nullable {
                self.advance();
            }
            expr = Expr::convert(expr, TypeRef { scalar, nullable });
        }
        Ok(expr)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.at() == TokenKind::Dot {
            self.advance();
            let field = self.expect(TokenKind::Ident)?;
            expr = Expr::member(expr, self.text(field));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.current();
        let text = self.text(token);
        let expr = match token.kind {
            TokenKind::Ident if text == self.parent => Expr::Param(Side::Parent),
            TokenKind::Ident if text == self.child => Expr::Param(Side::Child),
            TokenKind::Ident => {
                return Err(self.error(
                    format!(
                        "unknown name `{text}`; expected `{}` or `{}`",
                        self.parent, self.child
                    ),
                    token.span,
                ))
            }
            TokenKind::IntLiteral => {
                let value = text
                    .parse()
                    .map_err(|_| self.error("integer literal out of range", token.span))?;
                Expr::Literal(Literal::Int(value))
            }
            TokenKind::FloatLiteral => {
                let value = text
                    .parse()
                    .map_err(|_| self.error("invalid float literal", token.span))?;
                Expr::Literal(Literal::Float(value))
            }
            TokenKind::StringLiteral => Expr::Literal(Literal::String(unescape(text))),
            TokenKind::True => Expr::Literal(Literal::Bool(true)),
            TokenKind::False => Expr::Literal(Literal::Bool(false)),
            TokenKind::Null => Expr::Literal(Literal::Null),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(expr)
    }
}

/// Strips the quotes of a string literal and resolves backslash escapes.
fn unescape(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_through_display() {
        let source = "(p, c) => c.key == p.fk && c.extra > 0";
        let predicate = parse_predicate(source).unwrap();
        assert_eq!(predicate.parent, "p");
        assert_eq!(predicate.child, "c");
        assert_eq!(predicate.to_string(), source);
    }

    #[test]
    fn test_parse_precedence() {
        let predicate =
            parse_predicate("(a, b) => b.x == a.x && b.y == 1 || b.z != \"q\"").unwrap();
        match &predicate.body {
            Expr::Binary {
                op: BinaryOp::Or,
                lhs,
                ..
            } => assert_eq!(lhs.conjuncts().len(), 2),
            other => panic!("expected `||` at the root, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_grouping_and_not() {
        let predicate = parse_predicate("(p, c) => !(c.a || c.b) && c.n >= -3").unwrap();
        assert_eq!(predicate.to_string(), "(p, c) => !(c.a || c.b) && c.n >= -3");
    }

    #[test]
    fn test_parse_cast() {
        let predicate = parse_predicate("(p, c) => c.owner_id as long? == p.id").unwrap();
        let Expr::Binary { lhs, .. } = &predicate.body else {
            panic!("expected comparison");
        };
        assert_eq!(
            **lhs,
            Expr::convert(
                Expr::path(Side::Child, &["owner_id"]),
                TypeRef {
                    scalar: ScalarType::Int,
                    nullable: true
                }
            )
        );
    }

    #[test]
    fn test_parse_string_escapes() {
        let predicate = parse_predicate(r#"(p, c) => c.name == "a\"b""#).unwrap();
        let Expr::Binary { rhs, .. } = &predicate.body else {
            panic!("expected comparison");
        };
        assert_eq!(**rhs, Expr::Literal(Literal::String("a\"b".to_string())));
    }

    #[test]
    fn test_unknown_name() {
        let err = parse_predicate("(p, c) => c.key == q.fk").unwrap_err();
        assert!(err.message.contains("unknown name `q`"));
        assert_eq!(err.span, Span::new(19, 20));
    }

    #[test]
    fn test_unexpected_end() {
        let err = parse_predicate("(p, c) => c.key ==").unwrap_err();
        assert_eq!(err.message, "expected an expression, found end of input");
    }

    #[test]
    fn test_duplicate_parameter() {
        let err = parse_predicate("(x, x) => x.a == x.b").unwrap_err();
        assert!(err.message.contains("declared twice"));
    }

    #[test]
    fn test_unknown_cast_type() {
        let err = parse_predicate("(p, c) => c.a as uuid == p.b").unwrap_err();
        assert_eq!(err.message, "unknown conversion type `uuid`");
    }

    #[test]
    fn test_trailing_tokens() {
        let err = parse_predicate("(p, c) => c.a == p.b )").unwrap_err();
        assert_eq!(err.message, "expected end of input, found `)`");
    }
}
