//! Lexer for predicate text.

use crate::span::Span;

/// The kind of a token in predicate text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Error,

    // Literals
    Ident,
    IntLiteral,
    FloatLiteral,
    StringLiteral,

    // Keywords
    True,
    False,
    Null,
    As,

    // Punctuation
    LParen,
    RParen,
    Comma,
    Dot,
    Arrow,
    Question,
    Bang,

    // Operators
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
}

impl TokenKind {
    /// Human-readable description for diagnostics.
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Eof => "end of input",
            Self::Error => "invalid token",
            Self::Ident => "identifier",
            Self::IntLiteral => "integer",
            Self::FloatLiteral => "float",
            Self::StringLiteral => "string",
            Self::True => "`true`",
            Self::False => "`false`",
            Self::Null => "`null`",
            Self::As => "`as`",
            Self::LParen => "`(`",
            Self::RParen => "`)`",
            Self::Comma => "`,`",
            Self::Dot => "`.`",
            Self::Arrow => "`=>`",
            Self::Question => "`?`",
            Self::Bang => "`!`",
            Self::EqEq => "`==`",
            Self::NotEq => "`!=`",
            Self::Lt => "`<`",
            Self::Le => "`<=`",
            Self::Gt => "`>`",
            Self::Ge => "`>=`",
            Self::AndAnd => "`&&`",
            Self::OrOr => "`||`",
        }
    }

    fn keyword(text: &str) -> Option<Self> {
        match text {
            "true" => Some(Self::True),
            "false" => Some(Self::False),
            "null" => Some(Self::Null),
            "as" => Some(Self::As),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// A lexer over predicate source.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos as usize).copied()
    }

    #[inline]
    fn peek_at(&self, offset: u32) -> Option<u8> {
        self.bytes.get((self.pos + offset) as usize).copied()
    }

    #[inline]
    fn advance(&mut self) {
        self.pos += 1;
    }

    #[inline]
    fn slice_from(&self, start: u32) -> &'a str {
        &self.source[start as usize..self.pos as usize]
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.advance();
        }
    }

    /// One- or two-byte operator; `second` is the byte completing the long form.
    fn pair(&mut self, second: u8, long: TokenKind, short: TokenKind) -> TokenKind {
        self.advance();
        if self.peek() == Some(second) {
            self.advance();
            long
        } else {
            short
        }
    }

    /// Scans the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.pos;
        let Some(c) = self.peek() else {
            return Token::new(TokenKind::Eof, Span::point(start));
        };

        let kind = match c {
            b'(' => {
                self.advance();
                TokenKind::LParen
            }
            b')' => {
                self.advance();
                TokenKind::RParen
            }
            b',' => {
                self.advance();
                TokenKind::Comma
            }
            b'.' => {
                self.advance();
                TokenKind::Dot
            }
            b'?' => {
                self.advance();
                TokenKind::Question
            }
            b'=' => match self.peek_at(1) {
                Some(b'=') => {
                    self.pos += 2;
                    TokenKind::EqEq
                }
                Some(b'>') => {
                    self.pos += 2;
                    TokenKind::Arrow
                }
                _ => {
                    self.advance();
                    TokenKind::Error
                }
            },
            b'!' => self.pair(b'=', TokenKind::NotEq, TokenKind::Bang),
            b'<' => self.pair(b'=', TokenKind::Le, TokenKind::Lt),
            b'>' => self.pair(b'=', TokenKind::Ge, TokenKind::Gt),
            b'&' => self.pair(b'&', TokenKind::AndAnd, TokenKind::Error),
            b'|' => self.pair(b'|', TokenKind::OrOr, TokenKind::Error),
            b'"' => self.scan_string(),
            b'-' | b'0'..=b'9' => self.scan_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while matches!(
                    self.peek(),
                    Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
                ) {
                    self.advance();
                }
                TokenKind::keyword(self.slice_from(start)).unwrap_or(TokenKind::Ident)
            }
            _ => {
                // Consume the whole (possibly multi-byte) character.
                let width = self.source[start as usize..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);
                self.pos += width as u32;
                TokenKind::Error
            }
        };

        Token::new(kind, Span::new(start, self.pos))
    }

    fn scan_number(&mut self) -> TokenKind {
        if self.peek() == Some(b'-') {
            self.advance();
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return TokenKind::Error;
            }
        }
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.advance();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
            TokenKind::FloatLiteral
        } else {
            TokenKind::IntLiteral
        }
    }

    fn scan_string(&mut self) -> TokenKind {
        self.advance();
        loop {
            match self.peek() {
                None => return TokenKind::Error,
                Some(b'"') => {
                    self.advance();
                    return TokenKind::StringLiteral;
                }
                Some(b'\\') => {
                    self.advance();
                    if self.peek().is_some() {
                        self.advance();
                    }
                }
                Some(_) => self.advance(),
            }
        }
    }

    /// Tokenizes the whole input, ending with `Eof`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            tokens.push(token);
            if token.kind == TokenKind::Eof {
                return tokens;
            }
        }
    }
}
