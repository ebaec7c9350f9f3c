//! Lexer (C3)
//!
//! Byte stream to ordered token sequence. Single pass, linear in input
//! length, never throws — lexical problems are recorded as diagnostics and
//! the lexer keeps producing a complete token stream regardless (§4.1).

use crate::token::{Keyword, Literal, NumSuffix, Op, Token, TokenKind, OPERATOR_TABLE};
use seraphic_core::{Diagnostic, DiagnosticKind, Diagnostics, Severity, SourceLocation};

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    filename: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, filename: &'a str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            filename,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn loc(&self) -> SourceLocation<'a> {
        SourceLocation::new(self.filename, self.line, self.column, self.pos as u32)
    }

    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> u8 {
        *self.bytes.get(self.pos + ahead).unwrap_or(&0)
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Advance exactly one byte, updating line/column. This is the single
    /// choke point for position bookkeeping so the "line/column updates are
    /// atomic per byte" invariant (§4.1) holds by construction.
    fn bump(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        b
    }

    fn skip_whitespace_and_comments(&mut self, diags: &mut Diagnostics) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while !self.at_eof() && self.peek() != b'\n' {
                        self.bump();
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    self.skip_block_comment(diags);
                }
                _ => return,
            }
        }
    }

    /// Block comments nest (§4.1). `depth` tracks how many unmatched `/*`
    /// openers are still open; the outermost opener's location is used for
    /// the unterminated-comment diagnostic.
    fn skip_block_comment(&mut self, diags: &mut Diagnostics) {
        let opener = self.loc();
        self.bump(); // '/'
        self.bump(); // '*'
        let mut depth = 1usize;
        while depth > 0 {
            if self.at_eof() {
                diags.push(Diagnostic::new(
                    DiagnosticKind::Lexical,
                    Severity::Error,
                    opener,
                    "unterminated block comment",
                ));
                return;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'*' {
                self.bump();
                self.bump();
                depth += 1;
            } else if self.peek() == b'*' && self.peek_at(1) == b'/' {
                self.bump();
                self.bump();
                depth -= 1;
            } else {
                self.bump();
            }
        }
    }

    fn make(&self, kind: TokenKind<'a>, loc: SourceLocation<'a>, start: usize) -> Token<'a> {
        Token {
            kind,
            loc,
            lexeme: &self.source[start..self.pos],
        }
    }

    fn lex_ident_or_keyword(&mut self) -> Token<'a> {
        let loc = self.loc();
        let start = self.pos;
        while matches!(self.peek(), b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_') {
            self.bump();
        }
        let text = &self.source[start..self.pos];
        let kind = match Keyword::lookup(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text),
        };
        self.make(kind, loc, start)
    }

    fn digit_set(base: u32) -> impl Fn(u8) -> bool {
        move |b: u8| match base {
            16 => b.is_ascii_hexdigit(),
            8 => (b'0'..=b'7').contains(&b),
            2 => b == b'0' || b == b'1',
            _ => b.is_ascii_digit(),
        }
    }

    fn lex_number(&mut self, diags: &mut Diagnostics) -> Token<'a> {
        let loc = self.loc();
        let start = self.pos;
        let mut base = 10u32;
        if self.peek() == b'0' && matches!(self.peek_at(1), b'x' | b'b' | b'o') {
            base = match self.peek_at(1) {
                b'x' => 16,
                b'b' => 2,
                _ => 8,
            };
            self.bump();
            self.bump();
        }
        let is_digit = Self::digit_set(base);
        self.consume_digit_run(&is_digit);

        let mut is_float = false;
        // Fractional part and exponent are only meaningful for base-10
        // literals (§4.1: "optional base-10 fractional part").
        if base == 10 && self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            is_float = true;
            self.bump(); // '.'
            self.consume_digit_run(&is_digit);
        }
        if base == 10 && matches!(self.peek(), b'e' | b'E') {
            let save = self.pos;
            let save_line = self.line;
            let save_col = self.column;
            self.bump();
            if matches!(self.peek(), b'+' | b'-') {
                self.bump();
            }
            if self.peek().is_ascii_digit() {
                is_float = true;
                self.consume_digit_run(&is_digit);
            } else {
                // Not actually an exponent (e.g. trailing identifier char);
                // rewind so `1e` lexes as int `1` followed by ident `e`.
                self.pos = save;
                self.line = save_line;
                self.column = save_col;
            }
        }
        let digits_end = self.pos;
        let suffix = self.lex_number_suffix();
        if let Some(s) = suffix {
            is_float = is_float || s.forces_float();
        }

        let digits_only: String = self.source[start..digits_end]
            .chars()
            .filter(|c| *c != '_')
            .collect();

        let literal = if is_float {
            let parsed = digits_only.parse::<f64>().unwrap_or(0.0);
            Literal::Float(parsed, suffix)
        } else {
            let (body, radix) = match base {
                16 => (digits_only.trim_start_matches("0x"), 16),
                2 => (digits_only.trim_start_matches("0b"), 2),
                8 => (digits_only.trim_start_matches("0o"), 8),
                _ => (digits_only.as_str(), 10),
            };
            let parsed = u64::from_str_radix(body, radix).unwrap_or_else(|_| {
                diags.push(Diagnostic::new(
                    DiagnosticKind::Lexical,
                    Severity::Error,
                    loc,
                    "malformed numeric literal",
                ));
                0
            });
            Literal::Int(parsed, suffix)
        };
        self.make(TokenKind::Literal(literal), loc, start)
    }

    fn consume_digit_run(&mut self, is_digit: &impl Fn(u8) -> bool) {
        loop {
            let b = self.peek();
            if is_digit(b) {
                self.bump();
            } else if b == b'_' && is_digit(self.peek_at(1)) {
                self.bump(); // separator, only valid between digits
            } else {
                break;
            }
        }
    }

    fn lex_number_suffix(&mut self) -> Option<NumSuffix> {
        let candidates: &[(&str, NumSuffix)] = &[
            ("u8", NumSuffix::U8),
            ("u16", NumSuffix::U16),
            ("u32", NumSuffix::U32),
            ("u64", NumSuffix::U64),
            ("i8", NumSuffix::I8),
            ("i16", NumSuffix::I16),
            ("i32", NumSuffix::I32),
            ("i64", NumSuffix::I64),
            ("u", NumSuffix::U),
            ("i", NumSuffix::I),
            ("s", NumSuffix::Scalar),
            ("d", NumSuffix::Dual),
            ("g", NumSuffix::Galactic),
        ];
        let rest = &self.source[self.pos..];
        for (text, suffix) in candidates {
            if rest.starts_with(text) {
                let next = rest.as_bytes().get(text.len()).copied().unwrap_or(0);
                if !next.is_ascii_alphanumeric() && next != b'_' {
                    for _ in 0..text.len() {
                        self.bump();
                    }
                    return Some(*suffix);
                }
            }
        }
        None
    }

    fn lex_string(&mut self, diags: &mut Diagnostics) -> Token<'a> {
        let loc = self.loc();
        let start = self.pos;
        self.bump(); // opening quote
        let body_start = self.pos;
        loop {
            if self.at_eof() {
                diags.push(Diagnostic::new(
                    DiagnosticKind::Lexical,
                    Severity::Error,
                    loc,
                    "unterminated string literal",
                ));
                return self.make(
                    TokenKind::Literal(Literal::Str(&self.source[body_start..self.pos])),
                    loc,
                    start,
                );
            }
            match self.peek() {
                b'\n' => {
                    diags.push(Diagnostic::new(
                        DiagnosticKind::Lexical,
                        Severity::Error,
                        loc,
                        "newline in unterminated string literal",
                    ));
                    return self.make(
                        TokenKind::Literal(Literal::Str(&self.source[body_start..self.pos])),
                        loc,
                        start,
                    );
                }
                b'\\' => {
                    self.bump();
                    if !self.at_eof() {
                        self.bump();
                    }
                }
                b'"' => {
                    let body = &self.source[body_start..self.pos];
                    self.bump(); // closing quote
                    return self.make(TokenKind::Literal(Literal::Str(body)), loc, start);
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn lex_char(&mut self, diags: &mut Diagnostics) -> Token<'a> {
        let loc = self.loc();
        let start = self.pos;
        self.bump(); // opening quote
        let ch = if self.peek() == b'\\' {
            self.bump();
            let escaped = self.bump() as char;
            match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '\\' => '\\',
                '\'' => '\'',
                '0' => '\0',
                other => {
                    diags.push(Diagnostic::new(
                        DiagnosticKind::Lexical,
                        Severity::Warning,
                        loc,
                        format!("unrecognized character escape '\\{other}'"),
                    ));
                    other
                }
            }
        } else {
            self.bump() as char
        };
        if self.peek() == b'\'' {
            self.bump();
        } else {
            diags.push(Diagnostic::new(
                DiagnosticKind::Lexical,
                Severity::Error,
                loc,
                "unterminated character literal",
            ));
        }
        self.make(TokenKind::Literal(Literal::Char(ch)), loc, start)
    }

    fn lex_operator(&mut self) -> Token<'a> {
        let loc = self.loc();
        let start = self.pos;
        let rest = &self.source[self.pos..];
        for (text, op) in OPERATOR_TABLE {
            if rest.starts_with(text) {
                for _ in 0..text.len() {
                    self.bump();
                }
                return self.make(TokenKind::Op(*op), loc, start);
            }
        }
        unreachable!("caller only invokes lex_operator when an operator prefix matched")
    }

    /// Advance the lexer by exactly one token (public contract of §4.1).
    pub fn next_token(&mut self, diags: &mut Diagnostics) -> Token<'a> {
        self.skip_whitespace_and_comments(diags);
        if self.at_eof() {
            let loc = self.loc();
            return Token {
                kind: TokenKind::Eof,
                loc,
                lexeme: "",
            };
        }
        let b = self.peek();
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident_or_keyword(),
            b'0'..=b'9' => self.lex_number(diags),
            b'"' => self.lex_string(diags),
            b'\'' => self.lex_char(diags),
            _ if OPERATOR_TABLE
                .iter()
                .any(|(text, _)| self.source[self.pos..].starts_with(text)) =>
            {
                self.lex_operator()
            }
            _ => {
                let loc = self.loc();
                let bad = self.bump();
                diags.push(Diagnostic::new(
                    DiagnosticKind::Lexical,
                    Severity::Error,
                    loc,
                    format!("unexpected byte 0x{bad:02x}"),
                ));
                // Recovery: a stray byte is dropped, not fatal (§4.1); keep
                // scanning so the rest of the stream still lexes normally.
                self.next_token(diags)
            }
        }
    }
}

/// Tokenize a complete source buffer. Always terminates with one `Eof`
/// token. Returns the token sequence and the accumulated diagnostics;
/// success is `diags.has_errors() == false`.
pub fn tokenize<'a>(source: &'a str, filename: &'a str) -> (Vec<Token<'a>>, Diagnostics) {
    let mut lexer = Lexer::new(source, filename);
    let mut diags = Diagnostics::new();
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token(&mut diags);
        let is_eof = tok.is_eof();
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    (tokens, diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind<'_>> {
        let (toks, diags) = tokenize(src, "t.sr");
        assert!(!diags.has_errors(), "unexpected errors: {:?}", diags.iter().collect::<Vec<_>>());
        toks.into_iter()
            .filter(|t| !t.is_eof())
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn empty_source_yields_only_eof() {
        let (toks, diags) = tokenize("", "t.sr");
        assert!(!diags.has_errors());
        assert_eq!(toks.len(), 1);
        assert!(toks[0].is_eof());
    }

    #[test]
    fn keywords_and_idents() {
        let ks = kinds("fn main return foo_bar");
        assert_eq!(
            ks,
            vec![
                TokenKind::Keyword(Keyword::Fn),
                TokenKind::Ident("main"),
                TokenKind::Keyword(Keyword::Return),
                TokenKind::Ident("foo_bar"),
            ]
        );
    }

    #[test]
    fn integer_literal_bases_and_suffix() {
        let (toks, diags) = tokenize("0xFF 0b101 0o17 42u8 1_000", "t.sr");
        assert!(!diags.has_errors());
        match &toks[0].kind {
            TokenKind::Literal(Literal::Int(v, None)) => assert_eq!(*v, 255),
            other => panic!("unexpected {other:?}"),
        }
        match &toks[1].kind {
            TokenKind::Literal(Literal::Int(v, None)) => assert_eq!(*v, 5),
            other => panic!("unexpected {other:?}"),
        }
        match &toks[3].kind {
            TokenKind::Literal(Literal::Int(v, Some(NumSuffix::U8))) => assert_eq!(*v, 42),
            other => panic!("unexpected {other:?}"),
        }
        match &toks[4].kind {
            TokenKind::Literal(Literal::Int(v, None)) => assert_eq!(*v, 1000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn float_literal_with_exponent() {
        let (toks, diags) = tokenize("1.5e2", "t.sr");
        assert!(!diags.has_errors());
        match &toks[0].kind {
            TokenKind::Literal(Literal::Float(v, None)) => assert!((*v - 150.0).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_block_comments() {
        let (toks, diags) = tokenize("/* outer /* inner */ still outer */ 1", "t.sr");
        assert!(!diags.has_errors());
        assert_eq!(toks.len(), 2); // literal `1`, Eof
    }

    #[test]
    fn unterminated_block_comment_reports_one_error() {
        let (_toks, diags) = tokenize("/* never closes", "t.sr");
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn void_sentinel_operators() {
        let ops: Vec<_> = kinds("?? !!")
            .into_iter()
            .filter_map(|k| match k {
                TokenKind::Op(op) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![Op::VoidProp, Op::VoidAssert]);
    }

    #[test]
    fn lexeme_concatenation_reproduces_non_whitespace_source() {
        let src = "fn main() -> i32 { return 0; }";
        let (toks, _diags) = tokenize(src, "t.sr");
        let joined: String = toks
            .iter()
            .filter(|t| !t.is_eof())
            .map(|t| t.lexeme)
            .collect();
        let expected: String = src.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn unknown_byte_recovers_by_advancing_one() {
        let (toks, diags) = tokenize("1 $ 2", "t.sr");
        assert_eq!(diags.error_count(), 1);
        let lits: usize = toks
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Literal(_)))
            .count();
        assert_eq!(lits, 2);
    }
}
