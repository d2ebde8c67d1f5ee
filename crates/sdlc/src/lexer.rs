//! The surface lexer for SDL and IML source.

use std::fmt;

use strum::Display;

use crate::{
    ast::node::Location,
    diagnostics::{Diagnostic, Diagnostics},
};

/// Token kinds.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum Token {
    Ident(String),
    /// `&size`, `&until-including`, … (spelled with the ampersand).
    Attribute(String),
    /// `%byte-order`, `%init`, … (spelled with the percent sign).
    Property(String),
    Int(u64),
    Real(f64),
    Str(String),
    BytesLit(Vec<u8>),
    Regex(String),
    /// `$$`
    DollarDollar,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    ColonColon,
    Dot,
    DotQuestion,
    Question,
    Arrow,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Not,
    AndAnd,
    OrOr,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PlusPlus,
    MinusMinus,
    Tilde,

    Eof,
}

impl Token {
    /// Whether a `/` following this token starts a regex literal rather
    /// than a division.
    fn regex_may_follow(&self) -> bool {
        matches!(
            self,
            Token::Colon
                | Token::Semicolon
                | Token::Comma
                | Token::Assign
                | Token::LParen
                | Token::LBrace
                | Token::LBracket
                | Token::Arrow
                | Token::Eq
                | Token::Ne
                | Token::AndAnd
                | Token::OrOr
                | Token::Not
        )
    }
}

/// A token with its source location.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub location: Location,
}

impl fmt::Display for Spanned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.token, self.location)
    }
}

/// Lexes `source` into tokens, reporting malformed input as diagnostics.
/// Always ends with an `Eof` token.
pub fn lex(source: &str, path: &str, diagnostics: &mut Diagnostics) -> Vec<Spanned> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        path,
        tokens: Vec::new(),
        diagnostics,
    }
    .run()
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    path: &'a str,
    tokens: Vec<Spanned>,
    diagnostics: &'a mut Diagnostics,
}

impl Lexer<'_> {
    fn run(mut self) -> Vec<Spanned> {
        while let Some(c) = self.peek() {
            let location = self.here();
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump();
                }
                '#' => self.skip_line_comment(),
                '0'..='9' => self.number(location),
                'a'..='z' | 'A'..='Z' | '_' => self.ident_or_keyword(location),
                '"' => self.string(location),
                '&' => self.amp(location),
                '%' => self.percent(location),
                '$' => self.dollar(location),
                '/' => self.slash(location),
                _ => self.punct(location),
            }
        }
        let location = self.here();
        self.tokens.push(Spanned {
            token: Token::Eof,
            location,
        });
        self.tokens
    }

    fn here(&self) -> Location {
        Location::new(self.path, self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, token: Token, location: Location) {
        self.tokens.push(Spanned { token, location });
    }

    fn error(&mut self, message: String, location: Location) {
        self.diagnostics.push(Diagnostic::error(message, location));
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn number(&mut self, location: Location) {
        let mut text = String::new();
        if self.peek() == Some('0') && matches!(self.peek2(), Some('x' | 'X')) {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    if c != '_' {
                        text.push(c);
                    }
                    self.bump();
                } else {
                    break;
                }
            }
            match u64::from_str_radix(&text, 16) {
                Ok(value) => self.push(Token::Int(value), location),
                Err(_) => self.error(format!("invalid hex literal 0x{text}"), location),
            }
            return;
        }

        let mut is_real = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else if c == '.' && !is_real && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                text.push('.');
                self.bump();
            } else if (c == 'e' || c == 'E') && self.peek2().is_some_and(|c| c.is_ascii_digit() || c == '-') {
                is_real = true;
                text.push(c);
                self.bump();
                if self.peek() == Some('-') {
                    text.push('-');
                    self.bump();
                }
            } else {
                break;
            }
        }
        if is_real {
            match text.parse::<f64>() {
                Ok(value) => self.push(Token::Real(value), location),
                Err(_) => self.error(format!("invalid real literal {text}"), location),
            }
        } else {
            match text.parse::<u64>() {
                Ok(value) => self.push(Token::Int(value), location),
                Err(_) => self.error(format!("integer literal {text} out of range"), location),
            }
        }
    }

    fn ident_or_keyword(&mut self, location: Location) {
        // `b"…"` is a bytes literal.
        if self.peek() == Some('b') && self.peek2() == Some('"') {
            self.bump();
            if let Some(bytes) = self.quoted(location.clone()) {
                let raw = bytes.into_iter().map(|c| c as u8).collect();
                self.push(Token::BytesLit(raw), location);
            }
            return;
        }
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(Token::Ident(text), location);
    }

    /// Lexes the body of a quoted literal after the opening `"`, returning
    /// the unescaped characters.
    fn quoted(&mut self, location: Location) -> Option<Vec<char>> {
        debug_assert_eq!(self.peek(), Some('"'));
        self.bump();
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    self.error("unterminated string literal".into(), location);
                    return None;
                }
                Some('"') => return Some(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('x') => {
                        let hi = self.bump();
                        let lo = self.bump();
                        match (hi.and_then(|c| c.to_digit(16)), lo.and_then(|c| c.to_digit(16))) {
                            (Some(hi), Some(lo)) => out.push(char::from((hi * 16 + lo) as u8)),
                            _ => {
                                self.error("invalid \\x escape".into(), location.clone());
                            }
                        }
                    }
                    other => {
                        self.error(format!("unknown escape \\{}", other.map_or(String::new(), String::from)), location.clone());
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn string(&mut self, location: Location) {
        if let Some(chars) = self.quoted(location.clone()) {
            self.push(Token::Str(chars.into_iter().collect()), location);
        }
    }

    fn amp(&mut self, location: Location) {
        self.bump();
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            let mut text = String::from("&");
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '-' {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            self.push(Token::Attribute(text), location);
        } else if self.peek() == Some('&') {
            self.bump();
            self.push(Token::AndAnd, location);
        } else {
            self.push(Token::Amp, location);
        }
    }

    fn percent(&mut self, location: Location) {
        self.bump();
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            let mut text = String::from("%");
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == '-' {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            self.push(Token::Property(text), location);
        } else {
            self.push(Token::Percent, location);
        }
    }

    fn dollar(&mut self, location: Location) {
        self.bump();
        if self.peek() == Some('$') {
            self.bump();
            self.push(Token::DollarDollar, location);
        } else {
            self.error("stray '$'".into(), location);
        }
    }

    fn slash(&mut self, location: Location) {
        let regex_position = self.tokens.last().map_or(true, |t| t.token.regex_may_follow());
        self.bump();
        if !regex_position {
            if self.peek() == Some('=') {
                self.bump();
                self.push(Token::SlashAssign, location);
            } else {
                self.push(Token::Slash, location);
            }
            return;
        }
        // Regex literal: up to the next unescaped '/'.
        let mut text = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    self.error("unterminated regular expression".into(), location);
                    return;
                }
                Some('\\') => {
                    if let Some(next) = self.bump() {
                        if next != '/' {
                            text.push('\\');
                        }
                        text.push(next);
                    }
                }
                Some('/') => break,
                Some(c) => text.push(c),
            }
        }
        self.push(Token::Regex(text), location);
    }

    fn punct(&mut self, location: Location) {
        let c = self.bump().expect("caller peeked");
        let next = self.peek();
        let token = match (c, next) {
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            ('{', _) => Token::LBrace,
            ('}', _) => Token::RBrace,
            ('[', _) => Token::LBracket,
            (']', _) => Token::RBracket,
            (',', _) => Token::Comma,
            (';', _) => Token::Semicolon,
            (':', Some(':')) => {
                self.bump();
                Token::ColonColon
            }
            (':', _) => Token::Colon,
            ('.', Some('?')) => {
                self.bump();
                Token::DotQuestion
            }
            ('.', _) => Token::Dot,
            ('?', _) => Token::Question,
            ('-', Some('>')) => {
                self.bump();
                Token::Arrow
            }
            ('-', Some('-')) => {
                self.bump();
                Token::MinusMinus
            }
            ('-', Some('=')) => {
                self.bump();
                Token::MinusAssign
            }
            ('-', _) => Token::Minus,
            ('+', Some('+')) => {
                self.bump();
                Token::PlusPlus
            }
            ('+', Some('=')) => {
                self.bump();
                Token::PlusAssign
            }
            ('+', _) => Token::Plus,
            ('*', Some('*')) => {
                self.bump();
                Token::StarStar
            }
            ('*', Some('=')) => {
                self.bump();
                Token::StarAssign
            }
            ('*', _) => Token::Star,
            ('=', Some('=')) => {
                self.bump();
                Token::Eq
            }
            ('=', _) => Token::Assign,
            ('!', Some('=')) => {
                self.bump();
                Token::Ne
            }
            ('!', _) => Token::Not,
            ('<', Some('=')) => {
                self.bump();
                Token::Le
            }
            ('<', Some('<')) => {
                self.bump();
                Token::Shl
            }
            ('<', _) => Token::Lt,
            ('>', Some('=')) => {
                self.bump();
                Token::Ge
            }
            ('>', Some('>')) => {
                self.bump();
                Token::Shr
            }
            ('>', _) => Token::Gt,
            ('|', Some('|')) => {
                self.bump();
                Token::OrOr
            }
            ('|', _) => Token::Pipe,
            ('^', _) => Token::Caret,
            ('~', _) => Token::Tilde,
            (other, _) => {
                self.error(format!("unexpected character {other:?}"), location);
                return;
            }
        };
        self.push(token, location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let mut diags = Diagnostics::new();
        let tokens = lex(source, "<test>", &mut diags);
        assert!(!diags.has_errors(), "unexpected lex errors: {:?}", diags.emitted());
        tokens.into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn lexes_module_header() {
        let tokens = lex_ok("module HTTP;");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("module".into()),
                Token::Ident("HTTP".into()),
                Token::Semicolon,
                Token::Eof
            ]
        );
    }

    #[test]
    fn lexes_attributes_and_properties() {
        let tokens = lex_ok("x: bytes &until-including=b\"\\r\\n\"; %byte-order");
        assert!(tokens.contains(&Token::Attribute("&until-including".into())));
        assert!(tokens.contains(&Token::BytesLit(b"\r\n".to_vec())));
        assert!(tokens.contains(&Token::Property("%byte-order".into())));
    }

    #[test]
    fn distinguishes_regex_from_division() {
        let tokens = lex_ok("x: /ab+c/;");
        assert!(tokens.contains(&Token::Regex("ab+c".into())));
        let tokens = lex_ok("a = b / c;");
        assert!(tokens.contains(&Token::Slash));
    }

    #[test]
    fn regex_keeps_escapes_except_slash() {
        let tokens = lex_ok("x: /a\\/b\\d/;");
        assert!(tokens.contains(&Token::Regex("a/b\\d".into())));
    }

    #[test]
    fn lexes_numbers() {
        let tokens = lex_ok("0x10 42 3.25");
        assert!(tokens.contains(&Token::Int(16)));
        assert!(tokens.contains(&Token::Int(42)));
        assert!(tokens.contains(&Token::Real(3.25)));
    }

    #[test]
    fn hex_escapes_in_bytes() {
        let tokens = lex_ok(r#"b"\x02\x00""#);
        assert!(tokens.contains(&Token::BytesLit(vec![2, 0])));
    }

    #[test]
    fn dollar_dollar_and_member_ops() {
        let tokens = lex_ok("$$ a.b a.?b a::b");
        assert!(tokens.contains(&Token::DollarDollar));
        assert!(tokens.contains(&Token::Dot));
        assert!(tokens.contains(&Token::DotQuestion));
        assert!(tokens.contains(&Token::ColonColon));
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = lex_ok("a # comment\nb");
        assert_eq!(
            tokens,
            vec![Token::Ident("a".into()), Token::Ident("b".into()), Token::Eof]
        );
    }

    #[test]
    fn unterminated_string_reports_error() {
        let mut diags = Diagnostics::new();
        lex("\"abc", "<test>", &mut diags);
        assert!(diags.has_errors());
    }
}
