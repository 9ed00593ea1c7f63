//! Script lexer.
//!
//! Converts script text into a lazy stream of classified [`Token`]s.  The
//! scanner is a hand-written byte/char dispatch that advances over the source
//! one token at a time; nothing is allocated up front, and a [`Lexer`] can be
//! cloned or [`reset`](Lexer::reset) to walk the same input again.
//!
//! | Input                      | Kind                      | `text`              |
//! |----------------------------|---------------------------|---------------------|
//! | `"a \"b\""`                | [`TokenKind::QuotedString`] | `a "b"` (unquoted) |
//! | `$name`                    | [`TokenKind::VariableName`] | `name`             |
//! | `42`, `3.5`                | [`TokenKind::Number`]     | as written          |
//! | `Echo`, `step_2`           | [`TokenKind::Word`]       | as written          |
//! | spaces / tabs              | [`TokenKind::WhiteSpace`] | as written          |
//! | `\n`, `\r\n`, `\r`         | [`TokenKind::Eol`]        | as written          |
//! | any other printable char   | [`TokenKind::Symbol`]     | as written          |
//!
//! White space is kept as tokens so every byte of the input belongs to exactly
//! one token's `lexeme`; concatenating the lexemes reproduces the source.
//! The lexer knows nothing about which functions or variables exist.

use std::fmt;

use thiserror::Error;

// ── Token ─────────────────────────────────────────────────────────────────────

/// Classification of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Word,
    Number,
    QuotedString,
    WhiteSpace,
    VariableName,
    Symbol,
    Eol,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Word => "word",
            TokenKind::Number => "number",
            TokenKind::QuotedString => "quoted string",
            TokenKind::WhiteSpace => "white space",
            TokenKind::VariableName => "variable name",
            TokenKind::Symbol => "symbol",
            TokenKind::Eol => "end of line",
            TokenKind::Eof => "end of input",
        };
        f.write_str(name)
    }
}

/// A classified lexical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Meaning of the token: quotes and escapes resolved for quoted strings,
    /// the leading `$` removed for variable names, otherwise the lexeme.
    pub text: String,
    /// Exact slice of the source this token was scanned from.
    pub lexeme: &'a str,
    /// Byte offset of `lexeme` in the source.
    pub position: usize,
}

impl Token<'_> {
    /// `true` for tokens that end a script line (`Eol` or `Eof`).
    pub fn ends_line(&self) -> bool {
        matches!(self.kind, TokenKind::Eol | TokenKind::Eof)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A failure to scan the input.  Lexing stops at the first error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated string starting at line {line}, column {column}")]
    UnterminatedString {
        position: usize,
        line: usize,
        column: usize,
    },
    #[error("invalid character {ch:?} at line {line}, column {column}")]
    InvalidCharacter {
        ch: char,
        position: usize,
        line: usize,
        column: usize,
    },
}

impl LexError {
    /// Byte offset where the offending input starts.
    pub fn position(&self) -> usize {
        match self {
            LexError::UnterminatedString { position, .. }
            | LexError::InvalidCharacter { position, .. } => *position,
        }
    }
}

/// 1-based `(line, column)` of byte offset `pos` in `src`.
///
/// `\r\n` counts as a single line break; columns count chars, not bytes.
pub fn line_col(src: &str, pos: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    let mut prev_cr = false;
    for (i, c) in src.char_indices() {
        if i >= pos {
            break;
        }
        match c {
            '\n' if prev_cr => {}
            '\n' | '\r' => {
                line += 1;
                col = 1;
            }
            _ => col += 1,
        }
        prev_cr = c == '\r';
    }
    (line, col)
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

/// Lazy token stream over a script.
///
/// Yields `Ok(token)` values ending in exactly one [`TokenKind::Eof`], or stops
/// after the first `Err`.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, done: false }
    }

    /// Rewind to the start of the input.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.done = false;
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    fn char_at(&self, at: usize) -> Option<char> {
        self.src.get(at..)?.chars().next()
    }

    fn peek(&self) -> Option<char> {
        self.char_at(self.pos)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    /// Build a token whose `text` is its lexeme.
    fn plain(&self, kind: TokenKind, start: usize) -> Token<'a> {
        let lexeme = &self.src[start..self.pos];
        Token { kind, text: lexeme.to_owned(), lexeme, position: start }
    }

    fn fail(&mut self, err: LexError) -> Result<Token<'a>, LexError> {
        self.done = true;
        Err(err)
    }

    /// Scan one token starting at the current position.
    fn next_token(&mut self) -> Result<Token<'a>, LexError> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            self.done = true;
            return Ok(Token { kind: TokenKind::Eof, text: String::new(), lexeme: "", position: start });
        };

        match c {
            ' ' | '\t' => {
                self.eat_while(|c| c == ' ' || c == '\t');
                Ok(self.plain(TokenKind::WhiteSpace, start))
            }
            '\n' => {
                self.pos += 1;
                Ok(self.plain(TokenKind::Eol, start))
            }
            '\r' => {
                self.pos += 1;
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                Ok(self.plain(TokenKind::Eol, start))
            }
            '"' => self.quoted(start),
            '$' if self.char_at(start + 1).is_some_and(is_ident_start) => {
                self.pos += 1;
                self.eat_while(is_ident_continue);
                let lexeme = &self.src[start..self.pos];
                Ok(Token {
                    kind: TokenKind::VariableName,
                    text: lexeme[1..].to_owned(),
                    lexeme,
                    position: start,
                })
            }
            c if c.is_ascii_digit() => {
                self.eat_while(|c| c.is_ascii_digit());
                // A single fractional part; `1.` and `1.2.3` leave the extra
                // dot to be scanned as a symbol.
                if self.peek() == Some('.') && self.char_at(self.pos + 1).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                    self.eat_while(|c| c.is_ascii_digit());
                }
                Ok(self.plain(TokenKind::Number, start))
            }
            c if is_ident_start(c) => {
                self.eat_while(is_ident_continue);
                Ok(self.plain(TokenKind::Word, start))
            }
            c if c.is_control() => {
                let (line, column) = line_col(self.src, start);
                self.fail(LexError::InvalidCharacter { ch: c, position: start, line, column })
            }
            c => {
                self.pos += c.len_utf8();
                Ok(self.plain(TokenKind::Symbol, start))
            }
        }
    }

    /// Scan a `"…"` string.  `\"` and `\\` are escapes; any other backslash is
    /// kept literally.  Strings may not span lines.
    fn quoted(&mut self, start: usize) -> Result<Token<'a>, LexError> {
        self.pos += 1; // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') | Some('\r') => {
                    let (line, column) = line_col(self.src, start);
                    return self.fail(LexError::UnterminatedString { position: start, line, column });
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => match self.char_at(self.pos + 1) {
                    Some(esc @ ('"' | '\\')) => {
                        text.push(esc);
                        self.pos += 2;
                    }
                    _ => {
                        text.push('\\');
                        self.pos += 1;
                    }
                },
                Some(c) => {
                    text.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        Ok(Token {
            kind: TokenKind::QuotedString,
            text,
            lexeme: &self.src[start..self.pos],
            position: start,
        })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        Some(self.next_token())
    }
}

impl std::iter::FusedIterator for Lexer<'_> {}

/// Lex the whole of `src`, stopping at the first error.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer::new(src).collect()
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ── Tests ─────────────────────────────────────────────────────────────────────
