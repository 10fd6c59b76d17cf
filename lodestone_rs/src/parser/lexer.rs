//! Tokenizer for Elixir source.
//!
//! Produces a flat token stream with line numbers. The lexer is tolerant:
//! anything it cannot classify becomes an `Unknown` token the parser skips,
//! so a single odd construct never sinks a whole file.

/// A lexed token with its 1-based source line.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    /// Whitespace (or line start) directly before this token.
    /// Distinguishes `foo [1]` (call with list arg) from `foo[1]` (access).
    pub space_before: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    /// Lowercase identifier: `foo`, `foo?`, `foo!`, `_acc`.
    Ident(String),
    /// Module alias segment: `Foo`.
    Alias(String),
    /// Atom literal: `:foo`, `:"quoted"`.
    Atom(String),
    /// Keyword-list key: `foo:` (including `do:`).
    Key(String),
    Int(i64),
    Float(f64),
    /// Double-quoted string or heredoc, interpolation kept verbatim.
    Str(String),
    /// Single-quoted charlist.
    Charlist(String),
    /// Sigil with its raw body, e.g. `~r/\d+/` -> "\\d+".
    Sigil(String),
    /// `?c` character literal.
    Char(char),
    /// Operator or punctuation.
    Op(&'static str),
    /// `do` / `end` / `fn` block keywords.
    Do,
    End,
    Fn,
    True,
    False,
    Nil,
    /// Expression separator: newline or `;`.
    Sep,
    /// Unclassifiable byte run, skipped by the parser.
    Unknown(char),
    Eof,
}

impl Tok {
    /// True for tokens that may begin an expression. Used to decide whether
    /// an identifier starts a no-parentheses call.
    pub fn starts_expr(&self) -> bool {
        matches!(
            self,
            Tok::Ident(_)
                | Tok::Alias(_)
                | Tok::Atom(_)
                | Tok::Key(_)
                | Tok::Int(_)
                | Tok::Float(_)
                | Tok::Str(_)
                | Tok::Charlist(_)
                | Tok::Sigil(_)
                | Tok::Char(_)
                | Tok::Fn
                | Tok::True
                | Tok::False
                | Tok::Nil
                | Tok::Op("[")
                | Tok::Op("{")
                | Tok::Op("%")
                | Tok::Op("%{")
                | Tok::Op("<<")
                | Tok::Op("&")
                | Tok::Op("^")
                | Tok::Op("@")
        )
    }
}

/// Multi-character operators, longest first for greedy matching.
const OPERATORS: &[&str] = &[
    "<<<", ">>>", "|||", "&&&", "^^^", "~~~", "===", "!==", "->", "<-", "=>", "<=", ">=", "==",
    "!=", "=~", "&&", "||", "++", "--", "<>", "..", "::", "|>", "<<", ">>", "\\\\", "%{", "**",
    "//", "+", "-", "*", "/", "=", "<", ">", "!", "^", "&", "|", ".", ",", "(", ")", "[", "]",
    "{", "}", "%", "@",
];

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    /// Lex the whole input. Never fails; unrecognized bytes become
    /// `Tok::Unknown`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            let space_before = self.skip_inline_ws();
            let line = self.line;
            let Some(c) = self.peek() else {
                out.push(Token {
                    tok: Tok::Eof,
                    line,
                    space_before,
                });
                break;
            };
            let tok = match c {
                b'\n' => {
                    self.bump();
                    self.line += 1;
                    Tok::Sep
                }
                b';' => {
                    self.bump();
                    Tok::Sep
                }
                b'#' => {
                    self.skip_to_eol();
                    continue;
                }
                b'"' => self.lex_string(b'"'),
                b'\'' => self.lex_string(b'\''),
                b':' => self.lex_atom_or_colon(),
                b'~' => self.lex_sigil(),
                b'?' => self.lex_char(),
                b'0'..=b'9' => self.lex_number(),
                b'a'..=b'z' | b'_' => self.lex_ident(),
                b'A'..=b'Z' => self.lex_alias(),
                _ => self.lex_operator(),
            };
            // Collapse runs of separators; the parser only cares that a
            // break happened, not how many blank lines produced it.
            if tok == Tok::Sep && matches!(out.last().map(|t| &t.tok), Some(Tok::Sep) | None) {
                continue;
            }
            out.push(Token {
                tok,
                line,
                space_before,
            });
        }
        out
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_inline_ws(&mut self) -> bool {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' => {
                    self.pos += 1;
                }
                // Line continuation: backslash-newline joins lines.
                b'\\' if self.peek_at(1) == Some(b'\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                _ => break,
            }
        }
        self.pos > start || self.pos == 0
    }

    fn skip_to_eol(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn lex_ident(&mut self) -> Tok {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some(b'?') | Some(b'!')) {
            self.pos += 1;
        }
        let word = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .to_string();
        // `key:` (with a value following) is a keyword-list key, not an atom.
        if self.peek() == Some(b':') && self.peek_at(1) != Some(b':') {
            self.pos += 1;
            return Tok::Key(word);
        }
        match word.as_str() {
            "do" => Tok::Do,
            "end" => Tok::End,
            "fn" => Tok::Fn,
            "true" => Tok::True,
            "false" => Tok::False,
            "nil" => Tok::Nil,
            "and" => Tok::Op("and"),
            "or" => Tok::Op("or"),
            "not" => Tok::Op("not"),
            "in" => Tok::Op("in"),
            "when" => Tok::Op("when"),
            _ => Tok::Ident(word),
        }
    }

    fn lex_alias(&mut self) -> Tok {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .to_string();
        if self.peek() == Some(b':') && self.peek_at(1) != Some(b':') {
            self.pos += 1;
            return Tok::Key(word);
        }
        Tok::Alias(word)
    }

    fn lex_atom_or_colon(&mut self) -> Tok {
        // self.peek() == ':'
        match self.peek_at(1) {
            Some(b':') => {
                self.pos += 2;
                Tok::Op("::")
            }
            Some(quote @ (b'"' | b'\'')) => {
                self.pos += 1;
                match self.lex_string(quote) {
                    Tok::Str(s) | Tok::Charlist(s) => Tok::Atom(s),
                    other => other,
                }
            }
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                self.pos += 1;
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                if matches!(self.peek(), Some(b'?') | Some(b'!')) {
                    self.pos += 1;
                }
                Tok::Atom(
                    std::str::from_utf8(&self.src[start..self.pos])
                        .unwrap_or("")
                        .to_string(),
                )
            }
            // Operator atoms (`:+`, `:<>`, ...) are noise for extraction.
            _ => {
                self.pos += 1;
                for op in OPERATORS {
                    if self.src[self.pos..].starts_with(op.as_bytes()) {
                        self.pos += op.len();
                        return Tok::Atom((*op).to_string());
                    }
                }
                Tok::Unknown(':')
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Tok {
        // Heredoc: three quotes in a row.
        if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
            return self.lex_heredoc(quote);
        }
        self.bump(); // opening quote
        let mut body = String::new();
        while let Some(c) = self.bump() {
            match c {
                b'\\' => {
                    if let Some(esc) = self.bump() {
                        body.push('\\');
                        body.push(esc as char);
                        if esc == b'\n' {
                            self.line += 1;
                        }
                    }
                }
                b'#' if self.peek() == Some(b'{') => {
                    body.push('#');
                    body.push('{');
                    self.bump();
                    self.skip_interpolation(&mut body);
                    body.push('}');
                }
                b'\n' => {
                    self.line += 1;
                    body.push('\n');
                }
                c if c == quote => {
                    return if quote == b'"' {
                        Tok::Str(body)
                    } else {
                        Tok::Charlist(body)
                    };
                }
                c => body.push(c as char),
            }
        }
        // Unterminated string: surface what we have.
        if quote == b'"' {
            Tok::Str(body)
        } else {
            Tok::Charlist(body)
        }
    }

    fn lex_heredoc(&mut self, quote: u8) -> Tok {
        self.pos += 3;
        let mut body = String::new();
        let close = [quote, quote, quote];
        while self.pos < self.src.len() {
            if self.src[self.pos..].starts_with(&close) {
                self.pos += 3;
                return Tok::Str(body);
            }
            let c = self.src[self.pos];
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
            }
            if c == b'\\' && self.pos < self.src.len() {
                body.push('\\');
                body.push(self.src[self.pos] as char);
                self.pos += 1;
                continue;
            }
            body.push(c as char);
        }
        Tok::Str(body)
    }

    /// Consume a `#{...}` interpolation body, balancing nested braces and
    /// skipping strings inside it.
    fn skip_interpolation(&mut self, body: &mut String) {
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            match c {
                b'{' => {
                    depth += 1;
                    body.push('{');
                }
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                    body.push('}');
                }
                b'"' | b'\'' => {
                    body.push(c as char);
                    let quote = c;
                    while let Some(inner) = self.bump() {
                        body.push(inner as char);
                        if inner == b'\\' {
                            if let Some(esc) = self.bump() {
                                body.push(esc as char);
                            }
                        } else if inner == quote {
                            break;
                        } else if inner == b'\n' {
                            self.line += 1;
                        }
                    }
                }
                b'\n' => {
                    self.line += 1;
                    body.push('\n');
                }
                c => body.push(c as char),
            }
        }
    }

    fn lex_sigil(&mut self) -> Tok {
        self.bump(); // '~'
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                name.push(c as char);
                self.pos += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            // `~~~` and friends fall through to the operator table.
            self.pos -= 1;
            return self.lex_operator();
        }
        let Some(open) = self.bump() else {
            return Tok::Sigil(String::new());
        };
        let close = match open {
            b'(' => b')',
            b'[' => b']',
            b'{' => b'}',
            b'<' => b'>',
            other => other,
        };
        let paired = open != close;
        let mut depth = 1usize;
        let mut body = String::new();
        // Heredoc sigil (~S""" ... """).
        if open == b'"' && self.peek() == Some(b'"') && self.peek_at(1) == Some(b'"') {
            self.pos -= 1;
            if let Tok::Str(s) = self.lex_heredoc(b'"') {
                body = s;
            }
            return Tok::Sigil(body);
        }
        while let Some(c) = self.bump() {
            if c == b'\\' {
                body.push('\\');
                if let Some(esc) = self.bump() {
                    body.push(esc as char);
                    if esc == b'\n' {
                        self.line += 1;
                    }
                }
                continue;
            }
            if c == b'\n' {
                self.line += 1;
            }
            if paired && c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            body.push(c as char);
        }
        // Modifier letters (~r/x/iu).
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        Tok::Sigil(body)
    }

    fn lex_char(&mut self) -> Tok {
        self.bump(); // '?'
        match self.bump() {
            Some(b'\\') => {
                let esc = self.bump().unwrap_or(b'0');
                let c = match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b's' => ' ',
                    b'0' => '\0',
                    other => other as char,
                };
                Tok::Char(c)
            }
            Some(c) => Tok::Char(c as char),
            None => Tok::Unknown('?'),
        }
    }

    fn lex_number(&mut self) -> Tok {
        let start = self.pos;
        // Radix literals: 0x, 0o, 0b.
        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'o') | Some(b'b'))
        {
            self.pos += 2;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let text: String = std::str::from_utf8(&self.src[start..self.pos])
                .unwrap_or("0")
                .chars()
                .filter(|c| *c != '_')
                .collect();
            let value = match text.as_bytes().get(1) {
                Some(b'x') => i64::from_str_radix(&text[2..], 16),
                Some(b'o') => i64::from_str_radix(&text[2..], 8),
                Some(b'b') => i64::from_str_radix(&text[2..], 2),
                _ => text.parse(),
            };
            return Tok::Int(value.unwrap_or(0));
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' | b'_' => {
                    self.pos += 1;
                }
                b'.' if !is_float && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' if is_float => {
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text: String = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("0")
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if is_float {
            Tok::Float(text.parse().unwrap_or(0.0))
        } else {
            Tok::Int(text.parse().unwrap_or(0))
        }
    }

    fn lex_operator(&mut self) -> Tok {
        for op in OPERATORS {
            if self.src[self.pos..].starts_with(op.as_bytes()) {
                self.pos += op.len();
                return Tok::Op(op);
            }
        }
        let c = self.bump().unwrap_or(b'\0');
        Tok::Unknown(c as char)
    }
}

/// Tokenize a source string.
pub fn tokenize(src: &str) -> Vec<Token> {
    Lexer::new(src).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn lexes_module_header() {
        let got = toks("defmodule App.User do\nend");
        assert_eq!(
            got,
            vec![
                Tok::Ident("defmodule".into()),
                Tok::Alias("App".into()),
                Tok::Op("."),
                Tok::Alias("User".into()),
                Tok::Do,
                Tok::Sep,
                Tok::End,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn lexes_atoms_and_keys() {
        let got = toks("field :email, type: :string");
        assert_eq!(
            got,
            vec![
                Tok::Ident("field".into()),
                Tok::Atom("email".into()),
                Tok::Op(","),
                Tok::Key("type".into()),
                Tok::Atom("string".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn double_colon_is_an_operator_not_a_key() {
        let got = toks("integer :: atom");
        assert_eq!(
            got,
            vec![
                Tok::Ident("integer".into()),
                Tok::Op("::"),
                Tok::Ident("atom".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn strings_keep_interpolation_verbatim() {
        let got = toks(r#""hello #{name}!""#);
        assert_eq!(got[0], Tok::Str("hello #{name}!".into()));
    }

    #[test]
    fn comments_are_skipped_but_strings_keep_hashes() {
        let got = toks("x # comment\n\"a#b\"");
        assert_eq!(
            got,
            vec![
                Tok::Ident("x".into()),
                Tok::Sep,
                Tok::Str("a#b".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn heredocs_span_lines() {
        let src = "@moduledoc \"\"\"\nDocs here.\n\"\"\"\nx";
        let got = toks(src);
        assert_eq!(got[0], Tok::Op("@"));
        assert_eq!(got[1], Tok::Ident("moduledoc".into()));
        assert!(matches!(&got[2], Tok::Str(s) if s.contains("Docs here.")));
        // The trailing identifier lands on line 4.
        let tokens = tokenize(src);
        let x = tokens.iter().find(|t| t.tok == Tok::Ident("x".into()));
        assert_eq!(x.map(|t| t.line), Some(4));
    }

    #[test]
    fn sigils_consume_paired_delimiters() {
        let got = toks("~w(a b c)a ++ rest");
        assert_eq!(got[0], Tok::Sigil("a b c".into()));
        assert_eq!(got[1], Tok::Op("++"));
    }

    #[test]
    fn do_key_is_distinct_from_do_block() {
        assert_eq!(
            toks("def foo, do: :ok"),
            vec![
                Tok::Ident("def".into()),
                Tok::Ident("foo".into()),
                Tok::Op(","),
                Tok::Key("do".into()),
                Tok::Atom("ok".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn tracks_lines_through_separators() {
        let tokens = tokenize("a\n\n\nb");
        let b = tokens
            .iter()
            .find(|t| t.tok == Tok::Ident("b".into()))
            .unwrap();
        assert_eq!(b.line, 4);
    }

    #[test]
    fn char_literals_and_captures() {
        assert_eq!(
            toks("?a &foo/1"),
            vec![
                Tok::Char('a'),
                Tok::Op("&"),
                Tok::Ident("foo".into()),
                Tok::Op("/"),
                Tok::Int(1),
                Tok::Eof,
            ]
        );
    }
}
