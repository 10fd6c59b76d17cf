//! Tolerant recursive-descent parser for Elixir.
//!
//! Builds the [`Expr`](super::ast::Expr) tree from the token stream. The
//! grammar subset covers everything the extraction phases pattern-match on:
//! module/function definitions, directives, qualified and no-parentheses
//! calls, `do`/`end` blocks with sections, keyword lists, collection
//! literals, module attributes, and operators with Elixir-like precedence.
//! Anything irrecoverable produces a [`ParseError`]; callers treat that as
//! an empty contribution for the file.

use super::ast::{Call, Expr};
use super::lexer::{tokenize, Tok, Token};

#[derive(Clone, Debug)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a full source file into its top-level expressions.
pub fn parse(src: &str) -> Result<Vec<Expr>> {
    let mut parser = Parser {
        toks: tokenize(src),
        pos: 0,
    };
    let (items, _) = parser.parse_seq(&[])?;
    Ok(items)
}

/// Binary operator precedence, lowest binds loosest. `None` when the token
/// is not a binary operator.
fn bin_prec(op: &str) -> Option<(u8, bool)> {
    // (precedence, right_assoc)
    Some(match op {
        "<-" | "\\\\" => (2, false),
        "when" => (3, true),
        "::" => (4, true),
        "|" => (5, true),
        "=>" => (6, true),
        "=" => (8, true),
        "||" | "|||" | "or" => (9, false),
        "&&" | "&&&" | "and" => (10, false),
        "==" | "!=" | "=~" | "===" | "!==" => (11, false),
        "<" | ">" | "<=" | ">=" => (12, false),
        "|>" | "<<<" | ">>>" | "^^^" => (13, false),
        "in" => (14, false),
        "++" | "--" | "<>" | ".." | "//" => (15, true),
        "+" | "-" => (16, false),
        "*" | "/" | "**" => (17, false),
        _ => return None,
    })
}

/// Operators that continue an expression across a line break when they
/// open the next line (`|> then(...)` pipelines and friends). Tokens that
/// can also start an expression (`-`, `&`, `@`, ...) are excluded.
fn continues_line(op: &str) -> bool {
    matches!(
        op,
        "|>" | "|"
            | "::"
            | "when"
            | "and"
            | "or"
            | "&&"
            | "||"
            | "=="
            | "!="
            | "==="
            | "!=="
            | "<="
            | ">="
            | "=~"
            | "="
            | "<>"
            | "++"
            | "--"
            | ".."
            | "in"
            | "<-"
            | "\\\\"
            | "*"
            | "/"
            | "."
    )
}

const UNARY_PREC: u8 = 18;

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn cur(&self) -> &Tok {
        self.toks
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn cur_line(&self) -> usize {
        self.toks.get(self.pos).map(|t| t.line).unwrap_or(0)
    }

    fn cur_space(&self) -> bool {
        self.toks
            .get(self.pos)
            .map(|t| t.space_before)
            .unwrap_or(true)
    }

    fn bump(&mut self) {
        if self.pos < self.toks.len() {
            self.pos += 1;
        }
    }

    fn skip_seps(&mut self) {
        while matches!(self.cur(), Tok::Sep) {
            self.bump();
        }
    }

    fn err<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(ParseError {
            line: self.cur_line(),
            message: message.into(),
        })
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.cur(), Tok::Op(o) if *o == op)
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.at_op(op) {
            self.bump();
            Ok(())
        } else {
            self.err(format!("expected `{}`, found {:?}", op, self.cur()))
        }
    }

    /// Name of the stop the current token represents, when it is listed.
    fn stop_name(&self, stops: &[&str]) -> Option<&'static str> {
        let name: &'static str = match self.cur() {
            Tok::End => "end",
            Tok::Eof => return Some("eof"),
            Tok::Op(")") => ")",
            Tok::Op("]") => "]",
            Tok::Op("}") => "}",
            Tok::Op(">>") => ">>",
            Tok::Ident(word) => match word.as_str() {
                "else" => "else",
                "rescue" => "rescue",
                "catch" => "catch",
                "after" => "after",
                _ => return None,
            },
            _ => return None,
        };
        stops.contains(&name).then_some(name)
    }

    /// Parse newline-separated expressions until one of `stops` (or EOF).
    /// Returns the items and the stop that ended the sequence, which is
    /// left unconsumed.
    fn parse_seq(&mut self, stops: &[&str]) -> Result<(Vec<Expr>, &'static str)> {
        let mut items = Vec::new();
        loop {
            self.skip_seps();
            if let Some(stop) = self.stop_name(stops) {
                return Ok((items, stop));
            }
            // Clause arrows and clause-argument commas are treated as
            // separators; the bodies still flatten into the sequence.
            if matches!(self.cur(), Tok::Op("->") | Tok::Op(",")) {
                self.bump();
                continue;
            }
            let mut expr = self.parse_expr(0)?;
            // Continue across line breaks when the next line opens with a
            // pipeline-style operator.
            loop {
                let save = self.pos;
                let mut crossed = false;
                while matches!(self.cur(), Tok::Sep) {
                    self.bump();
                    crossed = true;
                }
                match self.cur() {
                    Tok::Op(op) if crossed && continues_line(op) && bin_prec(op).is_some() => {
                        expr = self.parse_binop_rest(expr, 0)?;
                    }
                    Tok::Op(".") if crossed => {
                        expr = self.parse_postfix(expr)?;
                    }
                    _ => {
                        self.pos = save;
                        break;
                    }
                }
            }
            items.push(expr);
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let lhs = self.parse_unary()?;
        self.parse_binop_rest(lhs, min_prec)
    }

    fn parse_binop_rest(&mut self, mut lhs: Expr, min_prec: u8) -> Result<Expr> {
        loop {
            let op: &'static str = match self.cur() {
                Tok::Op(op) => *op,
                _ => break,
            };
            let Some((prec, right)) = bin_prec(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            self.skip_seps();
            let next_min = if right { prec } else { prec + 1 };
            let rhs_unary = self.parse_unary()?;
            let rhs = self.parse_binop_rest(rhs_unary, next_min)?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.cur().clone() {
            Tok::Op("@") => {
                self.bump();
                self.parse_attribute()
            }
            Tok::Op("&") => {
                self.bump();
                let inner = self.parse_expr(UNARY_PREC - 2)?;
                Ok(Expr::Capture(Box::new(inner)))
            }
            Tok::Op(op @ ("-" | "+" | "!" | "^" | "not" | "~~~")) => {
                self.bump();
                let inner = self.parse_expr(UNARY_PREC)?;
                Ok(Expr::UnOp(op, Box::new(inner)))
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let line = self.cur_line();
        match self.cur().clone() {
            Tok::Int(v) => {
                self.bump();
                Ok(Expr::Int(v))
            }
            Tok::Float(v) => {
                self.bump();
                Ok(Expr::Float(v))
            }
            Tok::Char(c) => {
                self.bump();
                Ok(Expr::Int(c as i64))
            }
            Tok::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            Tok::Charlist(s) => {
                self.bump();
                Ok(Expr::Charlist(s))
            }
            Tok::Sigil(s) => {
                self.bump();
                Ok(Expr::Sigil(s))
            }
            Tok::Atom(a) => {
                self.bump();
                Ok(Expr::Atom(a))
            }
            Tok::True => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            Tok::False => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            Tok::Nil => {
                self.bump();
                Ok(Expr::Nil)
            }
            Tok::Key(_) => self.parse_keyword_pairs(),
            Tok::Alias(_) => self.parse_alias_path(),
            Tok::Ident(name) => {
                self.bump();
                self.parse_maybe_call(None, name, line)
            }
            Tok::Fn => {
                self.bump();
                let (body, _) = self.parse_seq(&["end"])?;
                if !matches!(self.cur(), Tok::End) {
                    return self.err("expected `end` to close `fn`");
                }
                self.bump();
                Ok(Expr::Fn(body))
            }
            Tok::Op("(") => {
                self.bump();
                let (items, _) = self.parse_seq(&[")"])?;
                self.expect_op(")")?;
                match items.len() {
                    1 => Ok(items.into_iter().next().unwrap()),
                    _ => Ok(Expr::Block(items)),
                }
            }
            Tok::Op("[") => {
                self.bump();
                let items = self.parse_comma_items("]")?;
                self.expect_op("]")?;
                // A list whose only content is keyword pairs is a keyword
                // list literal.
                if items.len() == 1 {
                    if let Expr::Keyword(pairs) = &items[0] {
                        return Ok(Expr::Keyword(pairs.clone()));
                    }
                }
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.bump();
                let items = self.parse_comma_items("}")?;
                self.expect_op("}")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("%{") => {
                self.bump();
                let pairs = self.parse_map_body()?;
                self.expect_op("}")?;
                Ok(Expr::Map(pairs))
            }
            Tok::Op("%") => {
                self.bump();
                let name = match self.cur().clone() {
                    Tok::Alias(_) => self.parse_alias_path()?,
                    Tok::Ident(id) => {
                        self.bump();
                        Expr::Var(id)
                    }
                    Tok::Op("@") => {
                        self.bump();
                        self.parse_attribute()?
                    }
                    _ => return self.err("expected struct name after `%`"),
                };
                self.expect_op("{")?;
                let pairs = self.parse_map_body()?;
                self.expect_op("}")?;
                Ok(Expr::StructLit(Box::new(name), pairs))
            }
            Tok::Op("<<") => {
                self.bump();
                let items = self.parse_comma_items(">>")?;
                self.expect_op(">>")?;
                Ok(Expr::Bitstring(items))
            }
            Tok::Unknown(c) => self.err(format!("unexpected character `{}`", c)),
            other => self.err(format!("unexpected token {:?}", other)),
        }
    }

    /// `Foo.Bar.Baz` alias paths, greedily consuming `.Alias` segments.
    fn parse_alias_path(&mut self) -> Result<Expr> {
        let mut segs = Vec::new();
        loop {
            match self.cur().clone() {
                Tok::Alias(seg) => {
                    segs.push(seg);
                    self.bump();
                }
                _ => return self.err("expected module alias"),
            }
            if *self.cur() == Tok::Op(".")
                && matches!(self.toks.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Alias(_)))
            {
                self.bump();
                continue;
            }
            break;
        }
        Ok(Expr::Alias(segs))
    }

    /// An identifier in expression position: decide between a variable, a
    /// parenthesized call, a no-parentheses call, and a bare block call.
    fn parse_maybe_call(
        &mut self,
        target: Option<Box<Expr>>,
        name: String,
        line: usize,
    ) -> Result<Expr> {
        // Parenthesized call.
        if *self.cur() == Tok::Op("(") {
            self.bump();
            let args = self.parse_comma_items(")")?;
            self.expect_op(")")?;
            let mut call = Call {
                target,
                name,
                args,
                blocks: Vec::new(),
                line,
                end_line: line,
            };
            self.maybe_parse_blocks(&mut call)?;
            return Ok(Expr::Call(call));
        }
        // Bare call with only a block: `embedded_schema do ... end`.
        if matches!(self.cur(), Tok::Do) {
            let mut call = Call {
                target,
                name,
                args: Vec::new(),
                blocks: Vec::new(),
                line,
                end_line: line,
            };
            self.maybe_parse_blocks(&mut call)?;
            return Ok(Expr::Call(call));
        }
        // No-parentheses call: the next token starts an expression on the
        // same line. `foo[1]` (no space) stays an access on a variable.
        let starts_args = self.cur().starts_expr()
            && !(*self.cur() == Tok::Op("[") && !self.cur_space())
            && !matches!(self.cur(), Tok::Sep);
        if starts_args {
            let args = self.parse_no_paren_args()?;
            let mut call = Call {
                target,
                name,
                args,
                blocks: Vec::new(),
                line,
                end_line: line,
            };
            self.maybe_parse_blocks(&mut call)?;
            return Ok(Expr::Call(call));
        }
        match target {
            // `Mod.fun` without parentheses is still a call.
            Some(target) => Ok(Expr::Call(Call {
                target: Some(target),
                name,
                args: Vec::new(),
                blocks: Vec::new(),
                line,
                end_line: line,
            })),
            None => Ok(Expr::Var(name)),
        }
    }

    /// Comma-separated arguments of a no-parentheses call. Stops at line
    /// breaks, `do`, and closing delimiters.
    fn parse_no_paren_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        loop {
            let arg = self.parse_expr(0)?;
            args.push(arg);
            if *self.cur() == Tok::Op(",") {
                self.bump();
                self.skip_seps();
                continue;
            }
            break;
        }
        Ok(args)
    }

    /// Items between delimiters: positional expressions with an optional
    /// keyword tail, commas and newlines between them.
    fn parse_comma_items(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip_seps();
            if self.at_op(close) || matches!(self.cur(), Tok::Eof) {
                break;
            }
            let item = self.parse_expr(0)?;
            items.push(item);
            self.skip_seps();
            if *self.cur() == Tok::Op(",") {
                self.bump();
                continue;
            }
            break;
        }
        Ok(items)
    }

    /// `%{...}` body: `key: value` pairs and `k => v` associations.
    fn parse_map_body(&mut self) -> Result<Vec<(Expr, Expr)>> {
        let items = self.parse_comma_items("}")?;
        let mut pairs = Vec::new();
        for item in items {
            match item {
                Expr::BinOp("=>", k, v) => pairs.push((*k, *v)),
                Expr::Keyword(kw) => {
                    for (k, v) in kw {
                        pairs.push((Expr::Atom(k), v));
                    }
                }
                // `%{map | key: value}` update syntax and other shapes are
                // kept as-is under a synthetic key.
                other => pairs.push((Expr::Nil, other)),
            }
        }
        Ok(pairs)
    }

    /// Consecutive `key: value` pairs starting at a `Key` token.
    fn parse_keyword_pairs(&mut self) -> Result<Expr> {
        let mut pairs = Vec::new();
        loop {
            let Tok::Key(key) = self.cur().clone() else {
                break;
            };
            self.bump();
            self.skip_seps();
            let value = self.parse_expr(0)?;
            pairs.push((key, value));
            // Only continue through a comma when another key follows, so
            // outer comma-separated contexts keep their delimiters.
            let save = self.pos;
            if *self.cur() == Tok::Op(",") {
                self.bump();
                self.skip_seps();
                if matches!(self.cur(), Tok::Key(_)) {
                    continue;
                }
            }
            self.pos = save;
            break;
        }
        Ok(Expr::Keyword(pairs))
    }

    /// Module attribute after `@`: `@spec ...`, `@behaviour Mod`, `@attr`.
    fn parse_attribute(&mut self) -> Result<Expr> {
        let line = self.cur_line();
        let Tok::Ident(name) = self.cur().clone() else {
            // `@` applied to something unusual; fall back to a unary node.
            let inner = self.parse_expr(UNARY_PREC)?;
            return Ok(Expr::UnOp("@", Box::new(inner)));
        };
        self.bump();
        if *self.cur() == Tok::Op("(") {
            self.bump();
            let args = self.parse_comma_items(")")?;
            self.expect_op(")")?;
            return Ok(Expr::AttrDef(name, Box::new(single_or_tuple(args)), line));
        }
        let starts_value = self.cur().starts_expr()
            && !(*self.cur() == Tok::Op("[") && !self.cur_space());
        if starts_value {
            let args = self.parse_no_paren_args()?;
            return Ok(Expr::AttrDef(name, Box::new(single_or_tuple(args)), line));
        }
        Ok(Expr::AttrRef(name))
    }

    /// Postfix forms: dot calls, dotted aliases, and bracket access.
    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            match self.cur().clone() {
                Tok::Op(".") => {
                    let after = self.toks.get(self.pos + 1).map(|t| t.tok.clone());
                    match after {
                        Some(Tok::Ident(name)) => {
                            self.bump();
                            let line = self.cur_line();
                            self.bump();
                            expr =
                                self.parse_maybe_call(Some(Box::new(expr)), name, line)?;
                        }
                        Some(Tok::Alias(_)) => {
                            // `__MODULE__.Sub` style: keep as a dotted pair.
                            self.bump();
                            let rhs = self.parse_alias_path()?;
                            expr = Expr::BinOp(".", Box::new(expr), Box::new(rhs));
                        }
                        Some(Tok::Op("{")) => {
                            // Multi-alias expansion: `alias Mod.{A, B}`.
                            self.bump();
                            let line = self.cur_line();
                            self.bump();
                            let args = self.parse_comma_items("}")?;
                            self.expect_op("}")?;
                            expr = Expr::Call(Call {
                                target: Some(Box::new(expr)),
                                name: "{}".to_string(),
                                args,
                                blocks: Vec::new(),
                                line,
                                end_line: line,
                            });
                        }
                        Some(Tok::Op("(")) => {
                            // Anonymous call `fun.(args)`.
                            self.bump();
                            self.bump();
                            let args = self.parse_comma_items(")")?;
                            let line = self.cur_line();
                            self.expect_op(")")?;
                            expr = Expr::Call(Call {
                                target: Some(Box::new(expr)),
                                name: String::new(),
                                args,
                                blocks: Vec::new(),
                                line,
                                end_line: line,
                            });
                        }
                        Some(Tok::Op(op)) => {
                            // Operator reference (`Kernel.+`); rare, keep
                            // the shape without arguments.
                            self.bump();
                            self.bump();
                            expr = Expr::BinOp(
                                ".",
                                Box::new(expr),
                                Box::new(Expr::Var(op.to_string())),
                            );
                        }
                        _ => break,
                    }
                }
                Tok::Op("[") if !self.cur_space() => {
                    self.bump();
                    let items = self.parse_comma_items("]")?;
                    self.expect_op("]")?;
                    expr = Expr::BinOp(
                        "[]",
                        Box::new(expr),
                        Box::new(Expr::List(items)),
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// `do ... end` with optional `else`/`rescue`/`catch`/`after` sections.
    fn maybe_parse_blocks(&mut self, call: &mut Call) -> Result<()> {
        if !matches!(self.cur(), Tok::Do) {
            return Ok(());
        }
        self.bump();
        let mut section: &'static str = "do";
        loop {
            let (body, stop) =
                self.parse_seq(&["end", "else", "rescue", "catch", "after"])?;
            call.blocks.push((section.to_string(), body));
            match stop {
                "end" => {
                    call.end_line = self.cur_line();
                    self.bump();
                    return Ok(());
                }
                "eof" => return self.err("unexpected end of input inside `do` block"),
                next => {
                    section = next;
                    self.bump();
                }
            }
        }
    }
}

fn single_or_tuple(mut args: Vec<Expr>) -> Expr {
    match args.len() {
        0 => Expr::Nil,
        1 => args.remove(0),
        _ => Expr::Tuple(args),
    }
}
