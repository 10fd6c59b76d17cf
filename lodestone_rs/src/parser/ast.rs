//! Syntax tree produced by the parser and walked by the extractors.
//!
//! The tree is deliberately loose: it models exactly the shapes the
//! extraction phases pattern-match on (calls, aliases, attributes, blocks,
//! literals) and folds everything else into generic operator nodes.

/// A call expression: local (`foo(x)`), qualified (`Mod.foo(x)`), or a
/// no-parentheses macro invocation (`get "/users", Ctrl, :index`).
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// Qualifier before the dot, when present (`Mod` in `Mod.foo()`).
    pub target: Option<Box<Expr>>,
    pub name: String,
    pub args: Vec<Expr>,
    /// `do`/`else`/`rescue`/`catch`/`after` sections, in source order.
    pub blocks: Vec<(String, Vec<Expr>)>,
    pub line: usize,
    /// Line of the closing `end` when a block is attached, else `line`.
    pub end_line: usize,
}

impl Call {
    /// Body of the `do` section, if the call carries one.
    pub fn do_block(&self) -> Option<&[Expr]> {
        self.blocks
            .iter()
            .find(|(name, _)| name == "do")
            .map(|(_, body)| body.as_slice())
    }

    /// Keyword arguments, when the final argument is a keyword list.
    pub fn keywords(&self) -> &[(String, Expr)] {
        match self.args.last() {
            Some(Expr::Keyword(pairs)) => pairs,
            _ => &[],
        }
    }

    /// Look up a keyword argument by key (`only:`, `as:`, ...).
    pub fn keyword(&self, key: &str) -> Option<&Expr> {
        self.keywords()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Charlist(String),
    Sigil(String),
    Atom(String),
    Bool(bool),
    Nil,
    /// Dotted module alias: `Foo.Bar` -> ["Foo", "Bar"].
    Alias(Vec<String>),
    /// Identifier in value position.
    Var(String),
    Call(Call),
    /// `fn ... end` body, flattened.
    Fn(Vec<Expr>),
    /// `&expr` capture.
    Capture(Box<Expr>),
    /// `@name value` definition with its source line.
    AttrDef(String, Box<Expr>, usize),
    /// Bare `@name` reference.
    AttrRef(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    /// `%{k => v, key: v}` map literal.
    Map(Vec<(Expr, Expr)>),
    /// `%Alias{...}` struct literal.
    StructLit(Box<Expr>, Vec<(Expr, Expr)>),
    /// Keyword list, literal or trailing.
    Keyword(Vec<(String, Expr)>),
    BinOp(&'static str, Box<Expr>, Box<Expr>),
    UnOp(&'static str, Box<Expr>),
    /// Parenthesized group of expressions.
    Block(Vec<Expr>),
    /// `<<...>>` bitstring.
    Bitstring(Vec<Expr>),
}

impl Expr {
    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expr::Call(c) => Some(c),
            _ => None,
        }
    }

    /// Dotted name when the expression is a module alias.
    pub fn alias_name(&self) -> Option<String> {
        match self {
            Expr::Alias(segs) => Some(segs.join(".")),
            _ => None,
        }
    }

    /// Visit this expression and every child, depth first.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Call(c) => {
                if let Some(t) = &c.target {
                    t.walk(f);
                }
                for a in &c.args {
                    a.walk(f);
                }
                for (_, body) in &c.blocks {
                    for e in body {
                        e.walk(f);
                    }
                }
            }
            Expr::Fn(body) | Expr::Block(body) | Expr::List(body) | Expr::Tuple(body)
            | Expr::Bitstring(body) => {
                for e in body {
                    e.walk(f);
                }
            }
            Expr::Capture(e) | Expr::UnOp(_, e) | Expr::AttrDef(_, e, _) => e.walk(f),
            Expr::BinOp(_, l, r) => {
                l.walk(f);
                r.walk(f);
            }
            Expr::Map(pairs) => {
                for (k, v) in pairs {
                    k.walk(f);
                    v.walk(f);
                }
            }
            Expr::StructLit(name, pairs) => {
                name.walk(f);
                for (k, v) in pairs {
                    k.walk(f);
                    v.walk(f);
                }
            }
            Expr::Keyword(pairs) => {
                for (_, v) in pairs {
                    v.walk(f);
                }
            }
            _ => {}
        }
    }
}

/// Render an expression back to a stable, compact textual spelling.
///
/// This is the form stored in TypeSpec/TypeDef records and struct-field
/// defaults. It is not a formatter; it only needs to be deterministic and
/// readable.
pub fn render(expr: &Expr) -> String {
    match expr {
        Expr::Int(v) => v.to_string(),
        Expr::Float(v) => v.to_string(),
        Expr::Str(s) => format!("\"{}\"", s),
        Expr::Charlist(s) => format!("'{}'", s),
        Expr::Sigil(s) => format!("~({})", s),
        Expr::Atom(a) => format!(":{}", a),
        Expr::Bool(b) => b.to_string(),
        Expr::Nil => "nil".to_string(),
        Expr::Alias(segs) => segs.join("."),
        Expr::Var(name) => name.clone(),
        Expr::Call(c) => {
            let mut out = String::new();
            if let Some(t) = &c.target {
                out.push_str(&render(t));
                out.push('.');
            }
            out.push_str(&c.name);
            out.push('(');
            out.push_str(&join(&c.args));
            out.push(')');
            out
        }
        Expr::Fn(_) => "fn".to_string(),
        Expr::Capture(e) => format!("&{}", render(e)),
        Expr::AttrDef(name, value, _) => format!("@{} {}", name, render(value)),
        Expr::AttrRef(name) => format!("@{}", name),
        Expr::List(items) => format!("[{}]", join(items)),
        Expr::Tuple(items) => format!("{{{}}}", join(items)),
        Expr::Map(pairs) => format!("%{{{}}}", join_pairs(pairs)),
        Expr::StructLit(name, pairs) => format!("%{}{{{}}}", render(name), join_pairs(pairs)),
        Expr::Keyword(pairs) => pairs
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render(v)))
            .collect::<Vec<_>>()
            .join(", "),
        Expr::BinOp(op, l, r) => match *op {
            "." | ".." => format!("{}{}{}", render(l), op, render(r)),
            "|" | "::" | "->" => format!("{} {} {}", render(l), op, render(r)),
            _ => format!("{} {} {}", render(l), op, render(r)),
        },
        Expr::UnOp(op, e) => {
            if op.chars().all(|c| c.is_ascii_alphabetic()) {
                format!("{} {}", op, render(e))
            } else {
                format!("{}{}", op, render(e))
            }
        }
        Expr::Block(items) => join(items),
        Expr::Bitstring(items) => format!("<<{}>>", join(items)),
    }
}

fn join(items: &[Expr]) -> String {
    items.iter().map(render).collect::<Vec<_>>().join(", ")
}

fn join_pairs(pairs: &[(Expr, Expr)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| match k {
            Expr::Atom(a) => format!("{}: {}", a, render(v)),
            other => format!("{} => {}", render(other), render(v)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
