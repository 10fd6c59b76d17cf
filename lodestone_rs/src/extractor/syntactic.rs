//! Syntactic extraction pass.
//!
//! Walks each file's parse tree with a descent context (current module,
//! current function) and collects module, function, call, directive, and
//! struct records. Files parse independently and in parallel; a file that
//! fails to read or parse contributes nothing.

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use tracing::warn;

use crate::discovery::normalize;
use crate::parser::ast::{render, Call, Expr};
use crate::parser::parse;
use crate::records::{
    CallRef, DirectiveKind, DirectiveRef, FunctionDef, ModuleDef, StructDef, StructField,
    Visibility,
};

/// Files larger than this are skipped; a pathological input must not stall
/// a parse worker.
const MAX_FILE_BYTES: u64 = 1_500_000;

/// Call heads that are syntax, not function calls: block and binding
/// forms, control flow, quoting, and definition/directive heads. Operators
/// never reach here (the parser keeps them as operator nodes).
const RESERVED_FORMS: &[&str] = &[
    "def",
    "defp",
    "defmacro",
    "defmacrop",
    "defmodule",
    "defstruct",
    "defguard",
    "defguardp",
    "defdelegate",
    "defimpl",
    "defprotocol",
    "defexception",
    "defoverridable",
    "alias",
    "import",
    "require",
    "use",
    "if",
    "unless",
    "case",
    "cond",
    "with",
    "for",
    "try",
    "receive",
    "quote",
    "unquote",
    "unquote_splicing",
    "super",
];

fn is_reserved(name: &str) -> bool {
    RESERVED_FORMS.contains(&name)
}

/// Records collected from one file (or the merged project set).
#[derive(Clone, Debug, Default)]
pub struct SyntacticRecords {
    pub modules: Vec<ModuleDef>,
    pub functions: Vec<FunctionDef>,
    pub calls: Vec<CallRef>,
    pub directives: Vec<DirectiveRef>,
    pub structs: Vec<StructDef>,
}

impl SyntacticRecords {
    fn absorb(&mut self, other: SyntacticRecords) {
        self.modules.extend(other.modules);
        self.functions.extend(other.functions);
        self.calls.extend(other.calls);
        self.directives.extend(other.directives);
        self.structs.extend(other.structs);
    }
}

/// Extract from a list of files, in parallel, with deterministic output
/// ordering regardless of worker scheduling.
pub fn extract(root: &Path, files: &[std::path::PathBuf]) -> SyntacticRecords {
    let partials: Vec<SyntacticRecords> = files
        .par_iter()
        .map(|path| extract_file(root, path))
        .collect();

    let mut merged = SyntacticRecords::default();
    for partial in partials {
        merged.absorb(partial);
    }

    merged.modules.sort_by(|a, b| a.module.cmp(&b.module));
    merged.modules.dedup_by(|a, b| a.module == b.module);
    merged.functions.sort_by(|a, b| {
        (&a.module, &a.name, a.arity).cmp(&(&b.module, &b.name, b.arity))
    });
    merged
        .functions
        .dedup_by(|a, b| a.module == b.module && a.name == b.name && a.arity == b.arity);
    merged
        .calls
        .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    merged
        .directives
        .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    merged
        .structs
        .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    merged
}

/// Extract from a single file. Any failure yields an empty contribution.
pub fn extract_file(root: &Path, path: &Path) -> SyntacticRecords {
    let mut out = SyntacticRecords::default();
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() > MAX_FILE_BYTES {
            warn!(file = %path.display(), "skipping oversized source file");
            return out;
        }
    }
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "unreadable source file");
            return out;
        }
    };
    let tree = match parse(&content) {
        Ok(t) => t,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "parse failed");
            return out;
        }
    };

    let mut ctx = Ctx {
        file: normalize(root, path),
        module: None,
        function: None,
        aliases: HashMap::new(),
        out: &mut out,
    };
    for expr in &tree {
        visit(expr, &mut ctx);
    }
    out
}

struct Ctx<'a> {
    file: String,
    /// Fully-qualified current module, when inside `defmodule`.
    module: Option<String>,
    /// Current function MFA, when inside a definition body.
    function: Option<String>,
    /// Lexically visible aliases: short name -> fully-qualified module.
    aliases: HashMap<String, String>,
    out: &'a mut SyntacticRecords,
}

impl Ctx<'_> {
    /// Resolve an alias path through the visible aliases.
    fn resolve_alias(&self, segments: &[String]) -> String {
        if let Some(first) = segments.first() {
            if let Some(expanded) = self.aliases.get(first) {
                let mut name = expanded.clone();
                for seg in &segments[1..] {
                    name.push('.');
                    name.push_str(seg);
                }
                return name;
            }
        }
        segments.join(".")
    }

    /// Module name an expression refers to, when nameable.
    fn module_of(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Alias(segs) => Some(self.resolve_alias(segs)),
            Expr::Var(name) if name == "__MODULE__" => self.module.clone(),
            Expr::Atom(name) if name.starts_with("Elixir.") => {
                Some(name.trim_start_matches("Elixir.").to_string())
            }
            Expr::BinOp(".", lhs, rhs) => {
                let base = self.module_of(lhs)?;
                let rest = self.module_of(rhs)?;
                Some(format!("{}.{}", base, rest))
            }
            _ => None,
        }
    }
}

fn visit(expr: &Expr, ctx: &mut Ctx<'_>) {
    match expr {
        Expr::Call(call) if call.target.is_none() => match call.name.as_str() {
            "defmodule" => visit_defmodule(call, ctx),
            "def" | "defp" | "defmacro" | "defmacrop" => visit_def(call, ctx),
            "alias" | "import" | "require" | "use" => visit_directive(call, ctx),
            "defstruct" => visit_defstruct(call, ctx),
            name => {
                if ctx.function.is_some() && !is_reserved(name) {
                    // Unresolved local call; a later phase may contribute
                    // the resolved counterpart at the same site.
                    push_call(ctx, None, call.line);
                }
                visit_children(expr, ctx);
            }
        },
        Expr::Call(call) => {
            if ctx.function.is_some() {
                if let Some(module) = call
                    .target
                    .as_deref()
                    .and_then(|target| ctx.module_of(target))
                {
                    if !call.name.is_empty() {
                        let callee =
                            format!("{}.{}/{}", module, call.name, call.args.len());
                        push_call(ctx, Some(callee), call.line);
                    }
                }
            }
            visit_children(expr, ctx);
        }
        _ => visit_children(expr, ctx),
    }
}

fn push_call(ctx: &mut Ctx<'_>, callee: Option<String>, line: usize) {
    let Some(caller) = ctx.function.clone() else {
        return;
    };
    ctx.out.calls.push(CallRef {
        caller,
        callee,
        file: ctx.file.clone(),
        line,
    });
}

fn visit_children(expr: &Expr, ctx: &mut Ctx<'_>) {
    match expr {
        Expr::Call(c) => {
            if let Some(t) = &c.target {
                visit(t, ctx);
            }
            for a in &c.args {
                visit(a, ctx);
            }
            for (_, body) in &c.blocks {
                for e in body {
                    visit(e, ctx);
                }
            }
        }
        Expr::Fn(body) | Expr::Block(body) | Expr::List(body) | Expr::Tuple(body)
        | Expr::Bitstring(body) => {
            for e in body {
                visit(e, ctx);
            }
        }
        Expr::Capture(e) | Expr::UnOp(_, e) | Expr::AttrDef(_, e, _) => visit(e, ctx),
        Expr::BinOp(_, l, r) => {
            visit(l, ctx);
            visit(r, ctx);
        }
        Expr::Map(pairs) => {
            for (k, v) in pairs {
                visit(k, ctx);
                visit(v, ctx);
            }
        }
        Expr::StructLit(name, pairs) => {
            visit(name, ctx);
            for (k, v) in pairs {
                visit(k, ctx);
                visit(v, ctx);
            }
        }
        Expr::Keyword(pairs) => {
            for (_, v) in pairs {
                visit(v, ctx);
            }
        }
        _ => {}
    }
}

fn visit_defmodule(call: &Call, ctx: &mut Ctx<'_>) {
    let Some(name) = call.args.first().and_then(|a| a.alias_name()) else {
        visit_children(&Expr::Call(call.clone()), ctx);
        return;
    };
    let fq = match &ctx.module {
        Some(parent) => format!("{}.{}", parent, name),
        None => name,
    };
    let index = ctx.out.modules.len();
    ctx.out.modules.push(ModuleDef {
        module: fq.clone(),
        file: ctx.file.clone(),
        line: call.line,
        end_line: call.end_line,
        behaviours: Vec::new(),
    });

    let saved_module = ctx.module.replace(fq);
    let saved_function = ctx.function.take();
    let saved_aliases = ctx.aliases.clone();

    if let Some(body) = call.do_block() {
        for expr in body {
            if let Expr::AttrDef(attr, value, _) = expr {
                if attr == "behaviour" || attr == "behavior" {
                    if let Some(target) = ctx.module_of(value) {
                        ctx.out.modules[index].behaviours.push(target);
                        continue;
                    }
                }
            }
            visit(expr, ctx);
        }
    }

    ctx.module = saved_module;
    ctx.function = saved_function;
    ctx.aliases = saved_aliases;
}

fn visit_def(call: &Call, ctx: &mut Ctx<'_>) {
    let Some(module) = ctx.module.clone() else {
        return;
    };
    let Some(head_arg) = call.args.first() else {
        return;
    };
    // Strip a `when` guard off the head.
    let head = match head_arg {
        Expr::BinOp("when", head, _) => head.as_ref(),
        other => other,
    };
    let (name, arity) = match head {
        Expr::Call(head_call) if head_call.target.is_none() => {
            (head_call.name.clone(), head_call.args.len())
        }
        // `def version, do: ...` - a zero-arity head without parentheses.
        Expr::Var(name) => (name.clone(), 0),
        _ => return,
    };
    let is_macro = call.name.starts_with("defmacro");
    let visibility = if call.name.ends_with('p') {
        Visibility::Private
    } else {
        Visibility::Public
    };
    ctx.out.functions.push(FunctionDef {
        module: module.clone(),
        name: name.clone(),
        arity,
        visibility,
        is_macro,
        file: ctx.file.clone(),
        line: call.line,
        end_line: call.end_line,
    });

    let saved = ctx.function.replace(format!("{}.{}/{}", module, name, arity));
    if let Some(body) = call.do_block() {
        for expr in body {
            visit(expr, ctx);
        }
    }
    if let Some(value) = call.keyword("do") {
        visit(value, ctx);
    }
    // Guards can call functions too.
    if let Expr::BinOp("when", _, guard) = head_arg {
        visit(guard, ctx);
    }
    ctx.function = saved;
}

fn visit_directive(call: &Call, ctx: &mut Ctx<'_>) {
    let Some(module) = ctx.module.clone() else {
        return;
    };
    let kind = match call.name.as_str() {
        "alias" => DirectiveKind::Alias,
        "import" => DirectiveKind::Import,
        "require" => DirectiveKind::Require,
        "use" => DirectiveKind::Use,
        _ => return,
    };
    let Some(target_expr) = call.args.first() else {
        return;
    };

    // `alias Mod.{A, B}` expands into one directive per branch.
    if let Expr::Call(expansion) = target_expr {
        if expansion.name == "{}" {
            if let Some(base) = expansion
                .target
                .as_deref()
                .and_then(|t| ctx.module_of(t))
            {
                for branch in &expansion.args {
                    if let Expr::Alias(segs) = branch {
                        let target = format!("{}.{}", base, segs.join("."));
                        emit_directive(ctx, kind, &module, target, call, None);
                    }
                }
            }
            return;
        }
    }

    let Some(target) = ctx.module_of(target_expr) else {
        // `use AppWeb, :router` style with an atom second arg still names a
        // module first; anything else (vars, attributes) is dynamic.
        return;
    };
    let as_alias = call.keyword("as").and_then(|v| v.alias_name());
    emit_directive(ctx, kind, &module, target, call, as_alias);
}

fn emit_directive(
    ctx: &mut Ctx<'_>,
    kind: DirectiveKind,
    module: &str,
    target: String,
    call: &Call,
    as_alias: Option<String>,
) {
    if kind == DirectiveKind::Alias {
        let short = as_alias.clone().unwrap_or_else(|| {
            target
                .rsplit('.')
                .next()
                .unwrap_or(target.as_str())
                .to_string()
        });
        ctx.aliases.insert(short, target.clone());
    }
    ctx.out.directives.push(DirectiveRef {
        kind,
        module: module.to_string(),
        target,
        file: ctx.file.clone(),
        line: call.line,
        as_alias,
        only: selector_list(call.keyword("only")),
        except: selector_list(call.keyword("except")),
    });
}

/// `only:`/`except:` values: `[name: arity]` keyword lists become
/// `name/arity` strings, `:functions`/`:macros` become bare words.
fn selector_list(value: Option<&Expr>) -> Vec<String> {
    match value {
        Some(Expr::Keyword(pairs)) => pairs
            .iter()
            .map(|(name, arity)| match arity {
                Expr::Int(n) => format!("{}/{}", name, n),
                other => format!("{}/{}", name, render(other)),
            })
            .collect(),
        Some(Expr::Atom(word)) => vec![word.clone()],
        _ => Vec::new(),
    }
}

fn visit_defstruct(call: &Call, ctx: &mut Ctx<'_>) {
    let Some(module) = ctx.module.clone() else {
        return;
    };
    let mut fields = Vec::new();
    let mut collect = |expr: &Expr| match expr {
        Expr::Atom(name) => fields.push(StructField {
            name: name.clone(),
            default: None,
        }),
        Expr::Keyword(pairs) => {
            for (name, default) in pairs {
                fields.push(StructField {
                    name: name.clone(),
                    default: Some(render(default)),
                });
            }
        }
        _ => {}
    };
    for arg in &call.args {
        match arg {
            Expr::List(items) => {
                for item in items {
                    collect(item);
                }
            }
            other => collect(other),
        }
    }
    ctx.out.structs.push(StructDef {
        module,
        file: ctx.file.clone(),
        line: call.line,
        fields,
    });
}
