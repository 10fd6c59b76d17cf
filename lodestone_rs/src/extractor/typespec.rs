//! Type-annotation extraction pass.
//!
//! Collects `@spec` annotations into TypeSpec records and
//! `@type`/`@typep`/`@opaque`/`@callback`/`@macrocallback` annotations into
//! TypeDef records, with signatures rendered back to text.

use std::path::Path;

use tracing::warn;

use crate::discovery::normalize;
use crate::parser::ast::{render, Expr};
use crate::parser::parse;
use crate::records::{TypeDef, TypeDefKind, TypeSpec};

#[derive(Debug, Default)]
pub struct TypeRecords {
    pub specs: Vec<TypeSpec>,
    pub types: Vec<TypeDef>,
}

/// Extract type annotations from the given files, sorted by
/// (module, name, arity).
pub fn extract(root: &Path, files: &[std::path::PathBuf]) -> TypeRecords {
    let mut out = TypeRecords::default();
    for path in files {
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        if !content.contains('@') {
            continue;
        }
        let tree = match parse(&content) {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "annotation parse failed");
                continue;
            }
        };
        let file = normalize(root, path);
        for expr in &tree {
            collect_modules(expr, None, &file, &mut out);
        }
    }
    out.specs.sort_by(|a, b| {
        (&a.module, &a.name, a.arity).cmp(&(&b.module, &b.name, b.arity))
    });
    out.types.sort_by(|a, b| {
        (&a.module, &a.name, a.arity).cmp(&(&b.module, &b.name, b.arity))
    });
    out
}

fn collect_modules(expr: &Expr, parent: Option<&str>, file: &str, out: &mut TypeRecords) {
    let Some(call) = expr.as_call() else { return };
    if call.name != "defmodule" || call.target.is_some() {
        return;
    }
    let Some(name) = call.args.first().and_then(|a| a.alias_name()) else {
        return;
    };
    let module = match parent {
        Some(p) => format!("{}.{}", p, name),
        None => name,
    };
    let Some(body) = call.do_block() else { return };
    for item in body {
        if let Expr::AttrDef(attr, value, line) = item {
            collect_annotation(attr, value, *line, &module, file, out);
        }
        collect_modules(item, Some(&module), file, out);
    }
}

fn collect_annotation(
    attr: &str,
    value: &Expr,
    line: usize,
    module: &str,
    file: &str,
    out: &mut TypeRecords,
) {
    let kind = match attr {
        "spec" => None,
        "type" => Some(TypeDefKind::Type),
        "typep" => Some(TypeDefKind::Typep),
        "opaque" => Some(TypeDefKind::Opaque),
        "callback" => Some(TypeDefKind::Callback),
        "macrocallback" => Some(TypeDefKind::Macrocallback),
        _ => return,
    };

    // `name(args) :: definition`, optionally wrapped in a `when` clause
    // binding type variables.
    let unwrapped = match value {
        Expr::BinOp("when", inner, _) => inner.as_ref(),
        other => other,
    };
    let (head, definition) = match unwrapped {
        Expr::BinOp("::", head, def) => (head.as_ref(), Some(def.as_ref())),
        other => (other, None),
    };
    let (name, params) = match head {
        Expr::Call(c) if c.target.is_none() => {
            (c.name.clone(), c.args.iter().map(render).collect::<Vec<_>>())
        }
        Expr::Var(name) => (name.clone(), Vec::new()),
        _ => return,
    };

    match kind {
        None => {
            // A spec without a return type is malformed; skip it.
            let Some(definition) = definition else { return };
            out.specs.push(TypeSpec {
                module: module.to_string(),
                name,
                arity: params.len(),
                params,
                return_type: render(definition),
                file: file.to_string(),
                line,
            });
        }
        Some(kind) => {
            out.types.push(TypeDef {
                module: module.to_string(),
                name,
                arity: params.len(),
                kind,
                params,
                definition: definition.map(render).unwrap_or_default(),
                file: file.to_string(),
                line,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn types_from(src: &str) -> TypeRecords {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/types.ex"), src).unwrap();
        extract(root, &[root.join("lib/types.ex")])
    }

    #[test]
    fn specs_capture_params_and_return() {
        let out = types_from(
            "defmodule App.Math do\n  @spec add(integer(), integer()) :: integer()\n  def add(a, b), do: a + b\nend",
        );
        assert_eq!(out.specs.len(), 1);
        let spec = &out.specs[0];
        assert_eq!(spec.module, "App.Math");
        assert_eq!(spec.name, "add");
        assert_eq!(spec.arity, 2);
        assert_eq!(spec.params, vec!["integer()", "integer()"]);
        assert_eq!(spec.return_type, "integer()");
        assert_eq!(spec.line, 2);
    }

    #[test]
    fn zero_arity_spec_without_parens() {
        let out = types_from(
            "defmodule App.Info do\n  @spec version :: String.t()\n  def version, do: \"1\"\nend",
        );
        assert_eq!(out.specs[0].arity, 0);
        assert_eq!(out.specs[0].return_type, "String.t()");
    }

    #[test]
    fn type_definitions_record_kind_and_params() {
        let out = types_from(
            "defmodule App.Types do\n  @type result(t) :: {:ok, t} | :error\n  @typep internal :: map()\n  @opaque token :: binary()\nend",
        );
        assert_eq!(out.types.len(), 3);
        let result = out.types.iter().find(|t| t.name == "result").unwrap();
        assert_eq!(result.kind, TypeDefKind::Type);
        assert_eq!(result.params, vec!["t"]);
        assert!(result.definition.contains("{:ok, t}"));
        let internal = out.types.iter().find(|t| t.name == "internal").unwrap();
        assert_eq!(internal.kind, TypeDefKind::Typep);
        let token = out.types.iter().find(|t| t.name == "token").unwrap();
        assert_eq!(token.kind, TypeDefKind::Opaque);
    }

    #[test]
    fn callbacks_are_typedefs() {
        let out = types_from(
            "defmodule App.Worker do\n  @callback handle(term()) :: :ok | {:error, term()}\n  @macrocallback expand(Macro.t()) :: Macro.t()\nend",
        );
        let kinds: Vec<_> = out.types.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TypeDefKind::Callback));
        assert!(kinds.contains(&TypeDefKind::Macrocallback));
    }

    #[test]
    fn when_bound_specs_unwrap() {
        let out = types_from(
            "defmodule App.Generic do\n  @spec first([t]) :: t when t: term()\n  def first([h | _]), do: h\nend",
        );
        assert_eq!(out.specs.len(), 1);
        assert_eq!(out.specs[0].name, "first");
        assert_eq!(out.specs[0].return_type, "t");
    }

    #[test]
    fn other_attributes_are_ignored() {
        let out = types_from(
            "defmodule App.Doc do\n  @moduledoc \"docs\"\n  @doc \"fn docs\"\n  @behaviour GenServer\nend",
        );
        assert!(out.specs.is_empty());
        assert!(out.types.is_empty());
    }
}
