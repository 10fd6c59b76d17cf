//! Schema extraction pass.
//!
//! Recognizes ORM schema blocks (`schema "table" do ... end` and
//! `embedded_schema do ... end`) and collects fields, the synthesized
//! timestamp columns, and associations with resolved related modules.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::discovery::normalize;
use crate::parser::ast::{render, Call, Expr};
use crate::parser::parse;
use crate::records::{AssocKind, Association, Schema, SchemaField};

/// Cheap probe: does this source look like it defines a schema?
pub fn is_schema_source(content: &str) -> bool {
    super::regexes::regex_schema_marker().is_match(content)
}

/// Extract schemas from the given files, sorted by module.
pub fn extract(root: &Path, files: &[std::path::PathBuf]) -> Vec<Schema> {
    let mut schemas = Vec::new();
    for path in files {
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        if !is_schema_source(&content) {
            continue;
        }
        let tree = match parse(&content) {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "schema parse failed");
                continue;
            }
        };
        let file = normalize(root, path);
        for expr in &tree {
            collect_modules(expr, None, &file, &mut schemas);
        }
    }
    schemas.sort_by(|a, b| a.module.cmp(&b.module));
    schemas.dedup_by(|a, b| a.module == b.module);
    schemas
}

fn collect_modules(expr: &Expr, parent: Option<&str>, file: &str, out: &mut Vec<Schema>) {
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

    // Aliases are lexical: fold them in body order so association targets
    // resolve to fully-qualified modules.
    let mut aliases: HashMap<String, String> = HashMap::new();
    for item in body {
        if let Some(directive) = item.as_call() {
            if directive.name == "alias" && directive.target.is_none() {
                record_alias(directive, &mut aliases);
            }
        }
        if let Some(schema_call) = item.as_call() {
            match schema_call.name.as_str() {
                "schema" => {
                    if let Some(Expr::Str(source)) = schema_call.args.first() {
                        out.push(build_schema(
                            &module,
                            Some(source.clone()),
                            schema_call,
                            file,
                            &aliases,
                        ));
                    }
                }
                "embedded_schema" => {
                    out.push(build_schema(&module, None, schema_call, file, &aliases));
                }
                _ => {}
            }
        }
        collect_modules(item, Some(&module), file, out);
    }
}

fn record_alias(call: &Call, aliases: &mut HashMap<String, String>) {
    // `alias Mod.{A, B}` expansion.
    if let Some(Expr::Call(expansion)) = call.args.first() {
        if expansion.name == "{}" {
            if let Some(base) = expansion.target.as_deref().and_then(|t| t.alias_name()) {
                for branch in &expansion.args {
                    if let Expr::Alias(segs) = branch {
                        let target = format!("{}.{}", base, segs.join("."));
                        let short = segs.last().cloned().unwrap_or_default();
                        aliases.insert(short, target);
                    }
                }
            }
            return;
        }
    }
    let Some(target) = call.args.first().and_then(|a| a.alias_name()) else {
        return;
    };
    let short = match call.keyword("as").and_then(|v| v.alias_name()) {
        Some(renamed) => renamed,
        None => target.rsplit('.').next().unwrap_or(&target).to_string(),
    };
    aliases.insert(short, target);
}

fn build_schema(
    module: &str,
    source: Option<String>,
    call: &Call,
    file: &str,
    aliases: &HashMap<String, String>,
) -> Schema {
    let mut schema = Schema {
        module: module.to_string(),
        source,
        file: file.to_string(),
        line: call.line,
        end_line: call.end_line,
        fields: Vec::new(),
        associations: Vec::new(),
    };
    if let Some(body) = call.do_block() {
        for item in body {
            let Some(entry) = item.as_call() else { continue };
            if entry.target.is_some() {
                continue;
            }
            match entry.name.as_str() {
                "field" => {
                    let Some(Expr::Atom(name)) = entry.args.first() else {
                        continue;
                    };
                    let field_type = entry
                        .args
                        .get(1)
                        .map(type_spelling)
                        .unwrap_or_else(|| "string".to_string());
                    schema.fields.push(SchemaField {
                        name: name.clone(),
                        field_type,
                    });
                }
                "timestamps" => {
                    let spelling = entry
                        .keyword("type")
                        .map(type_spelling)
                        .unwrap_or_else(|| "naive_datetime".to_string());
                    for name in ["inserted_at", "updated_at"] {
                        schema.fields.push(SchemaField {
                            name: name.to_string(),
                            field_type: spelling.clone(),
                        });
                    }
                }
                assoc => {
                    let Some(kind) = assoc_kind(assoc) else { continue };
                    let Some(Expr::Atom(name)) = entry.args.first() else {
                        continue;
                    };
                    let Some(related) = entry.args.get(1).and_then(|e| related_module(e, aliases))
                    else {
                        continue;
                    };
                    schema.associations.push(Association {
                        kind,
                        name: name.clone(),
                        related,
                    });
                }
            }
        }
    }
    schema
}

fn assoc_kind(name: &str) -> Option<AssocKind> {
    Some(match name {
        "belongs_to" => AssocKind::BelongsTo,
        "has_one" => AssocKind::HasOne,
        "has_many" => AssocKind::HasMany,
        "many_to_many" => AssocKind::ManyToMany,
        "embeds_one" => AssocKind::EmbedsOne,
        "embeds_many" => AssocKind::EmbedsMany,
        _ => return None,
    })
}

/// Resolve an association target: aliases expand through the module's
/// alias table, symbolic module references are stringified.
fn related_module(expr: &Expr, aliases: &HashMap<String, String>) -> Option<String> {
    match expr {
        Expr::Alias(segs) => {
            let first = segs.first()?;
            match aliases.get(first) {
                Some(expanded) => {
                    let mut name = expanded.clone();
                    for seg in &segs[1..] {
                        name.push('.');
                        name.push_str(seg);
                    }
                    Some(name)
                }
                None => Some(segs.join(".")),
            }
        }
        Expr::Atom(a) => Some(a.trim_start_matches("Elixir.").to_string()),
        _ => None,
    }
}

/// Stable textual form for field types: atoms are spelled bare, composite
/// types keep their structure.
fn type_spelling(expr: &Expr) -> String {
    match expr {
        Expr::Atom(a) => a.clone(),
        Expr::Alias(segs) => segs.join("."),
        Expr::Tuple(items) => format!(
            "{{{}}}",
            items
                .iter()
                .map(type_spelling)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        other => render(other),
    }
}
