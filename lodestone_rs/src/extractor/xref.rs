//! Cross-reference extraction pass.
//!
//! Reads the project's compilation manifest for inter-module dependency
//! edges (compile/runtime/export). The manifest format is private to the
//! compiler, so the primary path is an adapter script that asks the
//! compiler itself to decode it; when that fails, the fallback shells out
//! to the compiler's xref sub-tool in JSON graph mode and maps the
//! file-level edges back to modules.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

use crate::records::{DepEdge, DepType};

use super::is_denylisted;
use super::tracer::AdapterFiles;

#[derive(Debug, Default)]
pub struct XrefRecords {
    pub deps: Vec<DepEdge>,
}

/// Extract dependency edges for the project at `root`. `module_files` maps
/// module name -> defining file (from the syntactic pass); the fallback
/// path uses its inverse to translate file-level edges.
pub fn extract(root: &Path, module_files: &BTreeMap<String, String>) -> XrefRecords {
    if !root.join("mix.exs").is_file() {
        debug!("no mix.exs, skipping xref");
        return XrefRecords::default();
    }
    let edges = match read_manifest(root) {
        Ok(output) => parse_manifest_dump(&output),
        Err(e) => {
            debug!(error = %e, "manifest read failed, falling back to xref graph");
            match read_xref_graph(root) {
                Ok(output) => parse_xref_json(&output, module_files),
                Err(e) => {
                    warn!(error = %e, "xref fallback failed, continuing without dependency edges");
                    Vec::new()
                }
            }
        }
    };
    XrefRecords {
        deps: dedupe(edges),
    }
}

/// Primary path: an adapter script decodes the compile manifest and prints
/// `from-module <TAB> to-module <TAB> type` lines.
fn read_manifest(root: &Path) -> std::io::Result<String> {
    let files = AdapterFiles::create(root, "xref")?;
    let script = format!(
        r#"path = Path.join(Mix.Project.manifest_path(), "compile.elixir")

lines =
  try do
    {{modules, sources}} = Mix.Compilers.Elixir.read_manifest(path)
    _ = modules

    for source <- sources,
        {{source_path, compile_refs, runtime_refs, export_refs, defined}} <-
          [Lodestone.Xref.fields(source)],
        from <- defined,
        {{kind, refs}} <- [{{"compile", compile_refs}}, {{"runtime", runtime_refs}}, {{"export", export_refs}}],
        to <- refs do
      _ = source_path
      Enum.join([inspect(from), inspect(to), kind], "\t")
    end
  rescue
    _ -> System.halt(3)
  end

File.write!({events_path}, Enum.join(lines, "\n"))
"#,
        events_path = elixir_string_path(&files.events_path.to_string_lossy()),
    );
    // The record layout of `source` tuples is version-dependent; define the
    // field accessor next to the query so a mismatch raises and trips the
    // rescue above.
    let accessor = r#"defmodule Lodestone.Xref do
  def fields({:source, source, _size, _digest, compile_refs, export_refs, runtime_refs, _compile_env, _warnings, modules, _external}) do
    {source, compile_refs, runtime_refs, export_refs, modules}
  end

  def fields(record) when is_tuple(record) do
    [source | _] = record |> Tuple.to_list() |> tl()
    {source, [], [], [], []}
  end
end

"#;
    files.run(root, &format!("{}{}", accessor, script))
}

fn parse_manifest_dump(output: &str) -> Vec<DepEdge> {
    let mut edges = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        let [from, to, kind] = fields.as_slice() else {
            continue;
        };
        let from = clean(from);
        let to = clean(to);
        if from.is_empty() || to.is_empty() || from == to || is_denylisted(&to) {
            continue;
        }
        edges.push(DepEdge {
            from,
            to,
            dep_type: dep_type(kind),
        });
    }
    edges
}

/// Fallback: the xref sub-tool in JSON graph mode.
fn read_xref_graph(root: &Path) -> std::io::Result<String> {
    let output = Command::new("mix")
        .args(["xref", "graph", "--format", "json"])
        .current_dir(root)
        .output()?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "mix xref exited with {:?}",
            output.status.code()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Tolerant decode of the JSON graph: either a bare edge array
/// (`[{"from": .., "to": .., "label": ..}]`) or an `{"edges": [...]}`
/// wrapper. Nodes are usually source files and translate to modules via
/// the inverted module map; module-named nodes pass through. A missing or
/// unknown label is the conservative `compile` (the widest re-index).
fn parse_xref_json(output: &str, module_files: &BTreeMap<String, String>) -> Vec<DepEdge> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(output.trim()) else {
        return Vec::new();
    };
    let empty = Vec::new();
    let raw_edges = value
        .get("edges")
        .and_then(|edges| edges.as_array())
        .or_else(|| value.as_array())
        .unwrap_or(&empty);

    // Invert module -> file into file -> modules.
    let mut file_modules: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (module, file) in module_files {
        file_modules.entry(file.as_str()).or_default().push(module);
    }

    let mut edges = Vec::new();
    for edge in raw_edges {
        let (Some(from_node), Some(to_node)) = (
            edge.get("from").and_then(|v| v.as_str()),
            edge.get("to").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        let dep_type = label_dep_type(edge.get("label").and_then(|v| v.as_str()));
        let (Some(froms), Some(tos)) = (
            resolve_node(from_node, &file_modules),
            resolve_node(to_node, &file_modules),
        ) else {
            continue;
        };
        for from in &froms {
            for to in &tos {
                if from == to || is_denylisted(to) {
                    continue;
                }
                edges.push(DepEdge {
                    from: from.clone(),
                    to: to.clone(),
                    dep_type,
                });
            }
        }
    }
    edges
}

/// Modules a graph node stands for: a known source file expands through
/// the module map, a module-shaped name stands for itself.
fn resolve_node(
    node: &str,
    file_modules: &BTreeMap<&str, Vec<&str>>,
) -> Option<Vec<String>> {
    if let Some(modules) = file_modules.get(node) {
        return Some(modules.iter().map(|m| (*m).to_string()).collect());
    }
    let cleaned = clean(node);
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return Some(vec![cleaned]);
    }
    None
}

/// Unknown and missing labels default to `compile`.
fn label_dep_type(label: Option<&str>) -> DepType {
    match label {
        Some(label) if label.contains("runtime") => DepType::Runtime,
        Some(label) if label.contains("export") => DepType::Export,
        _ => DepType::Compile,
    }
}

fn dedupe(edges: Vec<DepEdge>) -> Vec<DepEdge> {
    let mut seen = HashSet::new();
    let mut out: Vec<DepEdge> = edges
        .into_iter()
        .filter(|e| seen.insert((e.from.clone(), e.to.clone(), e.dep_type)))
        .collect();
    out.sort();
    out
}

fn dep_type(kind: &str) -> DepType {
    match kind {
        "runtime" => DepType::Runtime,
        "export" => DepType::Export,
        _ => DepType::Compile,
    }
}

fn clean(raw: &str) -> String {
    raw.trim_matches('"')
        .trim_start_matches(':')
        .trim_start_matches("Elixir.")
        .to_string()
}

fn elixir_string_path(value: &str) -> String {
    super::tracer::elixir_string(value)
}
