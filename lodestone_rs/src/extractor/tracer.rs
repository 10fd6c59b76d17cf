//! Compiler-trace extraction pass.
//!
//! Drives the Elixir compiler as a subprocess with a tracer attached and
//! collects the resolved-symbol events it emits. The adapter is a
//! short-lived script written next to the index cache:
//!
//! 1. the script defines an event-sink module,
//! 2. reruns the compile with `--tracer <sink>`,
//! 3. dumps the collected events to a temp file as tab-separated lines,
//! 4. exits; the parent reads the file and removes both.
//!
//! Every step fails softly: any error yields an empty contribution.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, warn};

use crate::records::{CallRef, DepEdge, DepType};
use crate::store::Store;

use super::is_denylisted;

/// Ceiling on a compile run; a wedged build must not hang the indexer.
const COMPILE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
pub struct TraceRecords {
    pub calls: Vec<CallRef>,
    pub deps: Vec<DepEdge>,
}

/// Run the traced compile for the project at `root`.
pub fn extract(root: &Path) -> TraceRecords {
    if !root.join("mix.exs").is_file() {
        debug!("no mix.exs, skipping compiler trace");
        return TraceRecords::default();
    }
    match run_traced_compile(root) {
        Ok(output) => parse_events(root, &output),
        Err(e) => {
            warn!(error = %e, "compiler trace failed, continuing without it");
            TraceRecords::default()
        }
    }
}

fn run_traced_compile(root: &Path) -> std::io::Result<String> {
    let sink = AdapterFiles::create(root, "tracer")?;
    let script = format!(
        r#"defmodule Lodestone.TraceSink do
  @events :lodestone_trace_events

  def start do
    :ets.new(@events, [:named_table, :public, :duplicate_bag])
  end

  def trace({{kind, meta, module, name, arity}}, env)
      when kind in [:remote_function, :remote_macro, :imported_function, :imported_macro] do
    case env.function do
      {{fun, fun_arity}} ->
        :ets.insert(@events, {{
          "call",
          inspect(env.module),
          Atom.to_string(fun),
          fun_arity,
          inspect(module),
          Atom.to_string(name),
          arity,
          env.file,
          Keyword.get(meta, :line, 0)
        }})

      _ ->
        :ok
    end

    :ok
  end

  def trace({{:struct_expansion, _meta, module, _keys}}, env) do
    :ets.insert(@events, {{"dep", inspect(env.module), inspect(module), "export"}})
    :ok
  end

  def trace({{:require, _meta, module, _opts}}, env) do
    :ets.insert(@events, {{"dep", inspect(env.module), inspect(module), "compile"}})
    :ok
  end

  def trace(_event, _env), do: :ok

  def dump(path) do
    lines =
      :ets.tab2list(@events)
      |> Enum.map(fn event ->
        event |> Tuple.to_list() |> Enum.map_join("\t", &to_string/1)
      end)

    File.write!(path, Enum.join(lines, "\n"))
  end
end

Lodestone.TraceSink.start()
Mix.Task.rerun("compile.elixir", ["--force", "--tracer", "Lodestone.TraceSink"])
Lodestone.TraceSink.dump({events_path})
"#,
        events_path = elixir_string(&sink.events_path.to_string_lossy()),
    );
    sink.run(root, &script)
}

fn parse_events(root: &Path, output: &str) -> TraceRecords {
    let mut records = TraceRecords::default();
    let mut seen_calls = std::collections::HashSet::new();
    let mut seen_deps = std::collections::HashSet::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            ["call", caller_mod, caller_fun, caller_arity, callee_mod, callee_name, callee_arity, file, line_no] =>
            {
                let Ok(line_no) = line_no.parse::<usize>() else {
                    continue;
                };
                // Line <= 1 means macro-generated; drop as noise.
                if line_no <= 1 {
                    continue;
                }
                let callee_mod = clean_module(callee_mod);
                if is_denylisted(&callee_mod) {
                    continue;
                }
                let caller_mod = clean_module(caller_mod);
                let file = relative_file(root, file);
                let callee = format!("{}.{}/{}", callee_mod, callee_name, callee_arity);
                if !seen_calls.insert((file.clone(), line_no, callee.clone())) {
                    continue;
                }
                records.calls.push(CallRef {
                    caller: format!("{}.{}/{}", caller_mod, caller_fun, caller_arity),
                    callee: Some(callee),
                    file,
                    line: line_no,
                });
            }
            ["dep", from, to, dep_type] => {
                let from = clean_module(from);
                let to = clean_module(to);
                if from == to || is_denylisted(&to) {
                    continue;
                }
                let dep_type = match *dep_type {
                    "export" => DepType::Export,
                    "runtime" => DepType::Runtime,
                    _ => DepType::Compile,
                };
                if !seen_deps.insert((from.clone(), to.clone(), dep_type)) {
                    continue;
                }
                records.deps.push(DepEdge {
                    from,
                    to,
                    dep_type,
                });
            }
            _ => {}
        }
    }

    records
        .calls
        .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    records.deps.sort();
    records
}

/// Strip `inspect/1` artifacts and the Erlang-style prefix from a module
/// name.
fn clean_module(raw: &str) -> String {
    raw.trim_matches('"')
        .trim_start_matches(':')
        .trim_start_matches("Elixir.")
        .to_string()
}

fn relative_file(root: &Path, file: &str) -> String {
    let path = Path::new(file);
    crate::discovery::normalize(root, path)
}

/// Escape a string into an Elixir double-quoted literal.
pub(crate) fn elixir_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '#' => out.push_str("\\#"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Script and event files for one adapter run. The unique id keeps
/// concurrent runs from colliding; both files are removed on drop.
pub(crate) struct AdapterFiles {
    pub script_path: PathBuf,
    pub events_path: PathBuf,
}

impl AdapterFiles {
    pub(crate) fn create(root: &Path, label: &str) -> std::io::Result<Self> {
        let cache = Store::new(root).ensure_cache_dir()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        Ok(Self {
            script_path: cache.join(format!("{}_{}.exs", label, id)),
            events_path: cache.join(format!("{}_events_{}.tsv", label, id)),
        })
    }

    /// Write the script, run it under `mix run`, and read the event file.
    pub(crate) fn run(&self, root: &Path, script: &str) -> std::io::Result<String> {
        std::fs::write(&self.script_path, script)?;

        let mut child = Command::new("mix")
            .arg("run")
            .arg("--no-compile")
            .arg("--no-start")
            .arg(&self.script_path)
            .current_dir(root)
            .env("MIX_ENV", "dev")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let status = wait_with_timeout(&mut child, COMPILE_TIMEOUT)?;
        if !status.success() {
            return Err(std::io::Error::other(format!(
                "adapter exited with {:?}",
                status.code()
            )));
        }
        std::fs::read_to_string(&self.events_path)
    }
}

impl Drop for AdapterFiles {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.script_path);
        let _ = std::fs::remove_file(&self.events_path);
    }
}

fn wait_with_timeout(
    child: &mut std::process::Child,
    timeout: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if std::time::Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::other("adapter timed out"));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_line(fields: &[&str]) -> String {
        fields.join("\t")
    }

    #[test]
    fn call_events_become_high_confidence_calls() {
        let root = Path::new("/project");
        let output = event_line(&[
            "call",
            "Elixir.App.Worker",
            "run",
            "1",
            "Elixir.App.Accounts",
            "get_user",
            "1",
            "/project/lib/app/worker.ex",
            "9",
        ]);
        let records = parse_events(root, &output);
        assert_eq!(records.calls.len(), 1);
        let call = &records.calls[0];
        assert_eq!(call.caller, "App.Worker.run/1");
        assert_eq!(call.callee.as_deref(), Some("App.Accounts.get_user/1"));
        assert_eq!(call.file, "lib/app/worker.ex");
        assert_eq!(call.line, 9);
    }

    #[test]
    fn macro_generated_lines_are_dropped() {
        let root = Path::new("/project");
        let output = event_line(&[
            "call",
            "Elixir.App.A",
            "f",
            "0",
            "Elixir.App.B",
            "g",
            "0",
            "/project/lib/a.ex",
            "1",
        ]);
        assert!(parse_events(root, &output).calls.is_empty());
    }

    #[test]
    fn denylisted_callees_are_dropped() {
        let root = Path::new("/project");
        let output = event_line(&[
            "call",
            "Elixir.App.A",
            "f",
            "0",
            "Elixir.Enum",
            "map",
            "2",
            "/project/lib/a.ex",
            "5",
        ]);
        assert!(parse_events(root, &output).calls.is_empty());
    }

    #[test]
    fn events_dedupe_by_call_site() {
        let root = Path::new("/project");
        let line = event_line(&[
            "call",
            "Elixir.App.A",
            "f",
            "0",
            "Elixir.App.B",
            "g",
            "0",
            "/project/lib/a.ex",
            "5",
        ]);
        let output = format!("{}\n{}", line, line);
        assert_eq!(parse_events(root, &output).calls.len(), 1);
    }

    #[test]
    fn dep_events_become_edges() {
        let root = Path::new("/project");
        let output = [
            event_line(&["dep", "Elixir.App.A", "Elixir.App.B", "compile"]),
            event_line(&["dep", "Elixir.App.A", "Elixir.App.B", "compile"]),
            event_line(&["dep", "Elixir.App.A", "Elixir.App.C", "export"]),
            event_line(&["dep", "Elixir.App.A", "Elixir.App.A", "compile"]),
        ]
        .join("\n");
        let records = parse_events(root, &output);
        assert_eq!(records.deps.len(), 2);
        assert_eq!(records.deps[0].to, "App.B");
        assert_eq!(records.deps[0].dep_type, DepType::Compile);
        assert_eq!(records.deps[1].dep_type, DepType::Export);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let root = Path::new("/project");
        let output = "garbage\ncall\tonly\tthree\n";
        let records = parse_events(root, &output);
        assert!(records.calls.is_empty());
        assert!(records.deps.is_empty());
    }

    #[test]
    fn elixir_strings_escape_interpolation() {
        assert_eq!(elixir_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(elixir_string("a#{b}"), "\"a\\#{b}\"");
        assert_eq!(elixir_string(r"C:\tmp"), r#""C:\\tmp""#);
    }

    #[test]
    fn missing_project_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = extract(dir.path());
        assert!(records.calls.is_empty());
        assert!(records.deps.is_empty());
    }
}
