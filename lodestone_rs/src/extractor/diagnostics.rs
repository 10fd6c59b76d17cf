//! Diagnostic extraction pass.
//!
//! Runs a compilation wrapped in a diagnostic-capturing scope and collects
//! severity/message/location tuples. The pass is capability-gated: on
//! compiler versions without diagnostic capture the adapter exits cleanly
//! with no events.

use std::path::Path;

use tracing::{debug, warn};

use crate::records::{Diagnostic, Severity};

use super::tracer::{elixir_string, AdapterFiles};

/// Run the diagnostic compile for the project at `root`. Any failure
/// yields an empty contribution.
pub fn extract(root: &Path) -> Vec<Diagnostic> {
    if !root.join("mix.exs").is_file() {
        debug!("no mix.exs, skipping diagnostics");
        return Vec::new();
    }
    match run_diagnostic_compile(root) {
        Ok(output) => parse_diagnostics(root, &output),
        Err(e) => {
            warn!(error = %e, "diagnostic compile failed, continuing without it");
            Vec::new()
        }
    }
}

fn run_diagnostic_compile(root: &Path) -> std::io::Result<String> {
    let files = AdapterFiles::create(root, "diagnostics")?;
    let script = format!(
        r#"lines =
  if Version.match?(System.version(), ">= 1.15.0") do
    {{_status, diagnostics}} = Mix.Task.rerun("compile", ["--force", "--return-errors"])

    for %{{severity: severity, message: message, file: file, position: position}} <- diagnostics do
      line =
        case position do
          {{line, _col}} -> line
          line when is_integer(line) -> line
          _ -> 0
        end

      message = message |> String.replace(["\t", "\n", "\r"], " ")
      Enum.join([Atom.to_string(severity), to_string(file), Integer.to_string(line), message], "\t")
    end
  else
    []
  end

File.write!({events_path}, Enum.join(lines, "\n"))
"#,
        events_path = elixir_string(&files.events_path.to_string_lossy()),
    );
    files.run(root, &script)
}

fn parse_diagnostics(root: &Path, output: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for line in output.lines() {
        let mut fields = line.splitn(4, '\t');
        let (Some(severity), Some(file), Some(line_no), Some(message)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            continue;
        };
        let severity = match severity {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            "hint" => Severity::Hint,
            "information" | "info" => Severity::Info,
            _ => continue,
        };
        let Ok(line_no) = line_no.parse::<usize>() else {
            continue;
        };
        diagnostics.push(Diagnostic {
            severity,
            message: message.to_string(),
            file: crate::discovery::normalize(root, Path::new(file)),
            line: line_no,
            source_tag: Some("compiler".to_string()),
        });
    }
    diagnostics.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_severity_file_line_message() {
        let root = Path::new("/project");
        let output = "warning\t/project/lib/app.ex\t14\tvariable \"x\" is unused\nerror\t/project/lib/bad.ex\t3\tundefined function frob/0";
        let diags = parse_diagnostics(root, output);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].file, "lib/app.ex");
        assert_eq!(diags[0].line, 14);
        assert_eq!(diags[1].severity, Severity::Error);
        assert!(diags[1].message.contains("frob/0"));
    }

    #[test]
    fn unknown_severities_and_garbage_are_skipped() {
        let root = Path::new("/project");
        let output = "fatal\tlib/a.ex\t1\tboom\nnot a diagnostic\n";
        assert!(parse_diagnostics(root, output).is_empty());
    }

    #[test]
    fn messages_keep_embedded_tabs_via_splitn() {
        let root = Path::new("/project");
        let output = "hint\tlib/a.ex\t2\tconsider  this: a\tb";
        let diags = parse_diagnostics(root, output);
        assert_eq!(diags[0].message, "consider  this: a\tb");
    }

    #[test]
    fn missing_project_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract(dir.path()).is_empty());
    }
}
