//! Compiled marker probes shared by the DSL extraction passes.
//!
//! Cheap content checks that decide whether a file is worth parsing for a
//! given pass; kept in one place so the patterns stay in sync with what
//! the walkers actually recognize.

use std::sync::OnceLock;

use regex::Regex;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex literal")
}

/// Router files: `use Phoenix.Router` directly or through a web-module
/// macro (`use AppWeb, :router`).
pub(crate) fn regex_router_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r#"Phoenix\.Router|use\s+\w[\w.]*\s*,\s*:router\b"#))
}

/// Schema files: the schema macro, an embedded schema, or the use-ORM
/// directive.
pub(crate) fn regex_schema_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r#"Ecto\.Schema|\bembedded_schema\b|\bschema\s+""#))
}
