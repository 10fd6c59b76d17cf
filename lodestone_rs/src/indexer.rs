//! Index orchestration.
//!
//! Ties the phases together: discovery, extraction phases 1-7, the merge
//! layer, the store, and the manifest. Also implements the pull-driven
//! incremental refresh: fingerprint diff, record removal, partial
//! re-extraction, atomic rewrite.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::changes::{self, ChangeSet};
use crate::discovery;
use crate::error::Result;
use crate::extractor::{diagnostics, is_denylisted, merge, routes, schema, syntactic, tracer, typespec};
use crate::records::{
    Confidence, DepEdge, DepType, Record, RecordData, RecordKind, Source,
};
use crate::store::{HostInfo, Manifest, Store};

/// Options for an index run.
#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// Run the compiler-backed phases (trace, xref, diagnostics). Disabled
    /// for pure-syntactic runs and in tests.
    pub compile: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { compile: true }
    }
}

/// Summary of a completed index run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub records_indexed: usize,
    pub files_indexed: usize,
    pub duration_ms: u64,
    /// Record count per kind, for the human summary.
    pub counts: BTreeMap<String, usize>,
}

/// What `ensure_index_current` had to do.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Index exists and every file fingerprint matches.
    Current,
    /// Changed and affected files were re-extracted in place.
    Refreshed { files_reindexed: usize },
    /// No index, or an incompatible schema version: full rebuild.
    Rebuilt { records_indexed: usize },
}

/// Run a full index of the project at `root`.
pub fn run_index(root: &Path, opts: &IndexOptions) -> Result<IndexOutcome> {
    let started = Instant::now();
    let store = Store::new(root);
    let files = discovery::discover(root);
    info!(files = files.len(), "indexing {}", root.display());

    let records = extract_all(root, &files, opts, None);
    let merged = merge::merge(records);
    store.write_records(&merged)?;

    let manifest = build_manifest(root, &files, &merged, detect_host(opts))?;
    store.write_manifest(&manifest)?;

    Ok(outcome(&merged, files.len(), started))
}

/// Bring the index up to date, rebuilding or refreshing only when needed.
pub fn ensure_index_current(root: &Path, opts: &IndexOptions) -> Result<RefreshOutcome> {
    let store = Store::new(root);
    if !store.index_exists() || !store.schema_compatible() {
        let outcome = run_index(root, opts)?;
        return Ok(RefreshOutcome::Rebuilt {
            records_indexed: outcome.records_indexed,
        });
    }

    let manifest = store.read_manifest()?;
    let files = discovery::discover(root);
    let change_set = changes::detect(root, &files, &manifest);
    if change_set.is_empty() {
        debug!("index is current");
        return Ok(RefreshOutcome::Current);
    }
    let reindexed = refresh(root, &store, &manifest, &files, &change_set, opts)?;
    Ok(RefreshOutcome::Refreshed {
        files_reindexed: reindexed,
    })
}

/// Incremental refresh: drop records for changed files, re-extract the
/// file-scoped phases for them, rewrite the store and manifest.
fn refresh(
    root: &Path,
    store: &Store,
    manifest: &Manifest,
    files: &[PathBuf],
    change_set: &ChangeSet,
    opts: &IndexOptions,
) -> Result<usize> {
    let to_remove: HashSet<String> = change_set.files_to_remove().into_iter().collect();
    info!(
        added = change_set.added.len(),
        modified = change_set.modified.len(),
        deleted = change_set.deleted.len(),
        affected = change_set.affected.len(),
        "refreshing index"
    );

    let mut remainder = store.remove_records_for_files(&to_remove)?;

    // Dependency edges carry no file; drop the ones originating from the
    // modules of removed files so the re-run cannot double them.
    let removed_modules: HashSet<String> = to_remove
        .iter()
        .filter_map(|file| manifest.files.get(file))
        .flat_map(|state| state.modules.iter().cloned())
        .collect();
    remainder.retain(|record| match &record.data {
        RecordData::Dep(dep) => !removed_modules.contains(&dep.from),
        _ => true,
    });

    let reindex_paths: Vec<PathBuf> = change_set
        .files_to_reindex()
        .into_iter()
        .map(|rel| root.join(rel))
        .filter(|path| path.is_file())
        .collect();

    let mut records = remainder;
    records.extend(extract_all(root, &reindex_paths, opts, Some(manifest)));
    let merged = merge::merge(records);
    store.rewrite_records(&merged)?;

    let host = manifest.host.clone();
    let new_manifest = build_manifest(root, files, &merged, host)?;
    store.write_manifest(&new_manifest)?;
    Ok(reindex_paths.len())
}

/// Run the extraction phases over `files` and envelope the results.
/// During a refresh (`prior` set) the compiler-backed trace and diagnostic
/// phases are skipped; only the cheap xref pass re-runs globally.
fn extract_all(
    root: &Path,
    files: &[PathBuf],
    opts: &IndexOptions,
    prior: Option<&Manifest>,
) -> Vec<Record> {
    let syn = syntactic::extract(root, files);
    let route_records = routes::extract(root, files);
    let schema_records = schema::extract(root, files);
    let type_records = typespec::extract(root, files);

    let mut records: Vec<Record> = Vec::new();
    let mut module_files: BTreeMap<String, String> = match prior {
        Some(manifest) => manifest.modules.clone(),
        None => BTreeMap::new(),
    };
    for module in &syn.modules {
        module_files.insert(module.module.clone(), module.file.clone());
    }

    for module in syn.modules {
        records.push(Record::syntactic(RecordData::Module(module)));
    }
    for function in syn.functions {
        records.push(Record::syntactic(RecordData::Function(function)));
    }
    // Directives double as compile-time dependency edges; the compiler
    // phases refine them when they run.
    let mut directive_deps: Vec<Record> = Vec::new();
    for directive in syn.directives {
        if directive.module != directive.target && !is_denylisted(&directive.target) {
            directive_deps.push(Record::new(
                RecordData::Dep(DepEdge {
                    from: directive.module.clone(),
                    to: directive.target.clone(),
                    dep_type: DepType::Compile,
                }),
                Source::Syntactic,
                Confidence::Medium,
            ));
        }
        records.push(Record::syntactic(RecordData::Directive(directive)));
    }
    for struct_def in syn.structs {
        records.push(Record::syntactic(RecordData::Struct(struct_def)));
    }
    for route in route_records {
        records.push(Record::syntactic(RecordData::Route(route)));
    }
    for schema_record in schema_records {
        records.push(Record::syntactic(RecordData::Schema(schema_record)));
    }
    for spec in type_records.specs {
        records.push(Record::syntactic(RecordData::Spec(spec)));
    }
    for type_def in type_records.types {
        records.push(Record::syntactic(RecordData::Type(type_def)));
    }

    for call in syn.calls {
        let confidence = if call.callee.is_some() {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        records.push(Record::new(
            RecordData::Call(call),
            Source::Syntactic,
            confidence,
        ));
    }
    records.extend(directive_deps);

    if opts.compile {
        let xref_records = crate::extractor::xref::extract(root, &module_files);
        for dep in xref_records.deps {
            records.push(Record::new(
                RecordData::Dep(dep),
                Source::Xref,
                Confidence::High,
            ));
        }
        // Trace and diagnostics only run on full builds; both need a
        // whole-project compile to be meaningful.
        if prior.is_none() {
            let trace = tracer::extract(root);
            for call in trace.calls {
                records.push(Record::new(
                    RecordData::Call(call),
                    Source::Compiler,
                    Confidence::High,
                ));
            }
            for dep in trace.deps {
                records.push(Record::new(
                    RecordData::Dep(dep),
                    Source::Compiler,
                    Confidence::High,
                ));
            }
            for diagnostic in diagnostics::extract(root) {
                records.push(Record::new(
                    RecordData::Diagnostic(diagnostic),
                    Source::Compiler,
                    Confidence::High,
                ));
            }
        }
    }
    records
}

/// Build the manifest from the final record set: per-file states, the
/// module->file map, and the module->dependents map.
fn build_manifest(
    root: &Path,
    files: &[PathBuf],
    records: &[Record],
    host: HostInfo,
) -> Result<Manifest> {
    let mut manifest = Manifest::new(root);
    manifest.host = host;
    if let Ok(canonical) = root.canonicalize() {
        manifest.project_root = canonical.to_string_lossy().into_owned();
    }

    let mut file_modules: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        match &record.data {
            RecordData::Module(m) => {
                manifest.modules.insert(m.module.clone(), m.file.clone());
                file_modules
                    .entry(m.file.clone())
                    .or_default()
                    .push(m.module.clone());
            }
            RecordData::Dep(d) => {
                let dependents = manifest.dependents.entry(d.to.clone()).or_default();
                if !dependents.contains(&d.from) {
                    dependents.push(d.from.clone());
                }
            }
            _ => {}
        }
    }
    for dependents in manifest.dependents.values_mut() {
        dependents.sort();
    }

    for path in files {
        let rel = discovery::normalize(root, path);
        let modules = file_modules.get(&rel).cloned().unwrap_or_default();
        match changes::file_state(root, path, modules) {
            Ok(state) => {
                manifest.files.insert(rel, state);
            }
            Err(e) => {
                debug!(file = %rel, error = %e, "skipping file state");
            }
        }
    }

    manifest.record_count = records.len();
    manifest.file_count = manifest.files.len();
    Ok(manifest)
}

fn outcome(records: &[Record], files: usize, started: Instant) -> IndexOutcome {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for kind in RecordKind::ALL {
        counts.insert(kind.as_str().to_string(), 0);
    }
    for record in records {
        *counts.entry(record.kind().as_str().to_string()).or_default() += 1;
    }
    IndexOutcome {
        records_indexed: records.len(),
        files_indexed: files,
        duration_ms: started.elapsed().as_millis() as u64,
        counts,
    }
}

/// Probe the host toolchain (`elixir --version`) for manifest metadata.
fn detect_host(opts: &IndexOptions) -> HostInfo {
    let mut host = HostInfo {
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        elixir: None,
        otp: None,
    };
    if !opts.compile {
        return host;
    }
    if let Ok(output) = Command::new("elixir").arg("--version").output() {
        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("Elixir ") {
                host.elixir = rest.split_whitespace().next().map(String::from);
                if let Some(otp) = rest.split("Erlang/OTP ").nth(1) {
                    host.otp = otp.split(')').next().map(String::from);
                }
            } else if let Some(rest) = line.strip_prefix("Erlang/OTP ") {
                host.otp = Some(rest.split_whitespace().next().unwrap_or("").to_string());
            }
        }
    }
    host
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NO_COMPILE: IndexOptions = IndexOptions { compile: false };

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::create_dir_all(root.join("test")).unwrap();
        fs::write(
            root.join("lib/accounts.ex"),
            "defmodule Accounts do\n  def get_user(id) do\n    Repo.get(id)\n  end\nend",
        )
        .unwrap();
        fs::write(
            root.join("lib/user_controller.ex"),
            "defmodule UserController do\n  alias Accounts\n  def show(id) do\n    Accounts.get_user(id)\n  end\nend",
        )
        .unwrap();
        fs::write(
            root.join("test/accounts_test.exs"),
            "defmodule AccountsTest do\n  alias Accounts\n  def run, do: Accounts.get_user(1)\nend",
        )
        .unwrap();
        dir
    }

    #[test]
    fn full_index_writes_store_and_manifest() {
        let dir = fixture();
        let outcome = run_index(dir.path(), &NO_COMPILE).unwrap();
        assert!(outcome.records_indexed > 0);
        assert_eq!(outcome.files_indexed, 3);

        let store = Store::new(dir.path());
        assert!(store.index_exists());
        let manifest = store.read_manifest().unwrap();
        assert_eq!(manifest.file_count, 3);
        assert_eq!(manifest.record_count, outcome.records_indexed);
        assert_eq!(
            manifest.modules.get("Accounts"),
            Some(&"lib/accounts.ex".to_string())
        );
        // UserController aliases Accounts, so it is a dependent.
        assert!(manifest.dependents["Accounts"].contains(&"UserController".to_string()));
    }

    #[test]
    fn indexing_twice_is_byte_identical() {
        let dir = fixture();
        run_index(dir.path(), &NO_COMPILE).unwrap();
        let store = Store::new(dir.path());
        let first = fs::read(store.index_path()).unwrap();
        run_index(dir.path(), &NO_COMPILE).unwrap();
        let second = fs::read(store.index_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_current_reports_current_without_changes() {
        let dir = fixture();
        let rebuilt = ensure_index_current(dir.path(), &NO_COMPILE).unwrap();
        assert!(matches!(rebuilt, RefreshOutcome::Rebuilt { .. }));
        let current = ensure_index_current(dir.path(), &NO_COMPILE).unwrap();
        assert_eq!(current, RefreshOutcome::Current);

        // Same record_count after a no-op ensure.
        let store = Store::new(dir.path());
        let manifest = store.read_manifest().unwrap();
        let count = store.stream_records().unwrap().count();
        assert_eq!(manifest.record_count, count);
    }

    #[test]
    fn modifying_a_file_triggers_a_refresh() {
        let dir = fixture();
        run_index(dir.path(), &NO_COMPILE).unwrap();
        fs::write(
            dir.path().join("lib/accounts.ex"),
            "defmodule Accounts do\n  def get_user(id) do\n    Repo.get!(id)\n  end\n  def list, do: []\nend",
        )
        .unwrap();
        let outcome = ensure_index_current(dir.path(), &NO_COMPILE).unwrap();
        // accounts.ex changed; user_controller.ex and accounts_test.exs
        // both depend on Accounts.
        assert_eq!(outcome, RefreshOutcome::Refreshed { files_reindexed: 3 });

        let store = Store::new(dir.path());
        let functions: Vec<String> = store
            .stream_records()
            .unwrap()
            .filter_map(|r| match r.data {
                RecordData::Function(f) => Some(f.mfa()),
                _ => None,
            })
            .collect();
        assert!(functions.contains(&"Accounts.list/0".to_string()));
        assert!(functions.contains(&"UserController.show/1".to_string()));
    }

    #[test]
    fn deleting_a_file_removes_its_records() {
        let dir = fixture();
        run_index(dir.path(), &NO_COMPILE).unwrap();
        fs::remove_file(dir.path().join("lib/user_controller.ex")).unwrap();
        let outcome = ensure_index_current(dir.path(), &NO_COMPILE).unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { .. }));

        let store = Store::new(dir.path());
        assert!(!store
            .stream_records()
            .unwrap()
            .any(|r| r.file() == Some("lib/user_controller.ex")));
        let manifest = store.read_manifest().unwrap();
        assert!(!manifest.files.contains_key("lib/user_controller.ex"));
        assert!(!manifest.modules.contains_key("UserController"));
    }

    #[test]
    fn schema_mismatch_triggers_full_rebuild() {
        let dir = fixture();
        run_index(dir.path(), &NO_COMPILE).unwrap();
        let store = Store::new(dir.path());
        let mut manifest = store.read_manifest().unwrap();
        manifest.schema_version = "0.0".into();
        store.write_manifest(&manifest).unwrap();

        let outcome = ensure_index_current(dir.path(), &NO_COMPILE).unwrap();
        assert!(matches!(outcome, RefreshOutcome::Rebuilt { .. }));
        assert!(store.schema_compatible());
    }

    #[test]
    fn unchanged_file_records_survive_refresh_bit_identical() {
        let dir = fixture();
        run_index(dir.path(), &NO_COMPILE).unwrap();
        let store = Store::new(dir.path());
        let before = store.read_manifest().unwrap();

        fs::write(dir.path().join("lib/extra.ex"), "defmodule Extra do\nend").unwrap();
        ensure_index_current(dir.path(), &NO_COMPILE).unwrap();

        let after = store.read_manifest().unwrap();
        // accounts.ex was untouched: its state must be bit-identical.
        assert_eq!(before.files["lib/accounts.ex"], after.files["lib/accounts.ex"]);
        assert!(after.files.contains_key("lib/extra.ex"));
    }
}
