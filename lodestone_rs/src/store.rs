//! Persistent record store.
//!
//! On-disk layout under the project root:
//!
//! ```text
//! .lodestone/
//!   manifest.json   - schema version, file states, module maps, counts
//!   index.jsonl     - one record envelope per line
//!   cache/          - extractor-owned scratch (adapter scripts, events)
//! ```
//!
//! Single writer per project root; readers stream from disk. Rewrites are
//! atomic at file granularity (write to a temp path, rename over).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Error, Result};
use crate::records::{FileState, Record};

/// Hidden directory holding all index artifacts.
pub const STORE_DIR: &str = ".lodestone";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const INDEX_FILE: &str = "index.jsonl";

/// Current manifest schema version: major.minor of the crate version.
/// Patch releases never change the on-disk schema.
pub fn schema_version() -> &'static str {
    schema_major_minor(env!("CARGO_PKG_VERSION"))
}

/// Extract major.minor from a semver string (e.g. "0.3.1" -> "0.3").
fn schema_major_minor(version: &str) -> &str {
    match version
        .find('.')
        .and_then(|i| version[i + 1..].find('.').map(|j| i + 1 + j))
    {
        Some(pos) => &version[..pos],
        None => version,
    }
}

/// Host toolchain metadata captured at index time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub tool_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elixir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// Index metadata: everything needed to decide whether and what to
/// re-extract.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub host: HostInfo,
    /// Absolute project root the index was built for.
    #[serde(default)]
    pub project_root: String,
    /// Per-file state keyed by normalized relative path.
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
    /// Module -> defining file.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    /// Module -> modules that depend on it.
    #[serde(default)]
    pub dependents: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub record_count: usize,
    #[serde(default)]
    pub file_count: usize,
    /// ISO-8601 generation timestamp.
    #[serde(default)]
    pub generated_at: String,
}

impl Manifest {
    pub fn new(project_root: &Path) -> Self {
        let generated_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Iso8601::DEFAULT)
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            schema_version: schema_version().to_string(),
            host: HostInfo {
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                elixir: None,
                otp: None,
            },
            project_root: project_root.to_string_lossy().into_owned(),
            generated_at,
            ..Self::default()
        }
    }
}

/// 128-bit content fingerprint: SHA-256 truncated to 16 bytes, hex.
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Handle to one project's store.
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir().join(MANIFEST_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir().join(INDEX_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir().join("cache")
    }

    pub fn ensure_cache_dir(&self) -> io::Result<PathBuf> {
        let dir = self.cache_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Both index files present.
    pub fn index_exists(&self) -> bool {
        self.manifest_path().is_file() && self.index_path().is_file()
    }

    /// Truncate-and-rewrite the record file atomically.
    pub fn write_records(&self, records: &[Record]) -> Result<()> {
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        self.publish(&self.index_path(), body.as_bytes())
    }

    /// Atomic rewrite of the full record set.
    pub fn rewrite_records(&self, records: &[Record]) -> Result<()> {
        self.write_records(records)
    }

    /// Line-append without rewriting.
    pub fn append_records(&self, records: &[Record]) -> Result<()> {
        let path = self.index_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{}", line).map_err(|e| Error::io(&path, e))?;
        }
        Ok(())
    }

    /// Lazy line-by-line read. Malformed lines are skipped with a warning
    /// rather than aborting the stream.
    pub fn stream_records(&self) -> Result<impl Iterator<Item = Record>> {
        let path = self.index_path();
        let file = fs::File::open(&path).map_err(|e| Error::io(&path, e))?;
        let reader = BufReader::new(file);
        Ok(reader.lines().filter_map(move |line| {
            let line = line.ok()?;
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str(&line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping malformed index line");
                    None
                }
            }
        }))
    }

    /// Stream the index and drop every record originating from one of
    /// `files` (normalized relative paths). Returns the remainder.
    pub fn remove_records_for_files(&self, files: &HashSet<String>) -> Result<Vec<Record>> {
        Ok(self
            .stream_records()?
            .filter(|record| match record.file() {
                Some(file) => !files.contains(file),
                None => true,
            })
            .collect())
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        self.publish(&self.manifest_path(), json.as_bytes())
    }

    pub fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Compare the stored schema version against the current one. An
    /// unreadable manifest counts as incompatible (full rebuild).
    pub fn schema_compatible(&self) -> bool {
        match self.read_manifest() {
            Ok(manifest) => manifest.schema_version == schema_version(),
            Err(_) => false,
        }
    }

    /// Remove the whole hidden directory.
    pub fn clear(&self) -> Result<()> {
        let dir = self.dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }

    /// Publish `contents` at a path inside the store directory: stage the
    /// bytes in a sibling temp file, then rename over the destination so
    /// readers never observe a partial file. Staging must happen inside
    /// the store directory itself, or the final rename crosses
    /// filesystems and stops being atomic.
    fn publish(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let mut staged =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;
        staged
            .write_all(contents)
            .and_then(|()| staged.flush())
            .map_err(|e| Error::io(path, e))?;
        match staged.persist(path) {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::io(path, e.error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{
        CallRef, Confidence, FunctionDef, ModuleDef, RecordData, Source, Visibility,
    };

    fn sample_records() -> Vec<Record> {
        vec![
            Record::syntactic(RecordData::Module(ModuleDef {
                module: "App.A".into(),
                file: "lib/a.ex".into(),
                line: 1,
                end_line: 5,
                behaviours: vec![],
            })),
            Record::syntactic(RecordData::Function(FunctionDef {
                module: "App.A".into(),
                name: "go".into(),
                arity: 0,
                visibility: Visibility::Public,
                is_macro: false,
                file: "lib/a.ex".into(),
                line: 2,
                end_line: 4,
            })),
            Record::new(
                RecordData::Call(CallRef {
                    caller: "App.A.go/0".into(),
                    callee: Some("App.B.run/1".into()),
                    file: "lib/a.ex".into(),
                    line: 3,
                }),
                Source::Compiler,
                Confidence::High,
            ),
        ]
    }

    #[test]
    fn write_then_stream_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let records = sample_records();
        store.write_records(&records).unwrap();
        let back: Vec<Record> = store.stream_records().unwrap().collect();
        assert_eq!(back, records);
    }

    #[test]
    fn append_extends_the_line_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let records = sample_records();
        store.write_records(&records[..1]).unwrap();
        store.append_records(&records[1..]).unwrap();
        let back: Vec<Record> = store.stream_records().unwrap().collect();
        assert_eq!(back, records);
    }

    #[test]
    fn rewrite_is_byte_identical_for_identical_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let records = sample_records();
        store.write_records(&records).unwrap();
        let first = fs::read(store.index_path()).unwrap();
        store.rewrite_records(&records).unwrap();
        let second = fs::read(store.index_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn remove_records_for_files_filters_by_origin() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_records(&sample_records()).unwrap();
        let mut gone = HashSet::new();
        gone.insert("lib/a.ex".to_string());
        let remainder = store.remove_records_for_files(&gone).unwrap();
        assert!(remainder.is_empty());

        let none: HashSet<String> = HashSet::new();
        let remainder = store.remove_records_for_files(&none).unwrap();
        assert_eq!(remainder.len(), 3);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_records(&sample_records()).unwrap();
        let mut content = fs::read_to_string(store.index_path()).unwrap();
        content.push_str("{not json\n");
        fs::write(store.index_path(), content).unwrap();
        assert_eq!(store.stream_records().unwrap().count(), 3);
    }

    #[test]
    fn manifest_round_trips_modulo_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut manifest = Manifest::new(dir.path());
        manifest.record_count = 42;
        manifest.file_count = 7;
        manifest
            .modules
            .insert("App.A".into(), "lib/a.ex".into());
        manifest
            .dependents
            .insert("App.A".into(), vec!["App.B".into()]);
        manifest.files.insert(
            "lib/a.ex".into(),
            FileState {
                path: "lib/a.ex".into(),
                mtime: 1_700_000_000,
                size: 120,
                digest: fingerprint(b"defmodule App.A do end"),
                modules: vec!["App.A".into()],
            },
        );
        store.write_manifest(&manifest).unwrap();
        let back = store.read_manifest().unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn schema_compatibility_detects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut manifest = Manifest::new(dir.path());
        store.write_manifest(&manifest).unwrap();
        assert!(store.schema_compatible());

        manifest.schema_version = "0.0".to_string();
        store.write_manifest(&manifest).unwrap();
        assert!(!store.schema_compatible());
    }

    #[test]
    fn index_exists_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(!store.index_exists());
        store.write_records(&sample_records()).unwrap();
        assert!(!store.index_exists());
        store.write_manifest(&Manifest::new(dir.path())).unwrap();
        assert!(store.index_exists());
    }

    #[test]
    fn clear_removes_the_hidden_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_records(&sample_records()).unwrap();
        assert!(store.dir().exists());
        store.clear().unwrap();
        assert!(!store.dir().exists());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn fingerprints_are_128_bit_hex() {
        let digest = fingerprint(b"hello");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(fingerprint(b"hello"), fingerprint(b"hello "));
    }

    #[test]
    fn schema_version_is_major_minor() {
        assert_eq!(schema_major_minor("0.3.1"), "0.3");
        assert_eq!(schema_major_minor("1.12"), "1.12");
    }
}
