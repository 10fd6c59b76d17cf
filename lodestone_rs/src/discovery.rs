//! Source-file discovery.
//!
//! Enumerates Elixir sources under a project root with a stable ordering,
//! so repeated runs visit files identically and the resulting index is
//! byte-for-byte reproducible.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Directories never descended into. `_build` and `deps` hold compiled and
/// vendored code the compiler-trace phase observes on its own terms.
const SKIP_DIRS: &[&str] = &["_build", "deps", ".git", ".elixir_ls", ".lodestone", "node_modules"];

/// Roots scanned inside the project, in priority order. Files directly in
/// the project root (e.g. `mix.exs`) are included as well.
const SOURCE_ROOTS: &[&str] = &["lib", "src", "web", "test", "config", "priv"];

fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ex") | Some("exs")
    )
}

fn skip_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name) || name.starts_with('.'))
}

/// Enumerate source files under `root`, sorted by their normalized
/// relative path.
pub fn discover(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && is_source_file(entry.path()) {
            files.push(entry.into_path());
        }
    }

    for sub in SOURCE_ROOTS {
        let dir = root.join(sub);
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir)
            .into_iter()
            .filter_entry(|e| !skip_dir(e))
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && is_source_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort_by_key(|p| normalize(root, p));
    files.dedup();
    files
}

/// Project-relative path with forward slashes, used as the canonical file
/// identity in records and the manifest.
pub fn normalize(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_sources_in_stable_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib/app")).unwrap();
        fs::create_dir_all(root.join("test")).unwrap();
        fs::create_dir_all(root.join("_build/dev")).unwrap();
        fs::write(root.join("mix.exs"), "defmodule P do\nend").unwrap();
        fs::write(root.join("lib/app/b.ex"), "").unwrap();
        fs::write(root.join("lib/app/a.ex"), "").unwrap();
        fs::write(root.join("test/a_test.exs"), "").unwrap();
        fs::write(root.join("_build/dev/generated.ex"), "").unwrap();
        fs::write(root.join("lib/app/readme.md"), "").unwrap();

        let found: Vec<String> = discover(root)
            .iter()
            .map(|p| normalize(root, p))
            .collect();
        assert_eq!(
            found,
            vec![
                "lib/app/a.ex",
                "lib/app/b.ex",
                "mix.exs",
                "test/a_test.exs",
            ]
        );
    }

    #[test]
    fn repeated_discovery_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        for name in ["z.ex", "m.ex", "a.ex"] {
            fs::write(root.join("lib").join(name), "").unwrap();
        }
        assert_eq!(discover(root), discover(root));
    }
}
