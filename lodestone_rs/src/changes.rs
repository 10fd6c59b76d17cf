//! Change detection for incremental re-indexing.
//!
//! Compares the current file enumeration against the manifest's per-file
//! states. A (mtime, size) mismatch is only a hint; the file counts as
//! modified when the content fingerprint actually differs. Files whose
//! modules transitively depend on a changed module become `affected`.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::discovery::normalize;
use crate::records::FileState;
use crate::store::{fingerprint, Manifest};

/// Result of a fingerprint diff against the stored manifest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Unchanged files whose modules depend on a changed module.
    pub affected: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.affected.is_empty()
    }

    /// Files whose records must be (re)extracted.
    pub fn files_to_reindex(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.affected)
            .cloned()
            .collect()
    }

    /// Files whose existing records must be removed from the store.
    pub fn files_to_remove(&self) -> BTreeSet<String> {
        self.modified
            .iter()
            .chain(&self.deleted)
            .chain(&self.affected)
            .cloned()
            .collect()
    }
}

/// Capture the current state of a file for the manifest.
pub fn file_state(root: &Path, path: &Path, modules: Vec<String>) -> std::io::Result<FileState> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let content = std::fs::read(path)?;
    Ok(FileState {
        path: normalize(root, path),
        mtime,
        size: meta.len(),
        digest: fingerprint(&content),
        modules,
    })
}

/// Diff the current enumeration against the stored manifest.
pub fn detect(root: &Path, current: &[PathBuf], manifest: &Manifest) -> ChangeSet {
    let mut set = ChangeSet::default();

    let current_by_rel: Vec<(String, &PathBuf)> = current
        .iter()
        .map(|path| (normalize(root, path), path))
        .collect();
    let current_set: HashSet<&str> = current_by_rel.iter().map(|(rel, _)| rel.as_str()).collect();

    for (rel, path) in &current_by_rel {
        match manifest.files.get(rel) {
            None => set.added.push(rel.clone()),
            Some(stored) => {
                if is_modified(path, stored) {
                    set.modified.push(rel.clone());
                }
            }
        }
    }
    for rel in manifest.files.keys() {
        if !current_set.contains(rel.as_str()) {
            set.deleted.push(rel.clone());
        }
    }

    // Transitive dependent closure: modules declared by changed files seed
    // a BFS over the dependents map; resulting modules translate back to
    // files, minus anything already changed or new.
    let mut seeds: VecDeque<String> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    for rel in set.modified.iter().chain(&set.deleted) {
        if let Some(state) = manifest.files.get(rel) {
            for module in &state.modules {
                if visited.insert(module.clone()) {
                    seeds.push_back(module.clone());
                }
            }
        }
    }
    while let Some(module) = seeds.pop_front() {
        if let Some(dependents) = manifest.dependents.get(&module) {
            for dependent in dependents {
                if visited.insert(dependent.clone()) {
                    seeds.push_back(dependent.clone());
                }
            }
        }
    }

    let excluded: HashSet<&str> = set
        .modified
        .iter()
        .chain(&set.deleted)
        .chain(&set.added)
        .map(String::as_str)
        .collect();
    let mut affected: BTreeSet<String> = BTreeSet::new();
    for module in &visited {
        if let Some(file) = manifest.modules.get(module) {
            if !excluded.contains(file.as_str()) && current_set.contains(file.as_str()) {
                affected.insert(file.clone());
            }
        }
    }
    set.affected = affected.into_iter().collect();

    set.added.sort();
    set.modified.sort();
    set.deleted.sort();
    set
}

/// (mtime, size) differ AND the content hash confirms a real change.
fn is_modified(path: &Path, stored: &FileState) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return true;
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if mtime == stored.mtime && meta.len() == stored.size {
        return false;
    }
    match std::fs::read(path) {
        Ok(content) => fingerprint(&content) != stored.digest,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manifest_for(root: &Path, files: &[(&str, &[&str])]) -> Manifest {
        let mut manifest = Manifest::new(root);
        for (rel, modules) in files {
            let path = root.join(rel);
            let state = file_state(
                root,
                &path,
                modules.iter().map(|m| m.to_string()).collect(),
            )
            .unwrap();
            for module in *modules {
                manifest.modules.insert(module.to_string(), rel.to_string());
            }
            manifest.files.insert(rel.to_string(), state);
        }
        manifest
    }

    fn setup() -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/a.ex"), "defmodule A do\nend").unwrap();
        fs::write(root.join("lib/b.ex"), "defmodule B do\nend").unwrap();
        let files = vec![root.join("lib/a.ex"), root.join("lib/b.ex")];
        (dir, files)
    }

    #[test]
    fn unchanged_files_are_unmodified() {
        let (dir, files) = setup();
        let manifest = manifest_for(dir.path(), &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"])]);
        let set = detect(dir.path(), &files, &manifest);
        assert!(set.is_empty(), "{:?}", set);
    }

    #[test]
    fn touched_but_identical_content_is_not_modified() {
        let (dir, files) = setup();
        let manifest = manifest_for(dir.path(), &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"])]);
        // Rewrite identical bytes; mtime may change but the hash agrees.
        let content = fs::read(dir.path().join("lib/a.ex")).unwrap();
        fs::write(dir.path().join("lib/a.ex"), &content).unwrap();
        let set = detect(dir.path(), &files, &manifest);
        assert!(set.modified.is_empty());
    }

    #[test]
    fn content_change_is_detected_via_hash() {
        let (dir, files) = setup();
        let manifest = manifest_for(dir.path(), &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"])]);
        fs::write(dir.path().join("lib/a.ex"), "defmodule A do\n  def x, do: 1\nend").unwrap();
        let set = detect(dir.path(), &files, &manifest);
        assert_eq!(set.modified, vec!["lib/a.ex"]);
    }

    #[test]
    fn added_and_deleted_files_are_classified() {
        let (dir, mut files) = setup();
        let manifest = manifest_for(dir.path(), &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"])]);
        fs::write(dir.path().join("lib/c.ex"), "defmodule C do\nend").unwrap();
        files.push(dir.path().join("lib/c.ex"));
        files.retain(|p| !p.ends_with("lib/b.ex"));
        let set = detect(dir.path(), &files, &manifest);
        assert_eq!(set.added, vec!["lib/c.ex"]);
        assert_eq!(set.deleted, vec!["lib/b.ex"]);
    }

    #[test]
    fn dependents_of_changed_modules_are_affected() {
        let (dir, files) = setup();
        let mut manifest =
            manifest_for(dir.path(), &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"])]);
        // B depends on A; changing a.ex must mark b.ex affected.
        manifest.dependents.insert("A".into(), vec!["B".into()]);
        fs::write(dir.path().join("lib/a.ex"), "defmodule A do\n  def y, do: 2\nend").unwrap();
        let set = detect(dir.path(), &files, &manifest);
        assert_eq!(set.modified, vec!["lib/a.ex"]);
        assert_eq!(set.affected, vec!["lib/b.ex"]);
        assert_eq!(
            set.files_to_reindex().into_iter().collect::<Vec<_>>(),
            vec!["lib/a.ex", "lib/b.ex"]
        );
        assert_eq!(
            set.files_to_remove().into_iter().collect::<Vec<_>>(),
            vec!["lib/a.ex", "lib/b.ex"]
        );
    }

    #[test]
    fn dependent_closure_is_transitive_and_cycle_safe() {
        let (dir, files) = setup();
        fs::write(dir.path().join("lib/c.ex"), "defmodule C do\nend").unwrap();
        let mut all = files.clone();
        all.push(dir.path().join("lib/c.ex"));
        let mut manifest = manifest_for(
            dir.path(),
            &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"]), ("lib/c.ex", &["C"])],
        );
        manifest.dependents.insert("A".into(), vec!["B".into()]);
        manifest.dependents.insert("B".into(), vec!["C".into()]);
        // Cycle back to A; BFS must terminate.
        manifest.dependents.insert("C".into(), vec!["A".into()]);
        fs::write(dir.path().join("lib/a.ex"), "defmodule A do\n  def z, do: 3\nend").unwrap();
        let set = detect(dir.path(), &all, &manifest);
        assert_eq!(set.affected, vec!["lib/b.ex", "lib/c.ex"]);
    }

    #[test]
    fn deleted_files_seed_the_affected_closure() {
        let (dir, mut files) = setup();
        let mut manifest =
            manifest_for(dir.path(), &[("lib/a.ex", &["A"]), ("lib/b.ex", &["B"])]);
        manifest.dependents.insert("A".into(), vec!["B".into()]);
        fs::remove_file(dir.path().join("lib/a.ex")).unwrap();
        files.retain(|p| !p.ends_with("lib/a.ex"));
        let set = detect(dir.path(), &files, &manifest);
        assert_eq!(set.deleted, vec!["lib/a.ex"]);
        assert_eq!(set.affected, vec!["lib/b.ex"]);
    }
}
