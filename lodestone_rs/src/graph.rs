//! Query engine over the persisted record store.
//!
//! Queries stream `index.jsonl` rather than materializing it; only the
//! graph traversals (callers/callees/impact) build an in-memory adjacency
//! first. Every query requires an existing index and returns a `NoIndex`
//! error otherwise. An MFA that violates the grammar yields an empty
//! result, not an error.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mfa;
use crate::records::{
    CallRef, DirectiveKind, FunctionDef, RecordData, Route, Schema, TypeDef, TypeSpec,
};
use crate::store::Store;

/// Directory prefix that marks test files in impact reports.
const TEST_ROOT: &str = "test/";

/// One node discovered by a callers/callees traversal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEntry {
    pub mfa: String,
    pub depth: usize,
}

/// Result of a change-impact query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub changed_modules: Vec<String>,
    pub affected_modules: Vec<String>,
    pub test_files: Vec<String>,
}

fn require_index(store: &Store) -> Result<()> {
    if store.index_exists() {
        Ok(())
    } else {
        Err(Error::NoIndex(store.project_root().to_path_buf()))
    }
}

/// Find the definition of an MFA. At most one record by the function
/// unique-key invariant.
pub fn definition(store: &Store, mfa_str: &str) -> Result<Vec<FunctionDef>> {
    require_index(store)?;
    let Some(parsed) = mfa::parse(mfa_str) else {
        return Ok(Vec::new());
    };
    let found = store.stream_records()?.find_map(|record| match record.data {
        RecordData::Function(f)
            if f.module == parsed.module && f.name == parsed.name && f.arity == parsed.arity =>
        {
            Some(f)
        }
        _ => None,
    });
    Ok(found.into_iter().collect())
}

/// All call sites whose callee is the given MFA, sorted by (file, line).
pub fn references(store: &Store, mfa_str: &str) -> Result<Vec<CallRef>> {
    require_index(store)?;
    let Some(parsed) = mfa::parse(mfa_str) else {
        return Ok(Vec::new());
    };
    let needle = parsed.format();
    let mut refs: Vec<CallRef> = store
        .stream_records()?
        .filter_map(|record| match record.data {
            RecordData::Call(c) if c.callee.as_deref() == Some(needle.as_str()) => Some(c),
            _ => None,
        })
        .collect();
    refs.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    Ok(refs)
}

/// Transitive callers of an MFA up to `depth` levels, BFS order.
pub fn callers(store: &Store, mfa_str: &str, depth: usize) -> Result<Vec<GraphEntry>> {
    require_index(store)?;
    let adjacency = call_graph(store, Direction::Callers)?;
    Ok(traverse(&adjacency, mfa_str, depth))
}

/// Transitive callees of an MFA up to `depth` levels, BFS order.
pub fn callees(store: &Store, mfa_str: &str, depth: usize) -> Result<Vec<GraphEntry>> {
    require_index(store)?;
    let adjacency = call_graph(store, Direction::Callees)?;
    Ok(traverse(&adjacency, mfa_str, depth))
}

enum Direction {
    Callers,
    Callees,
}

/// Build the adjacency map from call records. Neighbor lists keep record
/// order (file, line) so BFS tie-breaks are stable.
fn call_graph(store: &Store, direction: Direction) -> Result<HashMap<String, Vec<String>>> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for record in store.stream_records()? {
        let RecordData::Call(call) = record.data else {
            continue;
        };
        let Some(callee) = call.callee else { continue };
        let (key, value) = match direction {
            Direction::Callers => (callee, call.caller),
            Direction::Callees => (call.caller, callee),
        };
        if !seen.insert((key.clone(), value.clone())) {
            continue;
        }
        adjacency.entry(key).or_default().push(value);
    }
    Ok(adjacency)
}

fn traverse(
    adjacency: &HashMap<String, Vec<String>>,
    start: &str,
    depth: usize,
) -> Vec<GraphEntry> {
    let Some(parsed) = mfa::parse(start) else {
        return Vec::new();
    };
    if depth == 0 {
        return Vec::new();
    }
    let start = parsed.format();
    let mut out = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.clone());
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((start, 0));

    while let Some((node, level)) = queue.pop_front() {
        if level >= depth {
            continue;
        }
        let Some(neighbors) = adjacency.get(&node) else {
            continue;
        };
        for neighbor in neighbors {
            if !visited.insert(neighbor.clone()) {
                continue;
            }
            out.push(GraphEntry {
                mfa: neighbor.clone(),
                depth: level + 1,
            });
            queue.push_back((neighbor.clone(), level + 1));
        }
    }
    out
}

/// All routes, sorted by (verb, path).
pub fn routes(store: &Store) -> Result<Vec<Route>> {
    require_index(store)?;
    let mut routes: Vec<Route> = store
        .stream_records()?
        .filter_map(|record| match record.data {
            RecordData::Route(r) => Some(r),
            _ => None,
        })
        .collect();
    routes.sort_by(|a, b| (&a.verb, &a.path).cmp(&(&b.verb, &b.path)));
    Ok(routes)
}

/// The schema defined by a module, if any.
pub fn schema(store: &Store, module: &str) -> Result<Vec<Schema>> {
    require_index(store)?;
    let found = store.stream_records()?.find_map(|record| match record.data {
        RecordData::Schema(s) if s.module == module => Some(s),
        _ => None,
    });
    Ok(found.into_iter().collect())
}

/// `@spec` records for an MFA.
pub fn function_spec(store: &Store, mfa_str: &str) -> Result<Vec<TypeSpec>> {
    require_index(store)?;
    let Some(parsed) = mfa::parse(mfa_str) else {
        return Ok(Vec::new());
    };
    Ok(store
        .stream_records()?
        .filter_map(|record| match record.data {
            RecordData::Spec(s)
                if s.module == parsed.module && s.name == parsed.name && s.arity == parsed.arity =>
            {
                Some(s)
            }
            _ => None,
        })
        .collect())
}

/// Type definitions declared by a module.
pub fn module_types(store: &Store, module: &str) -> Result<Vec<TypeDef>> {
    require_index(store)?;
    Ok(store
        .stream_records()?
        .filter_map(|record| match record.data {
            RecordData::Type(t) if t.module == module => Some(t),
            _ => None,
        })
        .collect())
}

/// Compiler diagnostics captured by the last index run.
pub fn diagnostics(store: &Store) -> Result<Vec<crate::records::Diagnostic>> {
    require_index(store)?;
    Ok(store
        .stream_records()?
        .filter_map(|record| match record.data {
            RecordData::Diagnostic(d) => Some(d),
            _ => None,
        })
        .collect())
}

/// Change-impact closure for a set of files: the modules they define, the
/// transitive dependents of those modules, and the test files exercising
/// any of them.
pub fn impact(store: &Store, files: &[String]) -> Result<ImpactReport> {
    require_index(store)?;

    struct Collected {
        modules: Vec<(String, String)>,            // (module, file)
        reverse_deps: HashMap<String, Vec<String>>, // to -> [from]
        directives: Vec<(DirectiveKind, String, String)>, // (kind, target, file)
    }
    let mut collected = Collected {
        modules: Vec::new(),
        reverse_deps: HashMap::new(),
        directives: Vec::new(),
    };
    for record in store.stream_records()? {
        match record.data {
            RecordData::Module(m) => collected.modules.push((m.module, m.file)),
            RecordData::Dep(d) => collected
                .reverse_deps
                .entry(d.to)
                .or_default()
                .push(d.from),
            RecordData::Directive(d) => collected.directives.push((d.kind, d.target, d.file)),
            _ => {}
        }
    }

    let wanted: Vec<String> = files.iter().map(|f| normalize_query_path(f)).collect();
    let mut changed: BTreeSet<String> = BTreeSet::new();
    for (module, file) in &collected.modules {
        if wanted.iter().any(|w| file_matches(file, w)) {
            changed.insert(module.clone());
        }
    }

    // BFS over the reverse dependency graph; the closure includes the
    // changed modules themselves.
    let mut affected: BTreeSet<String> = changed.clone();
    let mut queue: VecDeque<String> = changed.iter().cloned().collect();
    while let Some(module) = queue.pop_front() {
        if let Some(dependents) = collected.reverse_deps.get(&module) {
            for dependent in dependents {
                if affected.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
    }

    let mut test_files: BTreeSet<String> = BTreeSet::new();
    for (kind, target, file) in &collected.directives {
        if !matches!(
            kind,
            DirectiveKind::Use | DirectiveKind::Import | DirectiveKind::Alias
        ) {
            continue;
        }
        if file.starts_with(TEST_ROOT) && affected.contains(target) {
            test_files.insert(file.clone());
        }
    }

    Ok(ImpactReport {
        changed_modules: changed.into_iter().collect(),
        affected_modules: affected.into_iter().collect(),
        test_files: test_files.into_iter().collect(),
    })
}

fn normalize_query_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

fn file_matches(record_file: &str, query: &str) -> bool {
    record_file == query || record_file.ends_with(&format!("/{}", query))
}
