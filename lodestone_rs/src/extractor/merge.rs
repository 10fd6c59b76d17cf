//! Merge layer: cross-phase deduplication.
//!
//! Non-call records pass through in input order. Call records from all
//! phases fold into a table keyed by the call-site key (file, line,
//! callee); insertion runs in fixed priority order (syntactic, then xref,
//! then compiler) so higher-confidence entries overwrite. Dependency edges
//! dedupe on (from, to, type).

use std::collections::HashMap;

use crate::records::{Record, RecordData};

/// Merge the combined output of every phase into the final record set.
/// The returned order is the store's on-disk line order: non-call records
/// first (input order), then merged calls sorted by site key, then
/// dependency edges sorted by their unique key.
pub fn merge(records: Vec<Record>) -> Vec<Record> {
    let mut others = Vec::new();
    let mut calls = Vec::new();
    let mut deps = Vec::new();
    for record in records {
        match &record.data {
            RecordData::Call(_) => calls.push(record),
            RecordData::Dep(_) => deps.push(record),
            _ => others.push(record),
        }
    }

    // Fixed insertion order: lower-priority sources first, so a later
    // insert at the same call site overwrites.
    calls.sort_by_key(|r| r.source);
    let mut table: HashMap<(String, usize, Option<String>), Record> = HashMap::new();
    for record in calls {
        let RecordData::Call(call) = &record.data else {
            unreachable!("partitioned above");
        };
        table.insert(call.site_key(), record);
    }
    let mut merged_calls: Vec<Record> = table.into_values().collect();
    merged_calls.sort_by(|a, b| {
        let (RecordData::Call(ca), RecordData::Call(cb)) = (&a.data, &b.data) else {
            unreachable!("only calls in the table");
        };
        ca.site_key().cmp(&cb.site_key())
    });

    let mut seen_deps = std::collections::HashSet::new();
    deps.retain(|record| {
        let RecordData::Dep(dep) = &record.data else {
            unreachable!("partitioned above");
        };
        seen_deps.insert((dep.from.clone(), dep.to.clone(), dep.dep_type))
    });
    deps.sort_by(|a, b| {
        let (RecordData::Dep(da), RecordData::Dep(db)) = (&a.data, &b.data) else {
            unreachable!("only deps here");
        };
        da.cmp(db)
    });

    others.extend(merged_calls);
    others.extend(deps);
    others
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CallRef, Confidence, DepEdge, DepType, ModuleDef, Source};

    fn call(source: Source, confidence: Confidence, line: usize, callee: Option<&str>) -> Record {
        Record::new(
            RecordData::Call(CallRef {
                caller: "App.A.run/0".into(),
                callee: callee.map(String::from),
                file: "lib/a.ex".into(),
                line,
            }),
            source,
            confidence,
        )
    }

    #[test]
    fn compiler_calls_overwrite_syntactic_at_the_same_site() {
        let merged = merge(vec![
            call(Source::Syntactic, Confidence::Medium, 5, Some("App.B.go/0")),
            call(Source::Compiler, Confidence::High, 5, Some("App.B.go/0")),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, Source::Compiler);
        assert_eq!(merged[0].confidence, Confidence::High);
    }

    #[test]
    fn insertion_order_wins_regardless_of_input_order() {
        // Compiler record arriving first must still win.
        let merged = merge(vec![
            call(Source::Compiler, Confidence::High, 5, Some("App.B.go/0")),
            call(Source::Syntactic, Confidence::Medium, 5, Some("App.B.go/0")),
        ]);
        assert_eq!(merged[0].source, Source::Compiler);
    }

    #[test]
    fn distinct_call_sites_all_survive() {
        let merged = merge(vec![
            call(Source::Syntactic, Confidence::Medium, 5, Some("App.B.go/0")),
            call(Source::Syntactic, Confidence::Medium, 6, Some("App.B.go/0")),
            call(Source::Syntactic, Confidence::Low, 5, None),
        ]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn dep_edges_dedupe_on_their_key() {
        let dep = |from: &str, ty: DepType| {
            Record::new(
                RecordData::Dep(DepEdge {
                    from: from.into(),
                    to: "App.Core".into(),
                    dep_type: ty,
                }),
                Source::Xref,
                Confidence::High,
            )
        };
        let merged = merge(vec![
            dep("App.Web", DepType::Compile),
            dep("App.Web", DepType::Compile),
            dep("App.Web", DepType::Runtime),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn non_call_records_keep_input_order_and_come_first() {
        let module = Record::syntactic(RecordData::Module(ModuleDef {
            module: "App.A".into(),
            file: "lib/a.ex".into(),
            line: 1,
            end_line: 3,
            behaviours: vec![],
        }));
        let merged = merge(vec![
            call(Source::Syntactic, Confidence::Medium, 2, Some("App.B.go/0")),
            module.clone(),
        ]);
        assert_eq!(merged[0], module);
        assert!(matches!(merged[1].data, RecordData::Call(_)));
    }

    #[test]
    fn merged_output_is_deterministic() {
        let input = vec![
            call(Source::Syntactic, Confidence::Medium, 9, Some("App.C.x/0")),
            call(Source::Syntactic, Confidence::Medium, 2, Some("App.B.y/1")),
            call(Source::Xref, Confidence::High, 9, Some("App.C.x/0")),
        ];
        let a = merge(input.clone());
        let b = merge(input);
        assert_eq!(a, b);
    }
}
