//! CLI contract tests: JSON on stdout, human messages on stderr, exit
//! codes 0/1.

use assert_cmd::Command;
use predicates::prelude::*;

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("lib")).unwrap();
    std::fs::write(
        dir.path().join("lib/greeter.ex"),
        "defmodule Greeter do\n  def hello(name) do\n    Greeter.Format.wrap(name)\n  end\nend\n\ndefmodule Greeter.Format do\n  def wrap(name), do: name\nend\n",
    )
    .unwrap();
    dir
}

fn lode() -> Command {
    Command::cargo_bin("lode").unwrap()
}

#[test]
fn index_emits_json_result_on_stdout() {
    let dir = fixture();
    lode()
        .args(["index", "--no-compile", "--path"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("records_indexed"))
        .stderr(predicate::str::contains("Indexed"));
    assert!(dir.path().join(".lodestone/index.jsonl").is_file());
    assert!(dir.path().join(".lodestone/manifest.json").is_file());
}

#[test]
fn query_definition_round_trips() {
    let dir = fixture();
    lode()
        .args(["index", "--no-compile", "--path"])
        .arg(dir.path())
        .assert()
        .success();

    // The query subcommand runs its compiler-free refresh against an
    // already-built index, so no compile is attempted here.
    lode()
        .args(["query", "definition", "--mfa", "Greeter.hello/1", "--path"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"module\": \"Greeter\""))
        .stdout(predicate::str::contains("\"arity\": 1"));
}

#[test]
fn malformed_mfa_yields_empty_result_not_failure() {
    let dir = fixture();
    lode()
        .args(["index", "--no-compile", "--path"])
        .arg(dir.path())
        .assert()
        .success();

    lode()
        .args(["query", "definition", "--mfa", "not-an-mfa", "--path"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn unknown_query_type_fails_with_exit_one() {
    let dir = fixture();
    lode()
        .args(["index", "--no-compile", "--path"])
        .arg(dir.path())
        .assert()
        .success();

    lode()
        .args(["query", "nonsense", "--path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown query type"));
}

#[test]
fn clear_removes_the_index() {
    let dir = fixture();
    lode()
        .args(["index", "--no-compile", "--path"])
        .arg(dir.path())
        .assert()
        .success();
    lode()
        .args(["clear", "--path"])
        .arg(dir.path())
        .assert()
        .success();
    assert!(!dir.path().join(".lodestone").exists());
}
