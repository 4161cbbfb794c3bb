//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn lemoneval() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("lemoneval").unwrap()
}

fn write_rubric(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("rubric.toml");
    std::fs::write(&path, content).unwrap();
    path
}

const QUIZ: &str = r#"
[rubric]
name = "quiz"
root = "total"

[[nodes]]
name = "total"
kind = "sum"
operands = ["q1", "q2", "bonus"]

[[nodes]]
name = "q1"
kind = "answer"
score = 3
key = "q1"
equals = "b"

[[nodes]]
name = "q2"
kind = "answer"
score = 4
key = "q2"
equals = 42

[[nodes]]
name = "bonus"
kind = "lottery"
score = 1
threshold = 1.0
"#;

#[test]
fn validate_valid_rubric() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(dir.path(), QUIZ);

    lemoneval()
        .arg("validate")
        .arg("--rubric")
        .arg(&rubric)
        .assert()
        .success()
        .stdout(predicate::str::contains("Rubric: quiz"))
        .stdout(predicate::str::contains("Rubric valid."));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(
        dir.path(),
        r#"
[rubric]
name = "loose"
root = "a"

[[nodes]]
name = "a"
kind = "constant"
score = 1

[[nodes]]
name = "stray"
kind = "constant"
score = 2
"#,
    );

    lemoneval()
        .arg("validate")
        .arg("--rubric")
        .arg(&rubric)
        .assert()
        .success()
        .stdout(predicate::str::contains("[stray] WARNING"))
        .stdout(predicate::str::contains("1 warning(s) found"));
}

#[test]
fn validate_rejects_cycles() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(
        dir.path(),
        r#"
[rubric]
name = "loop"
root = "a"

[[nodes]]
name = "a"
kind = "sum"
operands = ["b"]

[[nodes]]
name = "b"
kind = "max"
operands = ["a", 1]
"#,
    );

    lemoneval()
        .arg("validate")
        .arg("--rubric")
        .arg(&rubric)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn validate_nonexistent_file() {
    lemoneval()
        .arg("validate")
        .arg("--rubric")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn grade_answers_as_text() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(dir.path(), QUIZ);

    lemoneval()
        .arg("grade")
        .arg("--rubric")
        .arg(&rubric)
        .arg("--answer")
        .arg("q1=b")
        .arg("--answer")
        .arg("q2=41")
        .assert()
        .success()
        .stdout(predicate::str::contains("Score:  4 (some failed)"))
        .stdout(predicate::str::contains("q1 [answer] 3 ok"));
}

#[test]
fn grade_reports_missing_answers() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(dir.path(), QUIZ);

    lemoneval()
        .arg("grade")
        .arg("--rubric")
        .arg(&rubric)
        .arg("--format")
        .arg("table")
        .assert()
        .success()
        .stdout(predicate::str::contains("lookup_error"))
        .stdout(predicate::str::contains("Final score: 1"));
}

#[test]
fn grade_json_output_and_report_file() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(dir.path(), QUIZ);
    let report_path = dir.path().join("out/report.json");

    let output = lemoneval()
        .arg("grade")
        .arg("--rubric")
        .arg(&rubric)
        .arg("--answer")
        .arg("q1=b")
        .arg("--answer")
        .arg("q2=42")
        .arg("--format")
        .arg("json")
        .arg("--seed")
        .arg("7")
        .arg("--output")
        .arg(&report_path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["final_score"], 8.0);
    assert_eq!(report["success"], true);
    assert_eq!(report["rubric"], "quiz");

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(saved["id"], report["id"]);
}

#[test]
fn grade_rejects_unknown_format() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(dir.path(), QUIZ);

    lemoneval()
        .arg("grade")
        .arg("--rubric")
        .arg(&rubric)
        .arg("--format")
        .arg("xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}

#[test]
fn grade_rejects_malformed_answer() {
    let dir = TempDir::new().unwrap();
    let rubric = write_rubric(dir.path(), QUIZ);

    lemoneval()
        .arg("grade")
        .arg("--rubric")
        .arg(&rubric)
        .arg("--answer")
        .arg("no-equals-sign")
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[cfg(unix)]
#[test]
fn grade_program_tests() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("tests")).unwrap();
    std::fs::write(dir.path().join("tests/1.in"), "1 2\n").unwrap();
    std::fs::write(dir.path().join("tests/1.sol"), "1   2\n").unwrap();
    std::fs::write(dir.path().join("tests/2.in"), "3\n").unwrap();
    std::fs::write(dir.path().join("tests/2.sol"), "4\n").unwrap();

    let rubric = write_rubric(
        dir.path(),
        r#"
[rubric]
name = "echo"
root = "total"
time_limit_secs = 5

[[nodes]]
name = "total"
kind = "chains"
operands = ["t1", "t2"]

[[nodes]]
name = "t1"
kind = "program"
score = 10
program = "main"
checker = "word"
input = "tests/1.in"
solution = "tests/1.sol"

[[nodes]]
name = "t2"
kind = "program"
score = 5
program = "main"
checker = "exact"
input = "tests/2.in"
solution = "tests/2.sol"
"#,
    );
    let sandboxes = dir.path().join("sandboxes");

    lemoneval()
        .arg("grade")
        .arg("--rubric")
        .arg(&rubric)
        .arg("--program")
        .arg("main=/bin/cat")
        .arg("--sandbox-root")
        .arg(&sandboxes)
        .assert()
        .success()
        .stdout(predicate::str::contains("Score:  10 (some failed)"))
        .stdout(predicate::str::contains("checker: incorrect"));

    assert_eq!(std::fs::read_dir(&sandboxes).unwrap().count(), 0);
}
