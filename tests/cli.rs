use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
#[allow(deprecated)]
fn test_normalize_from_stdin() {
    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("normalize").write_stdin("# Title\n\nSome *text*\n\n\n\n* a\n* b\n");

    cmd.assert()
        .success()
        .stdout("# Title\n\nSome *text*\n\n- a\n- b\n");
}

#[test]
#[allow(deprecated)]
fn test_parse_file_to_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doc.md");
    fs::write(&path, "## Notes\n\nbody").unwrap();

    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    let output = cmd.arg("parse").arg(&path).output().unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["kind"], "document");
    assert_eq!(json["children"][0]["kind"], "heading");
    assert_eq!(json["children"][0]["attrs"]["level"], 2);
    assert_eq!(json["children"][1]["children"][0]["text"], "body");
}

#[test]
#[allow(deprecated)]
fn test_render_json_tree() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doc.json");
    fs::write(
        &path,
        r#"{"kind":"document","children":[{"kind":"paragraph","children":[{"kind":"text","text":"hi","marks":[{"kind":"bold"}]}]}]}"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("render").arg(&path);
    cmd.assert().success().stdout("**hi**\n");
}

#[test]
#[allow(deprecated)]
fn test_render_unknown_kind_fails() {
    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("render")
        .write_stdin(r#"{"kind":"document","children":[{"kind":"unsupported-widget"}]}"#);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown block kind `unsupported-widget`"));
}

#[test]
#[allow(deprecated)]
fn test_render_invalid_json_fails() {
    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("render").write_stdin("not json");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid node JSON"));
}

#[test]
#[allow(deprecated)]
fn test_detect_table() {
    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("detect")
        .write_stdin("\n  \n| a | b |\n| --- | --- |\n| 1 | 2 |");
    cmd.assert().success().stdout("table\n");

    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("detect").arg("--json").write_stdin("a | b");
    cmd.assert().success().stdout("{\"table\":false}\n");
}

#[test]
#[allow(deprecated)]
fn test_missing_file_reports_error() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("md-collab").unwrap();
    cmd.arg("parse").arg(dir.path().join("absent.md"));

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::starts_with("Error: cannot read"));
}
