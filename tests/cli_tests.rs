//! Integration tests for the tejer binary

use predicates::prelude::*;
use std::fs;
use tejer::method::ClassUnit;

const CALC: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/calc.json");
const CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/tejer.toml");

#[test]
fn test_weave_with_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("Calc.woven.json");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("weave")
        .arg(CALC)
        .arg("-C")
        .arg(CONFIG)
        .arg("--verify")
        .arg("-o")
        .arg(&out);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("3 method(s) inspected, 1 woven, 2 exit site(s)"));

    let woven = ClassUnit::from_file(&out).unwrap();
    let original = ClassUnit::from_file(CALC).unwrap();

    assert!(woven.method("compute").unwrap().header.is_traced());
    assert_eq!(woven.method("<init>"), original.method("<init>"));
    assert_eq!(woven.method("twice"), original.method("twice"));
}

#[test]
fn test_weave_with_plugin_options_to_stdout() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("weave")
        .arg(CALC)
        .arg("-P")
        .arg("enabled=true")
        .arg("-P")
        .arg("annotations=Lorg/example/DebugLog;");

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let woven = ClassUnit::from_json_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert!(woven.method("compute").unwrap().header.is_traced());
}

#[test]
fn test_weave_disabled_passes_through() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("weave").arg(CALC);

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("0 woven"));

    let woven = ClassUnit::from_json_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(woven, ClassUnit::from_file(CALC).unwrap());
}

#[test]
fn test_weave_enabled_without_annotations_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("weave").arg(CALC).arg("-P").arg("enabled=true");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no annotations were set"));
}

#[test]
fn test_weave_unknown_option_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("weave").arg(CALC).arg("-P").arg("verbose=true");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid plugin option 'verbose=true'"));
}

#[test]
fn test_weave_missing_input_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("weave").arg("/nonexistent/Calc.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_run_woven_early_return() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("run")
        .arg(CALC)
        .arg("-m")
        .arg("compute")
        .arg("-a")
        .arg("-5")
        .arg("--weave")
        .arg("-C")
        .arg(CONFIG);

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "-> compute start");
    assert!(lines[1].starts_with("<- compute end cost "));
    assert!(lines[1].ends_with(" ms"));
    assert_eq!(lines[2], "=> 0");
}

#[test]
fn test_run_unwoven_prints_only_result() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("run").arg(CALC).arg("--method").arg("compute").arg("--arg").arg("4");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("=> 8"))
        .stdout(predicate::str::contains("->").not());
}

#[test]
fn test_run_unknown_method_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("run").arg(CALC).arg("-m").arg("missing");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no method named missing"));
}

#[test]
fn test_inspect_text() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("inspect").arg(CALC).arg("-C").arg(CONFIG).arg("--code");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("class org/example/Calc"))
        .stdout(predicate::str::contains("compute(I)I  [selected]"))
        .stdout(predicate::str::contains("<init>()V  [skipped: not a function]"))
        .stdout(predicate::str::contains("twice(I)I  [skipped: no marker annotation]"))
        .stdout(predicate::str::contains("ifge L1"));
}

#[test]
fn test_inspect_json() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    cmd.arg("inspect")
        .arg(CALC)
        .arg("--format")
        .arg("json")
        .arg("-P")
        .arg("enabled=true")
        .arg("-P")
        .arg("annotations=org.example.DebugLog");

    let output = cmd.output().unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let methods = parsed.as_array().unwrap();
    assert_eq!(methods.len(), 3);
    assert_eq!(methods[0]["skipped"], "not_a_function");
    assert_eq!(methods[1]["name"], "compute");
    assert_eq!(methods[1]["selected"], true);
    assert_eq!(methods[2]["skipped"], "no_marker");
}

#[test]
fn test_weave_output_runs_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("Calc.woven.json");
    fs::copy(CALC, dir.path().join("Calc.json")).unwrap();

    let mut weave = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    weave
        .arg("weave")
        .arg(dir.path().join("Calc.json"))
        .arg("-C")
        .arg(CONFIG)
        .arg("-o")
        .arg(&out);
    weave.assert().success();

    let mut run = assert_cmd::cargo::cargo_bin_cmd!("tejer");
    run.arg("run").arg(&out).arg("-m").arg("compute").arg("-a").arg("21");
    run.assert()
        .success()
        .stdout(predicate::str::contains("-> compute start"))
        .stdout(predicate::str::contains("=> 42"));
}
