use std::{
    fs,
    io::Write,
    process::{Command, Output, Stdio},
};

use indoc::indoc;

const TAP: &str = indoc! {"
    TAP version 13
    1..3
    ok 1 - first check
    not ok 2 - second check
      ---
      duration_ms: 20
      ...
    ok 3 - later # SKIP not today
"};

fn tap2junit() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_tap2junit"));
    command.env_remove("RUST_LOG");
    command
}

fn run_with_stdin(command: &mut Command, stdin: &str) -> Output {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn converts_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("unit.tap");
    let output = dir.path().join("unit.xml");
    fs::write(&input, TAP).unwrap();

    let status = tap2junit()
        .arg("-i")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    let xml = fs::read_to_string(&output).unwrap();
    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(xml.contains(
        r#"<testsuite name="unit" tests="3" failures="1" errors="0" skipped="1" time="0.020000">"#
    ));
    assert!(xml.contains(r#"<failure message="second check">duration_ms: 20</failure>"#));
    assert!(xml.contains("<skipped>not today</skipped>"));
}

#[test]
fn stdin_to_stdout() {
    let output = run_with_stdin(tap2junit().args(["-n", "piped", "-p", "pkg"]), TAP);
    assert!(output.status.success());

    let xml = String::from_utf8(output.stdout).unwrap();
    assert!(xml.contains(r#"<testsuite name="piped" tests="3""#));
    assert!(xml.contains(r#"<testcase name="first check" classname="pkg" time="0.000000"/>"#));
}

#[test]
fn dash_means_stdio() {
    let output = run_with_stdin(tap2junit().args(["-i", "-", "-o", "-"]), "ok 1 - a\n");
    assert!(output.status.success());

    let xml = String::from_utf8(output.stdout).unwrap();
    assert!(xml.contains(r#"<testsuite name="tap2junit" tests="1" failures="0""#));
}

#[test]
fn bail_out_is_not_an_error() {
    let output = run_with_stdin(&mut tap2junit(), "1..3\nok 1 - a\nBail out! crashed\n");
    assert!(output.status.success());

    let xml = String::from_utf8(output.stdout).unwrap();
    assert!(xml.contains(r#"tests="1""#));
    assert!(xml.contains(r#"<failure message="crashed"/>"#));
}

#[test]
fn misplaced_plan_fails() {
    let output = run_with_stdin(&mut tap2junit(), "1..1\nok 1\n1..1\n");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("malformed TAP input"));
}

#[test]
fn missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let status = tap2junit()
        .arg("--input")
        .arg(dir.path().join("absent.tap"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
}
