//! Runs the `mudscript` binary against scripts in a temporary directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn binary() -> &'static str {
    env!("CARGO_BIN_EXE_mudscript")
}

fn write_script(dir: &Path, name: &str, lines: &[&str]) {
    std::fs::write(dir.join(format!("{name}.cmd")), lines.join("\n")).unwrap();
}

/// Run the binary with `args`, feeding `stdin`, and wait for it.
fn run(dir: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(binary())
        .arg(format!("-s{}", dir.display()))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("MUDSCRIPT_DIR")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    {
        let mut input = child.stdin.take().unwrap();
        // The script may finish before reading everything.
        let _ = input.write_all(stdin.as_bytes());
    }
    child.wait_with_output().unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn commands_to_stdout_echo_to_stderr() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "hello", &["echo hello %1", "put look"]);
    let out = run(dir.path(), &["hello", "world"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "look\n");
    let err = stderr(&out);
    assert!(err.contains("hello world"), "{err}");
    assert!(err.contains("[Starting 'hello']"), "{err}");
    assert!(err.contains("[Script 'hello' completed]"), "{err}");
}

#[test]
fn stdin_lines_resolve_waits() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "wait", &["waitfor ready", "put go"]);
    let out = run(dir.path(), &["wait"], "not yet\nready now\n");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "go\n");
}

#[test]
fn closed_stdin_stops_a_waiting_script() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "stuck", &["waitfor never", "put unreachable"]);
    let out = run(dir.path(), &["stuck"], "something else\n");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "");
    assert!(stderr(&out).contains("[Script 'stuck' completed]"));
}

#[test]
fn vars_file_seeds_globals() {
    let dir = TempDir::new().unwrap();
    let vars = dir.path().join("vars.txt");
    std::fs::write(&vars, "#var {weapon} {short sword}\n#alias {x} {y}\n").unwrap();
    write_script(dir.path(), "arm", &["put wield $weapon", "put $lefthand"]);
    let flag = format!("-V{}", vars.display());
    let out = run(dir.path(), &[flag.as_str(), "arm"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "wield short sword\nEmpty\n");
}

#[test]
fn missing_script_fails() {
    let dir = TempDir::new().unwrap();
    let out = run(dir.path(), &["nope"], "");
    assert!(!out.status.success());
    assert!(stderr(&out).contains("not found"), "{}", stderr(&out));
}

#[test]
fn usage_without_script() {
    let out = Command::new(binary()).output().unwrap();
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Usage: mudscript"));
}
