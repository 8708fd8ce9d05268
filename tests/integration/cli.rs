//! Exit codes and output of the `hostcall` binary

use std::path::Path;
use std::process::{Command, Output};

use crate::common::{layout, Layout};

fn hostcall() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hostcall"));
    cmd.env_remove("HOSTCALL_HOME").env_remove("HOSTCALL_PATH");
    cmd
}

fn run_in(
    layout: &Layout,
    extra: &[&str],
) -> Output {
    hostcall()
        .arg("--home")
        .arg(&layout.home)
        .arg("--app-dir")
        .arg(&layout.app)
        .args(extra)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Last stdout line, which carries the call result
fn result_line(output: &Output) -> String {
    stdout(output).lines().last().unwrap_or_default().to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_default_call_succeeds() {
    let layout = layout();
    let output = run_in(&layout, &[]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(result_line(&output), "Sample.add(2, 2) = 4");
}

#[test]
fn test_explicit_arguments() {
    let layout = layout();
    let output = run_in(&layout, &["--function", "add", "--", "-7", "10"]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("= 3"));
}

#[test]
fn test_missing_module_exits_one() {
    let layout = layout();
    let output = run_in(&layout, &["--module", "DoesNotExist"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("DoesNotExist"));
    assert!(!stdout(&output).contains(" = "));
}

#[test]
fn test_missing_function_exits_one() {
    let layout = layout();
    let output = run_in(&layout, &["--function", "missing"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no export named `missing`"));
}

#[test]
fn test_trap_text_reaches_stderr() {
    let layout = layout();
    let output = run_in(&layout, &["--function", "fail"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unreachable"));
}

#[test]
fn test_fallback_is_logged() {
    let layout = layout();
    let output = hostcall()
        .arg("--home")
        .arg(layout.home.join("missing"))
        .arg("--app-dir")
        .arg(&layout.app)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("WARN"));
    assert!(stdout(&output).contains("= 4"));
}

#[test]
fn test_fallback_failure_exits_one() {
    let layout = layout();
    let missing = layout.home.join("missing");
    let output = hostcall()
        .env("HOSTCALL_HOME", &missing)
        .arg("--home")
        .arg(&missing)
        .arg("--app-dir")
        .arg(&layout.app)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("runtime initialization failed"));
    assert!(!stdout(&output).contains(" = "));
}

#[test]
fn test_layout_from_executable_location() {
    // <exe>/../../app is the repository's app/ for the default target dir
    let exe = Path::new(env!("CARGO_BIN_EXE_hostcall"));
    let app = exe
        .parent()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map(|root| root.join("app"));
    if !app.is_some_and(|app| app.join("Sample.wat").is_file()) {
        return;
    }

    let output = hostcall().output().unwrap();
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Sample.add(2, 2) = 4"));
}

#[cfg(feature = "rnnoise")]
#[test]
fn test_denoiser_runs_before_the_call() {
    let layout = layout();
    let output = run_in(&layout, &[]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    let mut lines = out.lines();
    let vad = lines
        .next()
        .and_then(|line| line.strip_prefix("VAD probability: "))
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap();
    assert!((0.0..=1.0).contains(&vad));
    assert_eq!(lines.last(), Some("Sample.add(2, 2) = 4"));
}
