//! Integration tests against real child processes on POSIX systems.

#![cfg(unix)]

use kit_process::{Process, ProcessError, SpawnOptions};
use std::time::{Duration, Instant};

fn sh(script: &str) -> Process {
    Process::spawn("/bin/sh", ["-c", script], &SpawnOptions::default()).expect("spawn sh")
}

fn sh_piped(script: &str) -> Process {
    Process::spawn_piped("/bin/sh", ["-c", script], &SpawnOptions::default())
        .expect("spawn piped sh")
}

/// Drain stdout and stderr with the poll-then-read loop until the child
/// has exited and nothing is left.
fn drain(child: &mut Process) -> (Vec<u8>, Vec<u8>) {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let running = child.is_running().unwrap();
        let ready = child.poll(50).unwrap();
        if ready.stdout_ready {
            let n = child.read_stdout(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        if ready.stderr_ready {
            let n = child.read_stderr(&mut buf).unwrap();
            err.extend_from_slice(&buf[..n]);
        }
        if !running && !ready.any_ready() {
            break;
        }
    }
    (out, err)
}

#[test]
fn test_exit_codes() {
    for code in [0, 1, 42, 255] {
        let child = sh(&format!("exit {code}"));
        assert_eq!(child.wait().unwrap(), code);
    }
}

#[test]
fn test_signal_exit_codes() {
    assert_eq!(sh("kill -TERM $$").wait().unwrap(), 128 + 15);
    assert_eq!(sh("kill -KILL $$").wait().unwrap(), 128 + 9);
}

#[test]
fn test_child_sigpipe_is_default() {
    // the test harness ignores SIGPIPE; the child must not inherit that
    assert_eq!(sh("kill -PIPE $$; exit 0").wait().unwrap(), 128 + 13);
    let child = sh_piped("kill -PIPE $$; exit 0");
    assert_eq!(child.wait().unwrap(), 128 + 13);
}

#[test]
fn test_missing_program_exits_127() {
    let child = Process::spawn(
        "kit-no-such-program",
        Vec::<&str>::new(),
        &SpawnOptions::default(),
    )
    .unwrap();
    assert_eq!(child.wait().unwrap(), 127);

    // same with an explicit environment (execve path)
    let child = Process::spawn(
        "kit-no-such-program",
        Vec::<&str>::new(),
        &SpawnOptions::new().env("A", "1"),
    )
    .unwrap();
    assert_eq!(child.wait().unwrap(), 127);
}

#[test]
fn test_drain_hello() {
    let mut child = sh_piped("echo hello");
    let (out, err) = drain(&mut child);
    assert_eq!(out, b"hello\n");
    assert!(err.is_empty());
    assert_eq!(child.wait().unwrap(), 0);
}

#[test]
fn test_drain_stderr() {
    let mut child = sh_piped("echo oops >&2; exit 2");
    let (out, err) = drain(&mut child);
    assert!(out.is_empty());
    assert_eq!(err, b"oops\n");
    assert_eq!(child.wait().unwrap(), 2);
}

#[test]
fn test_stdin_roundtrip() {
    let mut child = Process::spawn_piped("/bin/cat", Vec::<&str>::new(), &SpawnOptions::new())
        .unwrap();
    assert_eq!(child.write_stdin(b"abc\n").unwrap(), 4);
    child.close_stdin().unwrap();
    let (out, _) = drain(&mut child);
    assert_eq!(out, b"abc\n");
    assert_eq!(child.wait().unwrap(), 0);
}

#[test]
fn test_immediate_read_is_zero() {
    let mut child = sh_piped("sleep 2; echo late");
    let mut buf = [0u8; 64];
    assert_eq!(child.read_stdout(&mut buf).unwrap(), 0);
    assert_eq!(child.read_stderr(&mut buf).unwrap(), 0);
    child.kill(9).unwrap();
    assert_eq!(child.wait().unwrap(), 137);
}

#[test]
fn test_poll_zero_does_not_block() {
    let mut child = sh_piped("sleep 2");
    let start = Instant::now();
    let ready = child.poll(0).unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(!ready.any_ready());

    child.kill(15).unwrap();
    assert_eq!(child.wait().unwrap(), 143);
}

#[test]
fn test_poll_is_idempotent() {
    let mut child = sh_piped("printf abc");
    while child.is_running().unwrap() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let first = child.poll(1000).unwrap();
    let second = child.poll(0).unwrap();
    assert!(first.stdout_ready);
    assert_eq!(first, second);
    assert_eq!(first.stdout_available, Some(3));

    let mut buf = [0u8; 8];
    assert_eq!(child.read_stdout(&mut buf).unwrap(), 3);
    assert!(!child.poll(0).unwrap().stdout_ready);
    assert_eq!(child.wait().unwrap(), 0);
}

#[test]
fn test_write_after_close_stdin() {
    let mut child = sh_piped("sleep 2");
    child.close_stdin().unwrap();
    let err = child.write_stdin(b"data").unwrap_err();
    assert!(matches!(err, ProcessError::InvalidHandle { .. }));
    child.kill(9).unwrap();
    child.wait().unwrap();
}

#[test]
fn test_write_to_exited_child() {
    let mut child = sh_piped("exit 0");
    while child.is_running().unwrap() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let err = child.write_stdin(b"data").unwrap_err();
    assert!(matches!(err, ProcessError::Io { .. }));
    assert_eq!(child.wait().unwrap(), 0);
}

#[test]
fn test_kill_and_wait() {
    let mut child = sh("sleep 10");
    assert!(child.is_running().unwrap());
    child.kill(0).unwrap();
    assert!(child.is_running().unwrap());
    child.kill(15).unwrap();
    assert_eq!(child.wait().unwrap(), 143);

    let mut child = sh("sleep 10");
    child.kill(9).unwrap();
    assert_eq!(child.wait().unwrap(), 137);
}

#[test]
fn test_unknown_signal_rejected() {
    let mut child = sh("sleep 10");
    let err = child.kill(1000).unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument { .. }));
    child.kill(9).unwrap();
    child.wait().unwrap();
}

#[test]
fn test_is_running_caches_exit_code() {
    let mut child = sh("exit 7");
    while child.is_running().unwrap() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!child.running());
    assert_eq!(child.exit_code(), Some(7));
    assert!(!child.is_running().unwrap());
    // kill after observed exit is a no-op
    child.kill(9).unwrap();
    assert_eq!(child.wait().unwrap(), 7);
}

#[test]
fn test_detach() {
    let child = sh("sleep 0");
    assert!(child.id() > 0);
    child.detach();
}

#[test]
fn test_redirect_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let out = dir.path().join("out.txt");
    let err = dir.path().join("err.txt");
    std::fs::write(&input, "from file\n").unwrap();
    std::fs::write(&out, "stale contents that should vanish").unwrap();

    let opts = SpawnOptions::new().stdin(&input).stdout(&out).stderr(&err);
    let child = Process::spawn("/bin/sh", ["-c", "cat; echo warn >&2"], &opts).unwrap();
    assert_eq!(child.wait().unwrap(), 0);

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "from file\n");
    assert_eq!(std::fs::read_to_string(&err).unwrap(), "warn\n");
}

#[test]
fn test_missing_stdin_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let opts = SpawnOptions::new().stdin(dir.path().join("missing"));
    let script = format!("touch {}", marker.display());

    let err = Process::spawn("/bin/sh", ["-c", script.as_str()], &opts).unwrap_err();
    assert!(matches!(err, ProcessError::RedirectFailed { .. }));
    std::thread::sleep(Duration::from_millis(100));
    assert!(!marker.exists());
}

#[test]
fn test_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("pwd.txt");
    let opts = SpawnOptions::new().working_dir(dir.path()).stdout(&out);
    let child = Process::spawn("/bin/sh", ["-c", "pwd -P"], &opts).unwrap();
    assert_eq!(child.wait().unwrap(), 0);

    let printed = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        std::path::Path::new(printed.trim()),
        dir.path().canonicalize().unwrap()
    );
}

#[test]
fn test_missing_working_dir_exits_127() {
    let opts = SpawnOptions::new().working_dir("/definitely/not/a/dir");
    let child = Process::spawn("/bin/sh", ["-c", "exit 0"], &opts).unwrap();
    assert_eq!(child.wait().unwrap(), 127);
}

#[test]
fn test_explicit_environment() {
    let opts = SpawnOptions::new().env("KIT_TEST_VAR", "value with spaces");
    let mut child = Process::spawn_piped(
        "sh",
        ["-c", r#"printf '%s|%s' "$KIT_TEST_VAR" "${HOME-unset}""#],
        &opts,
    )
    .unwrap();
    let (out, _) = drain(&mut child);
    assert_eq!(out, b"value with spaces|unset");
    assert_eq!(child.wait().unwrap(), 0);
}
