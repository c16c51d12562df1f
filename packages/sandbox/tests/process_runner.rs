// ABOUTME: Tests for the tokio-backed process runner against the host shell
// ABOUTME: Covers argv passing, exit codes, stdin piping and cancellation

use std::io;
use std::time::{Duration, Instant};

use reelbox_sandbox::providers::{ProcessRunner, TokioProcessRunner};

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_captures_stdout_and_exit_code() {
    let runner = TokioProcessRunner;

    let ok = runner
        .run("sh", &args(&["-c", "echo hello; echo oops >&2"]), None)
        .await
        .unwrap();
    assert!(ok.success());
    assert_eq!(ok.stdout_text(), "hello\n");
    assert_eq!(ok.stderr_text(), "oops");

    let failed = runner.run("sh", &args(&["-c", "exit 3"]), None).await.unwrap();
    assert_eq!(failed.code, Some(3));
    assert!(!failed.success());
}

#[tokio::test]
async fn test_arguments_are_not_reinterpreted() {
    let output = TokioProcessRunner
        .run(
            "sh",
            &args(&["-c", "printf '%s' \"$1\"", "sh", "a b; rm -rf / $(whoami)"]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(output.stdout_text(), "a b; rm -rf / $(whoami)");
}

#[tokio::test]
async fn test_stdin_is_piped_and_closed() {
    let output = TokioProcessRunner
        .run("cat", &[], Some(b"piped content"))
        .await
        .unwrap();
    assert!(output.success());
    assert_eq!(output.stdout, b"piped content");
}

#[tokio::test]
async fn test_large_stdin_does_not_deadlock() {
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let output = TokioProcessRunner
        .run("cat", &[], Some(&payload))
        .await
        .unwrap();
    assert_eq!(output.stdout.len(), payload.len());
    assert_eq!(output.stdout, payload);
}

#[tokio::test]
async fn test_child_ignoring_stdin_is_fine() {
    let payload = vec![b'x'; 1024 * 1024];
    let output = TokioProcessRunner
        .run("sh", &args(&["-c", "exit 0"]), Some(&payload))
        .await
        .unwrap();
    assert!(output.success());
}

#[tokio::test]
async fn test_missing_program_is_not_found() {
    let err = TokioProcessRunner
        .run("reelbox-definitely-not-installed", &[], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[tokio::test]
async fn test_timeout_drops_the_child() {
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(100),
        TokioProcessRunner.run("sleep", &args(&["10"]), None),
    )
    .await;
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}
