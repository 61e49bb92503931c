//! End-to-end runs against real child processes.

#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use tfengine_core::{
    Chunking, CollectingSink, EngineConfig, ExecutionRequest, ResponseUnit, StreamKind,
};
use tfengine_engine::Engine;

fn fake_terraform() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/terraform.sh")
}

fn terraform(args: &[&str]) -> ExecutionRequest {
    ExecutionRequest::new("sh")
        .arg(fake_terraform().to_string_lossy())
        .args(args.iter().copied())
}

fn assert_terminal_last(responses: &[ResponseUnit]) {
    let (last, rest) = responses.split_last().expect("at least one response");
    assert!(last.is_terminal());
    assert!(rest.iter().all(|unit| !unit.is_terminal()));
}

#[tokio::test]
async fn test_help_streams_usage_banner() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();

    engine
        .run(terraform(&["--help"]).with_env("FOO", "bar"), &mut sink)
        .await
        .unwrap();

    assert_terminal_last(sink.responses());
    assert!(
        sink.stdout()
            .contains("Usage: terraform [global options] <subcommand> [args]")
    );
    assert_eq!(sink.result_code(), Some(0));
}

#[tokio::test]
async fn test_unknown_subcommand_reports_on_stderr() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();

    engine
        .run(terraform(&["not-a-valid-command"]), &mut sink)
        .await
        .unwrap();

    assert_terminal_last(sink.responses());
    assert!(
        sink.stderr()
            .contains("Terraform has no command named \"not-a-valid-command\"")
    );
    assert_ne!(sink.result_code(), Some(0));
    assert!(sink.result_code().is_some());
}

#[tokio::test]
async fn test_env_reaches_child() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();

    engine
        .run(terraform(&["env"]).with_env("FOO", "bar"), &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.stdout(), "FOO=bar\n");
}

#[tokio::test]
async fn test_lines_keep_order_within_each_stream() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();
    let script = r#"i=0; while [ $i -lt 200 ]; do echo "out $i"; echo "err $i" >&2; i=$((i+1)); done"#;

    engine
        .run(ExecutionRequest::new("sh").args(["-c", script]), &mut sink)
        .await
        .unwrap();

    let lines = |stream: StreamKind| -> Vec<String> {
        sink.responses()
            .iter()
            .filter_map(|unit| match unit {
                ResponseUnit::Output(chunk) if chunk.stream == stream => Some(chunk.data.clone()),
                _ => None,
            })
            .collect()
    };

    let expected_out: Vec<String> = (0..200).map(|i| format!("out {i}\n")).collect();
    let expected_err: Vec<String> = (0..200).map(|i| format!("err {i}\n")).collect();
    assert_eq!(lines(StreamKind::Stdout), expected_out);
    assert_eq!(lines(StreamKind::Stderr), expected_err);
    assert_terminal_last(sink.responses());
}

#[tokio::test]
async fn test_heavy_output_on_both_streams_does_not_deadlock() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();
    // Well past a typical 64 KiB pipe buffer on each stream.
    let script = r#"i=0; while [ $i -lt 20000 ]; do echo "stdout line $i"; echo "stderr line $i" >&2; i=$((i+1)); done; exit 4"#;

    let run = engine.run(ExecutionRequest::new("sh").args(["-c", script]), &mut sink);
    tokio::time::timeout(Duration::from_secs(60), run)
        .await
        .expect("run finished")
        .unwrap();

    assert_eq!(sink.stdout().lines().count(), 20000);
    assert_eq!(sink.stderr().lines().count(), 20000);
    assert_eq!(sink.result_code(), Some(4));
}

#[tokio::test]
async fn test_raw_chunking_delivers_full_content() {
    let engine = Engine::new(EngineConfig::default().with_chunking(Chunking::Raw));
    let mut sink = CollectingSink::new();

    engine
        .run(
            ExecutionRequest::new("sh").args(["-c", "printf 'a\\nb'; printf 'no newline' >&2"]),
            &mut sink,
        )
        .await
        .unwrap();

    assert_eq!(sink.stdout(), "a\nb");
    assert_eq!(sink.stderr(), "no newline");
    assert_eq!(sink.result_code(), Some(0));
}

#[tokio::test]
async fn test_cancellation_kills_child_and_still_terminates() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();
    let request = ExecutionRequest::new("sh").args(["-c", "echo started; exec sleep 30"]);

    let run = engine.run_until(
        request,
        &mut sink,
        tokio::time::sleep(Duration::from_millis(500)),
    );
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("cancelled run finished")
        .unwrap();

    assert_terminal_last(sink.responses());
    assert_eq!(sink.stdout(), "started\n");
    assert_eq!(sink.result_code(), Some(128 + 9));
}

#[tokio::test]
async fn test_cancellation_with_background_grandchild_still_terminates() {
    let engine = Engine::default();
    let mut sink = CollectingSink::new();
    // The backgrounded sleep inherits both pipes and outlives the kill.
    let request =
        ExecutionRequest::new("sh").args(["-c", "sleep 12 & echo started; exec sleep 30"]);

    let started = std::time::Instant::now();
    let run = engine.run_until(
        request,
        &mut sink,
        tokio::time::sleep(Duration::from_millis(300)),
    );
    tokio::time::timeout(Duration::from_secs(8), run)
        .await
        .expect("run finished while a grandchild held the pipes")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(8));
    assert_terminal_last(sink.responses());
    assert_eq!(sink.stdout(), "started\n");
    assert_eq!(sink.result_code(), Some(128 + 9));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let engine = Engine::default();
    let mut first = CollectingSink::new();
    let mut second = CollectingSink::new();

    let slow = ExecutionRequest::new("sh").args(["-c", "sleep 1; echo slow; exit 2"]);
    let fast = ExecutionRequest::new("sh").args(["-c", "echo fast"]);

    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(engine.run(slow, &mut first), async {
        let result = engine.run(fast, &mut second).await;
        (result, started.elapsed())
    });
    a.unwrap();
    let (b, fast_elapsed) = b;
    b.unwrap();

    assert!(fast_elapsed < Duration::from_millis(900));
    assert_eq!(first.stdout(), "slow\n");
    assert_eq!(first.result_code(), Some(2));
    assert_eq!(second.stdout(), "fast\n");
    assert_eq!(second.result_code(), Some(0));
}

#[tokio::test]
async fn test_runs_can_be_spawned_on_the_runtime() {
    let engine = std::sync::Arc::new(Engine::default());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut sink = CollectingSink::new();
                let request = ExecutionRequest::new("sh").args(["-c", &format!("echo {i}; exit {i}")]);
                let result = engine.run(request, &mut sink).await;
                result.map(|()| sink)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let sink = handle.await.unwrap().unwrap();
        assert_eq!(sink.stdout(), format!("{i}\n"));
        assert_eq!(sink.result_code(), Some(i as i32));
    }
}
