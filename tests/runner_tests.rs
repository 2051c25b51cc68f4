//! Tests against real child processes.

mod test_harness;

use std::time::Duration;

use procsched::config::Policy;
use procsched::metrics::CsvSink;
use procsched::scheduler::Engine;
use procsched::worker::{JobHandle, JobRunner, PollStatus, ProcessRunner, RunnerError};
use test_harness::{assert_invariants, dispatches_of, ms, offline, record_of};

async fn wait_for_exit(runner: &mut ProcessRunner, handle: JobHandle) -> PollStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match runner.poll(handle).unwrap() {
            PollStatus::Running => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "process did not exit in time"
                );
                tokio::time::sleep(ms(5)).await;
            }
            exited => return exited,
        }
    }
}

#[tokio::test]
async fn test_spawn_and_reap_success() {
    let mut runner = ProcessRunner::new();
    let handle = runner.spawn("true").unwrap();
    assert!(runner.pid(handle).is_some());

    let status = wait_for_exit(&mut runner, handle).await;
    assert_eq!(
        status,
        PollStatus::Exited {
            success: true,
            code: Some(0)
        }
    );
    assert_eq!(runner.live(), 0);
}

#[tokio::test]
async fn test_nonzero_exit_is_reported() {
    let mut runner = ProcessRunner::new();
    let handle = runner.spawn("exit 3").unwrap();

    let status = wait_for_exit(&mut runner, handle).await;
    assert_eq!(
        status,
        PollStatus::Exited {
            success: false,
            code: Some(3)
        }
    );
}

#[tokio::test]
async fn test_missing_shell_fails_to_spawn() {
    let mut runner = ProcessRunner::with_shell("/nonexistent/shell");
    let result = runner.spawn("true");
    assert!(matches!(result, Err(RunnerError::Spawn { .. })));
}

#[tokio::test]
async fn test_unknown_handle_is_lost() {
    let mut runner = ProcessRunner::new();
    assert!(matches!(
        runner.poll(JobHandle(42)),
        Err(RunnerError::Lost { .. })
    ));
    assert!(matches!(
        runner.resume(JobHandle(42)),
        Err(RunnerError::Lost { .. })
    ));
}

#[tokio::test]
async fn test_suspended_process_does_not_exit() {
    let mut runner = ProcessRunner::new();
    let handle = runner.spawn("sleep 0.1").unwrap();
    runner.suspend(handle).unwrap();

    tokio::time::sleep(ms(300)).await;
    assert_eq!(runner.poll(handle).unwrap(), PollStatus::Running);

    runner.resume(handle).unwrap();
    let status = wait_for_exit(&mut runner, handle).await;
    assert!(matches!(status, PollStatus::Exited { success: true, .. }));
}

/// A command whose work happens in a forked grandchild: the inner shell
/// touches `marker` after a short sleep while the outer one waits.
fn forked_touch(marker: &std::path::Path) -> String {
    format!("sh -c 'sleep 0.2; touch {}'; true", marker.display())
}

#[tokio::test]
async fn test_suspend_stops_forked_children() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("touched");

    let mut runner = ProcessRunner::new();
    let handle = runner.spawn(&forked_touch(&marker)).unwrap();
    tokio::time::sleep(ms(50)).await;
    runner.suspend(handle).unwrap();

    tokio::time::sleep(ms(600)).await;
    assert!(!marker.exists(), "grandchild kept running while suspended");
    assert_eq!(runner.poll(handle).unwrap(), PollStatus::Running);

    runner.resume(handle).unwrap();
    let status = wait_for_exit(&mut runner, handle).await;
    assert!(matches!(status, PollStatus::Exited { success: true, .. }));
    assert!(marker.exists());
}

#[tokio::test]
async fn test_dropping_runner_kills_whole_group() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("touched");

    let mut runner = ProcessRunner::new();
    runner.spawn(&forked_touch(&marker)).unwrap();
    tokio::time::sleep(ms(50)).await;
    drop(runner);

    tokio::time::sleep(ms(600)).await;
    assert!(!marker.exists(), "grandchild outlived the runner");
}

#[tokio::test]
async fn test_round_robin_over_real_processes() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("result.csv");

    let config = offline(Policy::RoundRobin).with_quantum(ms(20));
    let mut engine = Engine::new(config, ProcessRunner::new())
        .unwrap()
        .with_sink(CsvSink::create(&csv).unwrap());
    for cmd in ["sleep 0.1", "true", "exit 1", "no_such_command_procsched"] {
        engine.admit(cmd).unwrap();
    }

    let summary = engine.run_to_completion().await.unwrap();

    assert_eq!(summary.completions.len(), 4);
    assert!(record_of(&summary, "sleep 0.1").finished());
    assert!(record_of(&summary, "true").finished());
    assert!(record_of(&summary, "exit 1").error());
    // sh reports 127 for an unknown command
    assert!(record_of(&summary, "no_such_command_procsched").error());

    assert!(dispatches_of(&summary, "sleep 0.1").len() >= 2);
    assert_eq!(engine.runner().live(), 0);
    assert_invariants(&summary);

    let text = std::fs::read_to_string(&csv).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], procsched::metrics::CSV_HEADER);
    assert!(lines.iter().any(|l| l.starts_with("\"exit 1\",No,Yes,")));
}
