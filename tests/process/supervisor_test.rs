//! Supervision tests against real child processes.

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use stdio_bridge::process::{
    ChildCommand, ProcessState, ProcessSupervisor, RestartPolicy, DEFAULT_STOP_TIMEOUT,
};
use stdio_bridge::rpc::{BridgeError, Correlator, RequestId};

use crate::common::{eventually, sh, supervisor, SILENT};

fn restarting(command: ChildCommand, max_attempts: Option<u32>) -> Arc<ProcessSupervisor> {
    restarting_after(command, Duration::from_millis(100), max_attempts)
}

fn restarting_after(
    command: ChildCommand,
    delay: Duration,
    max_attempts: Option<u32>,
) -> Arc<ProcessSupervisor> {
    Arc::new(
        ProcessSupervisor::new(command, Arc::new(Correlator::new(Duration::from_secs(5))))
            .with_restart_policy(RestartPolicy {
                delay,
                max_attempts,
            }),
    )
}

fn sigkill(pid: u32) {
    kill(Pid::from_raw(i32::try_from(pid).unwrap()), Signal::SIGKILL).unwrap();
}

#[tokio::test]
async fn echoed_line_resolves_pending_request() {
    let supervisor = supervisor(ChildCommand::new("cat"), Duration::from_secs(5));
    supervisor.start().await.unwrap();

    let pending = supervisor
        .correlator()
        .register(RequestId::Number(1))
        .unwrap();
    let line = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n".to_vec();
    supervisor.send(RequestId::Number(1), line).await.unwrap();

    let response = pending.wait().await.unwrap();
    assert_eq!(response["method"], json!("ping"));

    supervisor.stop(DEFAULT_STOP_TIMEOUT).await;
}

#[tokio::test]
async fn stop_terminates_child_without_restart() {
    let supervisor = restarting(ChildCommand::new("cat"), None);
    supervisor.start().await.unwrap();
    assert!(supervisor.pid().is_some());

    supervisor.stop(DEFAULT_STOP_TIMEOUT).await;

    assert_eq!(supervisor.state(), ProcessState::Stopped);
    assert!(supervisor.pid().is_none());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.state(), ProcessState::Stopped);
    assert_eq!(supervisor.restart_count(), 0);
}

#[tokio::test]
async fn killed_child_fails_pending_and_restarts() {
    let supervisor = restarting(sh(SILENT), None);
    supervisor.start().await.unwrap();
    let first_pid = supervisor.pid().unwrap();

    let pending = supervisor
        .correlator()
        .register(RequestId::from("in-flight"))
        .unwrap();
    let line = b"{\"jsonrpc\":\"2.0\",\"id\":\"in-flight\"}\n".to_vec();
    supervisor
        .send(RequestId::from("in-flight"), line)
        .await
        .unwrap();

    sigkill(first_pid);

    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, BridgeError::ChildExited(_)), "got {err:?}");

    let restarted = eventually(Duration::from_secs(5), || {
        supervisor.is_healthy() && supervisor.pid().is_some_and(|pid| pid != first_pid)
    })
    .await;
    assert!(restarted, "child was not restarted");
    assert_eq!(supervisor.restart_count(), 1);

    supervisor.stop(DEFAULT_STOP_TIMEOUT).await;
}

#[tokio::test]
async fn pending_requests_fail_before_restart_begins() {
    let supervisor = restarting_after(sh(SILENT), Duration::from_millis(300), None);
    supervisor.start().await.unwrap();
    let mut states = supervisor.subscribe();
    let first_pid = supervisor.pid().unwrap();

    let pending = supervisor
        .correlator()
        .register(RequestId::Number(11))
        .unwrap();
    let line = b"{\"jsonrpc\":\"2.0\",\"id\":11}\n".to_vec();
    supervisor.send(RequestId::Number(11), line).await.unwrap();

    sigkill(first_pid);

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ProcessState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    let mut pending_at_restart = None;
    let correlator = Arc::clone(supervisor.correlator());
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| {
            if *s == ProcessState::Stopped {
                return false;
            }
            pending_at_restart = Some(correlator.pending_count());
            true
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(pending_at_restart, Some(0));
    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, BridgeError::ChildExited(_)), "got {err:?}");

    supervisor.stop(DEFAULT_STOP_TIMEOUT).await;
}

#[tokio::test]
async fn clean_exit_is_not_restarted() {
    let supervisor = restarting(sh("exit 0"), None);
    supervisor.start().await.unwrap();

    let stopped = eventually(Duration::from_secs(5), || {
        supervisor.state() == ProcessState::Stopped
    })
    .await;
    assert!(stopped);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.state(), ProcessState::Stopped);
    assert_eq!(supervisor.restart_count(), 0);
}

#[tokio::test]
async fn failing_child_stops_after_max_attempts() {
    let supervisor = restarting(sh("exit 3"), Some(2));
    supervisor.start().await.unwrap();

    let gave_up = eventually(Duration::from_secs(5), || {
        supervisor.restart_count() == 2 && supervisor.state() == ProcessState::Stopped
    })
    .await;
    assert!(gave_up);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.restart_count(), 2);
    assert_eq!(supervisor.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn send_after_exit_is_unavailable() {
    let supervisor = supervisor(sh("exit 0"), Duration::from_secs(5));
    supervisor.start().await.unwrap();

    let stopped = eventually(Duration::from_secs(5), || !supervisor.is_healthy()).await;
    assert!(stopped);

    let err = supervisor
        .send(RequestId::Number(1), b"{}\n".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::ProcessUnavailable);
}

#[tokio::test]
async fn state_changes_are_observable() {
    let supervisor = supervisor(ChildCommand::new("cat"), Duration::from_secs(5));
    let mut states = supervisor.subscribe();
    assert_eq!(*states.borrow(), ProcessState::Stopped);

    supervisor.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| s.is_healthy()))
        .await
        .unwrap()
        .unwrap();

    supervisor.stop(DEFAULT_STOP_TIMEOUT).await;
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ProcessState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();
}
