//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stdio_bridge::process::{ChildCommand, ProcessSupervisor, RestartPolicy};
use stdio_bridge::rpc::Correlator;

/// Answers every request line with a result that echoes the request.
pub const RESPONDER: &str = r#"while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([^,}]*\).*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":%s}}\n' "$id" "$line"
done"#;

/// Reads requests and never answers.
pub const SILENT: &str = "cat > /dev/null";

pub fn sh(script: &str) -> ChildCommand {
    ChildCommand::new("sh").args(["-c", script])
}

pub fn supervisor(command: ChildCommand, timeout: Duration) -> Arc<ProcessSupervisor> {
    Arc::new(
        ProcessSupervisor::new(command, Arc::new(Correlator::new(timeout)))
            .with_restart_policy(RestartPolicy::never()),
    )
}

/// Poll `condition` every 10ms until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
