//! Integration tests for stdio-bridge.

mod common;
mod process;
mod rpc;

use std::sync::Arc;

/// Verify the public types are exported from the library.
#[test]
fn test_public_types_exported() {
    use stdio_bridge::bridge::{Bridge, DispatchError};
    use stdio_bridge::config::{AuthConfig, AuthMode, BridgeConfig, ConfigLoader};
    use stdio_bridge::http::{AppState, HttpServer, ServerError};
    use stdio_bridge::process::{
        ChildCommand, ExitKind, ProcessState, ProcessSupervisor, RestartPolicy, SpawnError,
    };
    use stdio_bridge::rpc::{BridgeError, Correlator, Envelope, LineFramer, RequestId};

    let _ = BridgeConfig::default();
    let _ = ConfigLoader::new();
    let _ = AuthMode::Header;
    let _ = LineFramer::new();
    let _ = RequestId::from(1);
    let _ = ExitKind::Clean;
    let _ = ProcessState::Stopped;
    let _ = RestartPolicy::never();
    let _: fn() -> SpawnError = || SpawnError::AlreadyRunning;
    let _: fn() -> ServerError = || ServerError::Serve(std::io::Error::other("x"));
    let _: fn() -> DispatchError = || DispatchError {
        id: None,
        error: BridgeError::ProcessUnavailable,
    };
    assert!(Envelope::parse(serde_json::json!({"jsonrpc": "2.0"})).is_ok());

    let supervisor = Arc::new(ProcessSupervisor::new(
        ChildCommand::new("cat"),
        Arc::new(Correlator::default()),
    ));
    let bridge = Arc::new(Bridge::new(supervisor));
    let state = AppState::new(Arc::clone(&bridge), AuthConfig::default(), "svc");
    let server = HttpServer::new(state.bridge, AuthConfig::default());
    assert_eq!(server.address(), "0.0.0.0:8080");
}
