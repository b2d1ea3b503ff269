//! End-to-end proxy scenarios, run against real backends rather than mocked
//! ones: a loopback HTTP server, `/bin/sh`, and the lock-file state machine
//! that gates container launches.

use std::collections::BTreeMap;

use mcpadre_core::backend::container::ContainerBackend;
use mcpadre_core::backend::shell::ShellBackend;
use mcpadre_core::config::{ContainerServer, ShellServer};
use mcpadre_core::container_lock::{ContainerLock, ContainerLockError, ContainerLockManager};
use mcpadre_core::context::{Context, Workspace};
use mcpadre_core::interceptor::Pipeline;
use mcpadre_core::jsonrpc::{JsonRpcMessage, JsonRpcRequest, RequestId};
use mcpadre_core::sandbox::SandboxPolicy;
use mcpadre_core::{Backend, SessionExit, SessionManager};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn echo_request() -> JsonRpcMessage {
    JsonRpcMessage::Request(JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: RequestId::Number(1),
        method: "ping".to_string(),
        params: None,
    })
}

/// A single-shot raw HTTP server that reads one request and replies with a
/// fixed JSON-RPC response body, just enough of HTTP/1.1 to exercise
/// [`mcpadre_core::backend::http::HttpBackend`] without a mocking crate.
async fn serve_one_echo(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = vec![0u8; 4096];
    // A bare read is enough: the test client sends a small, complete body in
    // one write and then awaits the response.
    let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await.unwrap();

    let body = r#"{"jsonrpc":"2.0","id":1,"result":{"pong":true}}"#;
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();
}

/// S1: a request POSTed to a streamable-HTTP server comes back decoded as the
/// matching JSON-RPC response.
#[tokio::test]
async fn s1_http_backend_round_trips_a_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_one_echo(listener));

    let mut backend = mcpadre_core::backend::http::HttpBackend::new(
        format!("http://{addr}/"),
        BTreeMap::new(),
    )
    .unwrap();

    backend.send(echo_request()).await.unwrap();
    let response = backend.recv().await.unwrap().expect("a response was queued");
    match response {
        JsonRpcMessage::Response(resp) => {
            assert_eq!(resp.id, Some(RequestId::Number(1)));
            assert_eq!(resp.result.unwrap()["pong"], true);
        }
        other => panic!("expected a response, got {other:?}"),
    }

    server.await.unwrap();
}

/// S2: a shell server running `cat` echoes back whatever JSON-RPC line the
/// session writes to its stdin, proxied through [`SessionManager`] end to
/// end over an in-memory duplex pipe standing in for the host's stdio.
#[tokio::test]
async fn s2_shell_backend_passthrough_via_cat() {
    let workspace = Workspace::project(std::env::temp_dir());
    let ctx = Context::new(workspace, std::collections::HashMap::new());

    let server = ShellServer {
        command: "cat".to_string(),
        cwd: None,
    };
    let policy = SandboxPolicy::default();
    let backend = ShellBackend::spawn(&server, BTreeMap::new(), &policy, &ctx, None).await.unwrap();

    let (mut host_side, session_side) = tokio::io::duplex(4096);
    let (session_reader, session_writer) = tokio::io::split(session_side);
    let mut session = SessionManager::new(session_reader, session_writer, Box::new(backend), Pipeline::new());

    let run_handle = tokio::spawn(async move { session.run().await });

    let line = echo_request().to_line().unwrap();
    host_side.write_all(line.as_bytes()).await.unwrap();

    let mut response_line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut host_side, &mut byte).await.unwrap();
        if byte[0] == b'\n' {
            break;
        }
        response_line.push(byte[0]);
    }
    let response: serde_json::Value = serde_json::from_slice(&response_line).unwrap();
    assert_eq!(response["method"], "ping");

    drop(host_side);
    let exit = run_handle.await.unwrap().unwrap();
    assert_eq!(exit, SessionExit::Completed);
}

/// S3: a lock recorded against one tag is fatal to resolve against a
/// different configured tag, and that failure surfaces before any attempt to
/// locate a container runtime binary on `PATH` — so this assertion holds
/// even on a machine with neither `docker` nor `podman` installed.
#[tokio::test]
async fn s3_tag_mismatch_aborts_before_touching_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("lock.json");
    let manager = ContainerLockManager::new(&lock_path);
    manager
        .record(
            "demo",
            ContainerLock {
                image: "ghcr.io/example/demo".to_string(),
                tag: "v1".to_string(),
                digest: "sha256:aaaa".to_string(),
                pull_when_digest_changes: false,
            },
        )
        .unwrap();

    let server = ContainerServer {
        image: "ghcr.io/example/demo".to_string(),
        tag: "v2".to_string(),
        pull_when_digest_changes: None,
        command: None,
        volumes: BTreeMap::new(),
    };
    let sandbox = SandboxPolicy::default();

    let vars = mcpadre_core::template::Variables::default();
    let err = ContainerBackend::spawn(
        "demo",
        &server,
        dir.path(),
        &manager,
        BTreeMap::new(),
        &sandbox,
        &vars,
        dir.path(),
        None,
    )
    .await
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("does not match configured tag"), "{message}");
}

/// Sanity check for the S3 fixture itself: [`mcpadre_core::container_lock::decide`]
/// is what actually raises `TagMismatch`, independent of the backend plumbing.
#[test]
fn s3_decide_raises_tag_mismatch_without_a_runtime_lookup() {
    let locked = ContainerLock {
        image: "ghcr.io/example/demo".to_string(),
        tag: "v1".to_string(),
        digest: "sha256:aaaa".to_string(),
        pull_when_digest_changes: false,
    };
    let err = mcpadre_core::container_lock::decide(Some(&locked), "ghcr.io/example/demo", "v2", false).unwrap_err();
    assert!(matches!(err, ContainerLockError::TagMismatch { .. }));
}

/// S6: a malformed JSON-RPC line on the host side gets a synthesized parse
/// error response (id `null`) and the session keeps running for the next,
/// well-formed line rather than dying.
#[tokio::test]
async fn s6_malformed_line_gets_parse_error_and_session_continues() {
    let workspace = Workspace::project(std::env::temp_dir());
    let ctx = Context::new(workspace, std::collections::HashMap::new());
    let server = ShellServer {
        command: "cat".to_string(),
        cwd: None,
    };
    let policy = SandboxPolicy::default();
    let backend = ShellBackend::spawn(&server, BTreeMap::new(), &policy, &ctx, None).await.unwrap();

    let (mut host_side, session_side) = tokio::io::duplex(4096);
    let (session_reader, session_writer) = tokio::io::split(session_side);
    let mut session = SessionManager::new(session_reader, session_writer, Box::new(backend), Pipeline::new());
    let run_handle = tokio::spawn(async move { session.run().await });

    host_side.write_all(b"not json at all\n").await.unwrap();

    let mut first_line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut host_side, &mut byte).await.unwrap();
        if byte[0] == b'\n' {
            break;
        }
        first_line.push(byte[0]);
    }
    let parse_error: serde_json::Value = serde_json::from_slice(&first_line).unwrap();
    assert_eq!(parse_error["id"], serde_json::Value::Null);
    assert_eq!(parse_error["error"]["code"], -32700);

    // The session is still alive: a well-formed request now round-trips.
    let line = echo_request().to_line().unwrap();
    host_side.write_all(line.as_bytes()).await.unwrap();
    let mut second_line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut host_side, &mut byte).await.unwrap();
        if byte[0] == b'\n' {
            break;
        }
        second_line.push(byte[0]);
    }
    let echoed: serde_json::Value = serde_json::from_slice(&second_line).unwrap();
    assert_eq!(echoed["method"], "ping");

    drop(host_side);
    let exit = run_handle.await.unwrap().unwrap();
    assert_eq!(exit, SessionExit::Completed);
}
