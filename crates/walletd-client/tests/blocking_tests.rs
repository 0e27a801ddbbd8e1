//! Blocking client driven from plain threads and from inside runtimes.

mod support;

use std::fs;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use serde_json::json;
use support::FakeDaemon;
use tempfile::TempDir;
use walletd_client::{BlockingClient, Bridge, ClientError, WalletClient};
use walletd_core::types::Params;

#[test]
fn test_blocking_invoke_from_main_thread() {
    let daemon = FakeDaemon::start();
    daemon.reply("getbalance", json!({"confirmed": "0.5"}));
    let client = BlockingClient::new(daemon.config()).unwrap();

    let balance = client.invoke("getbalance", Params::new()).unwrap();
    assert_eq!(balance["confirmed"], json!("0.5"));

    let method = client.method("getbalance");
    assert_eq!(client.call(&method, Params::new()).unwrap(), balance);

    // Both calls ran in the bridge's main context.
    assert_eq!(client.async_client().pool().len(), 1);
    assert_eq!(client.close(), 1);
}

#[test]
fn test_blocking_errors_are_mapped() {
    let daemon = FakeDaemon::start();
    daemon.fail("getbalance", -32600, "nope");
    let client = BlockingClient::new(daemon.config()).unwrap();

    let err = client.invoke("getbalance", Params::new()).unwrap_err();
    assert!(err.is_kind("UnauthorizedError"));
    assert_eq!(client.spec().unwrap().version, "1.0");
}

#[test]
fn test_blocking_invoke_from_other_thread_shares_main_session() {
    let daemon = FakeDaemon::start();
    daemon.reply("help", json!([]));
    let client = Arc::new(BlockingClient::new(daemon.config()).unwrap());

    client.invoke("help", Params::new()).unwrap();
    let worker = {
        let client = client.clone();
        std::thread::spawn(move || client.invoke("help", Params::new()))
    };
    worker.join().unwrap().unwrap();

    assert_eq!(daemon.requests().len(), 2);
    assert_eq!(client.async_client().pool().len(), 1);
}

#[test]
fn test_concurrent_blocking_calls_from_two_threads() {
    let daemon = FakeDaemon::start();
    daemon.reply("getbalance", json!({"confirmed": "1.0"}));
    let client = Arc::new(BlockingClient::new(daemon.config()).unwrap());
    let start = Arc::new(Barrier::new(2));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let client = client.clone();
            let start = start.clone();
            std::thread::spawn(move || {
                start.wait();
                client.invoke("getbalance", Params::new())
            })
        })
        .collect();
    for worker in workers {
        let balance = worker.join().unwrap().unwrap();
        assert_eq!(balance["confirmed"], json!("1.0"));
    }

    assert_eq!(daemon.requests().len(), 2);
    // Both calls were driven by the bridge under its main context.
    let pool = client.async_client().pool();
    assert_eq!(pool.len(), 1);
    assert_eq!(
        pool.session_for(client.bridge().context()).unwrap().context(),
        client.bridge().context()
    );
    assert_eq!(client.close(), 1);
}

#[test]
fn test_collect_updates_drains_one_connection() {
    let daemon = FakeDaemon::start();
    daemon.script_ws(&[
        r#"{"updates": [{"event": "new_block", "height": 1}]}"#,
        r#"{"updates": [{"event": "new_block", "height": 2}]}"#,
        r#"{"updates": [{"event": "new_block", "height": 3}]}"#,
    ]);
    let client = BlockingClient::new(daemon.config()).unwrap();

    let batches = client.collect_updates(10).unwrap();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2].updates[0]["height"], json!(3));

    let first_two = client.collect_updates(2).unwrap();
    assert_eq!(first_two.len(), 2);
}

#[test]
fn test_spawned_websocket_runs_in_background() {
    let daemon = FakeDaemon::start();
    let client = BlockingClient::new(daemon.config()).unwrap();

    let handle = client
        .spawn_websocket(walletd_client::StreamOptions::from_config(client.config()))
        .unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while daemon.ws_connections() < 2 {
        assert!(std::time::Instant::now() < deadline, "websocket never reconnected");
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.shutdown();
    client
        .bridge()
        .block_on({
            let handle = handle.clone();
            async move { handle.wait_for(walletd_client::DeliveryState::Closed).await }
        })
        .unwrap();
}

#[test]
fn test_blocking_client_from_file() {
    let daemon = FakeDaemon::start();
    daemon.reply("version", json!("4.5.5"));
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("walletd.yaml");
    fs::write(
        &path,
        format!("url: {}\nuser: electrum\npassword: electrumz\n", daemon.url()),
    )
    .unwrap();

    let client = BlockingClient::from_file(&path).unwrap();
    assert_eq!(client.invoke("version", Params::new()).unwrap(), json!("4.5.5"));
    assert!(client.config().xpub.is_none());
    assert!(daemon.requests()[0].body.get("xpub").is_none());
}

#[test]
fn test_from_file_missing_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    match BlockingClient::from_file(&temp_dir.path().join("missing.yaml")) {
        Err(ClientError::Config(_)) => (),
        other => panic!("Expected Config error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_blocking_call_on_current_thread_runtime_would_block() {
    let daemon = FakeDaemon::start();
    daemon.reply("help", json!([]));
    let client = BlockingClient::with_bridge(
        WalletClient::new(daemon.config()).unwrap(),
        Bridge::current().unwrap(),
    );

    match client.invoke("help", Params::new()) {
        Err(ClientError::WouldBlock) => (),
        other => panic!("Expected WouldBlock, got {:?}", other),
    }
    assert!(daemon.requests().is_empty());

    // The async path still works on the same runtime.
    let bridge = client.bridge().clone();
    let inner = client.async_client().clone();
    let result = bridge
        .run(async move { inner.invoke("help", Params::new()).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, json!([]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_call_on_multi_thread_runtime() {
    let daemon = FakeDaemon::start();
    daemon.reply("help", json!(["ok"]));
    let client = BlockingClient::new(daemon.config()).unwrap();
    assert_eq!(client.invoke("help", Params::new()).unwrap(), json!(["ok"]));
}
