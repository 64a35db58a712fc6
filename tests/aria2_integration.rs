//! Integration tests for the aria2 JSON-RPC backend against a mock endpoint.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gamegrab_core::{
    Aria2Connector, ClientConnector, ClientError, ClientEvent, Database, EngineOptions,
    ProgressPublisher, TransferClient, TransferEngine, TransferEvent, TransferHandle,
    TransferStatus, TransferStore,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::fake_client::wait_for_event;
use support::socket_guard::start_mock_server_or_skip;

const GID: &str = "2089b05ecca3d829";
const RETRY_GID: &str = "d270c8a6c1a8b1f2";
const HASH: &str = "0123456789abcdef0123456789abcdef01234567";
const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567";

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "1",
        "jsonrpc": "2.0",
        "result": result,
    }))
}

async fn mount_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response)
        .mount(server)
        .await;
}

fn connector(server: &MockServer, secret: Option<&str>) -> Aria2Connector {
    Aria2Connector::new(
        format!("{}/jsonrpc", server.uri()),
        secret.map(str::to_string),
    )
    .with_poll_interval(Duration::from_millis(20))
}

fn completed_status(dir: &Path) -> Value {
    json!({
        "gid": GID,
        "status": "complete",
        "totalLength": "1000",
        "completedLength": "1000",
        "downloadSpeed": "0",
        "uploadSpeed": "0",
        "connections": "0",
        "numSeeders": "0",
        "dir": dir.display().to_string(),
        "bittorrent": { "info": { "name": "Example Game" } },
    })
}

#[tokio::test]
async fn test_connect_checks_version_and_sends_secret() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.getVersion",
            "params": ["token:s3cret"],
        })))
        .respond_with(rpc_result(json!({ "version": "1.37.0", "enabledFeatures": [] })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(connector(&server, Some("s3cret")).connect().await.is_ok());
}

#[tokio::test]
async fn test_connect_to_closed_port_is_unavailable() {
    let connector = Aria2Connector::new("http://127.0.0.1:9/jsonrpc", None);
    let err = connector.connect().await.err().expect("connect should fail");
    assert!(matches!(err, ClientError::Unavailable { .. }), "{err:?}");
    assert!(err.to_string().contains("Suggestion"));
}

#[tokio::test]
async fn test_rejected_add_surfaces_rpc_fault() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_rpc(
        &server,
        "aria2.getVersion",
        rpc_result(json!({ "version": "1.37.0" })),
    )
    .await;
    mount_rpc(
        &server,
        "aria2.addUri",
        ResponseTemplate::new(400).set_body_json(json!({
            "id": "2",
            "jsonrpc": "2.0",
            "error": { "code": 1, "message": "Unrecognized URI or unsupported protocol" },
        })),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let client = connector(&server, None).connect().await.unwrap();
    let err = client.add("not-a-magnet", dir.path()).await.err().unwrap();
    assert!(
        matches!(err, ClientError::Rejected { code: 1, ref method, .. } if method == "aria2.addUri"),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_add_watches_status_until_complete() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_rpc(
        &server,
        "aria2.getVersion",
        rpc_result(json!({ "version": "1.37.0" })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.addUri",
            "params": [[MAGNET], {
                "dir": dir.path().display().to_string(),
                "seed-time": "0",
            }],
        })))
        .respond_with(rpc_result(json!(GID)))
        .expect(1)
        .mount(&server)
        .await;
    mount_rpc(&server, "aria2.tellStatus", rpc_result(completed_status(dir.path()))).await;

    let client = connector(&server, None).connect().await.unwrap();
    let mut added = client.add(MAGNET, dir.path()).await.unwrap();

    let expected_path = format!("{}/Example Game", dir.path().display());
    let first = tokio::time::timeout(Duration::from_secs(5), added.events.recv())
        .await
        .unwrap();
    assert_eq!(
        first,
        Some(ClientEvent::Metadata {
            name: Some("Example Game".to_string()),
            total_size: 1000,
            save_path: Some(expected_path.clone()),
        })
    );
    let second = tokio::time::timeout(Duration::from_secs(5), added.events.recv())
        .await
        .unwrap();
    assert_eq!(
        second,
        Some(ClientEvent::Done {
            save_path: Some(expected_path),
        })
    );

    let sample = added.handle.sample().await.unwrap();
    assert!(sample.done);
    assert!((sample.fraction - 1.0).abs() < f64::EPSILON);
    assert_eq!(sample.total_size, 1000);
}

#[tokio::test]
async fn test_engine_over_aria2_completes_transfer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_rpc(
        &server,
        "aria2.getVersion",
        rpc_result(json!({ "version": "1.37.0" })),
    )
    .await;
    mount_rpc(&server, "aria2.addUri", rpc_result(json!(GID))).await;
    mount_rpc(&server, "aria2.tellStatus", rpc_result(completed_status(dir.path()))).await;

    let db = Database::new(&dir.path().join("transfers.db")).await.unwrap();
    let engine = TransferEngine::new(
        TransferStore::new(db),
        ProgressPublisher::default(),
        Arc::new(connector(&server, None)),
        EngineOptions {
            sample_interval: Duration::from_millis(20),
            download_dir: dir.path().to_path_buf(),
        },
    );
    let mut events = engine.publisher().subscribe();

    engine.add("t1", MAGNET, "Placeholder").await.unwrap();
    wait_for_event(&mut events, "t1", |e| {
        matches!(e, TransferEvent::Completed { .. })
    })
    .await;

    let record = engine.get("t1").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.name, "Example Game");
    assert!((record.progress - 100.0).abs() < f64::EPSILON);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_engine_reports_unreachable_client() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("transfers.db")).await.unwrap();
    let engine = TransferEngine::new(
        TransferStore::new(db),
        ProgressPublisher::default(),
        Arc::new(Aria2Connector::new("http://127.0.0.1:9/jsonrpc", None)),
        EngineOptions::default(),
    );

    let err = engine.add("t1", MAGNET, "Example").await.unwrap_err();
    assert!(
        matches!(err, gamegrab_core::TransferError::ClientUnavailable(_)),
        "{err:?}"
    );
    assert!(engine.get("t1").await.unwrap().is_none());
}

async fn mount_status(server: &MockServer, gid: &str, status: Value) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.tellStatus",
            "params": [gid],
        })))
        .respond_with(rpc_result(status))
        .mount(server)
        .await;
}

async fn mount_empty_queues(server: &MockServer) {
    mount_rpc(server, "aria2.tellActive", rpc_result(json!([]))).await;
    mount_rpc(server, "aria2.tellWaiting", rpc_result(json!([]))).await;
}

#[tokio::test]
async fn test_engine_completes_transfer_that_aria2_keeps_seeding() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_rpc(
        &server,
        "aria2.getVersion",
        rpc_result(json!({ "version": "1.37.0" })),
    )
    .await;
    mount_empty_queues(&server).await;
    mount_rpc(&server, "aria2.addUri", rpc_result(json!(GID))).await;
    mount_status(
        &server,
        GID,
        json!({
            "gid": GID,
            "status": "active",
            "seeder": "true",
            "totalLength": "1000",
            "completedLength": "1000",
            "uploadSpeed": "2048",
            "dir": dir.path().display().to_string(),
            "bittorrent": { "info": { "name": "Example Game" } },
        }),
    )
    .await;

    let db = Database::new(&dir.path().join("transfers.db")).await.unwrap();
    let engine = TransferEngine::new(
        TransferStore::new(db),
        ProgressPublisher::default(),
        Arc::new(connector(&server, None)),
        EngineOptions {
            sample_interval: Duration::from_millis(20),
            download_dir: dir.path().to_path_buf(),
        },
    );
    let mut events = engine.publisher().subscribe();

    engine.add("t1", MAGNET, "Example").await.unwrap();
    wait_for_event(&mut events, "t1", |e| {
        matches!(e, TransferEvent::Completed { .. })
    })
    .await;

    let record = engine.get("t1").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert!((record.progress - 100.0).abs() < f64::EPSILON);
    assert!(record.completed_at.is_some());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_resume_readds_download_that_aria2_failed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_rpc(
        &server,
        "aria2.getVersion",
        rpc_result(json!({ "version": "1.37.0" })),
    )
    .await;
    mount_empty_queues(&server).await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.addUri" })))
        .respond_with(rpc_result(json!(GID)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.addUri" })))
        .respond_with(rpc_result(json!(RETRY_GID)))
        .expect(1)
        .mount(&server)
        .await;
    mount_status(
        &server,
        GID,
        json!({
            "gid": GID,
            "status": "error",
            "errorMessage": "No peer data",
            "totalLength": "0",
            "completedLength": "0",
        }),
    )
    .await;
    mount_status(
        &server,
        RETRY_GID,
        json!({
            "gid": RETRY_GID,
            "status": "active",
            "totalLength": "1000",
            "completedLength": "250",
            "bittorrent": { "info": { "name": "Example Game" } },
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.removeDownloadResult",
            "params": [GID],
        })))
        .respond_with(rpc_result(json!("OK")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.unpause" })))
        .respond_with(rpc_result(json!(GID)))
        .expect(0)
        .mount(&server)
        .await;

    let client = connector(&server, None).connect().await.unwrap();
    let added = client.add(MAGNET, dir.path()).await.unwrap();
    added.handle.resume().await.unwrap();

    let sample = added.handle.sample().await.unwrap();
    assert!((sample.fraction - 0.25).abs() < f64::EPSILON);
    assert!(!sample.done);
}

#[tokio::test]
async fn test_add_reattaches_to_download_aria2_already_holds() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_rpc(
        &server,
        "aria2.getVersion",
        rpc_result(json!({ "version": "1.37.0" })),
    )
    .await;
    mount_rpc(&server, "aria2.tellActive", rpc_result(json!([]))).await;
    mount_rpc(
        &server,
        "aria2.tellWaiting",
        rpc_result(json!([{ "gid": GID, "infoHash": HASH.to_uppercase() }])),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.addUri" })))
        .respond_with(rpc_result(json!(RETRY_GID)))
        .expect(0)
        .mount(&server)
        .await;
    mount_status(
        &server,
        GID,
        json!({
            "gid": GID,
            "status": "paused",
            "totalLength": "1000",
            "completedLength": "400",
            "bittorrent": { "info": { "name": "Example Game" } },
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.unpause",
            "params": [GID],
        })))
        .respond_with(rpc_result(json!(GID)))
        .expect(1)
        .mount(&server)
        .await;

    let client = connector(&server, None).connect().await.unwrap();
    let added = client.add(MAGNET, dir.path()).await.unwrap();

    let sample = added.handle.sample().await.unwrap();
    assert!((sample.fraction - 0.4).abs() < f64::EPSILON);
    added.handle.resume().await.unwrap();
}
