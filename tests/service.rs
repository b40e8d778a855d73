//! The `live-listener` service end to end: startup, RPC, file watching and
//! shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use live_listener::config::loader;
use live_listener::config::{ConfigHandler, ManualNotifier, ServiceConfig};
use live_listener::http;
use live_listener::lifecycle::{self, Shutdown, StartupOptions};
use live_listener::net::{ListenerBuilder, Protocol};

mod common;

fn service_config(bind: &str, greeting: &str) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = bind.into();
    config.greeting = greeting.into();
    config
}

fn write_service_config(path: &Path, config: &ServiceConfig) {
    std::fs::write(path, loader::encode(config).unwrap()).unwrap();
}

#[tokio::test]
async fn test_rpc_protocol_serves_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let mut initial = service_config("127.0.0.1:29201", "hello rpc");
    initial.listener.protocol = Protocol::Rpc;
    let notifier = ManualNotifier::new();
    let config = ConfigHandler::load(dir.path().join("service.json"), initial, &notifier).unwrap();

    let listener = ListenerBuilder::new(Arc::clone(&config))
        .bootstrapper(http::bootstrap)
        .protocol_definitions(http::rpc::definitions)
        .build()
        .unwrap();
    assert_eq!(listener.name(), "main");
    let _completion = listener.start().await.unwrap();

    let client = common::client();
    let res: Value = client
        .post("http://127.0.0.1:29201/rpc")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["result"], "pong");
    assert_eq!(res["id"], 1);

    // Application routes stay mounted next to the RPC endpoint.
    assert!(common::serves("127.0.0.1:29201", "hello rpc").await);

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_config_endpoint_reflects_restarted_value() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = ManualNotifier::new();
    let config = ConfigHandler::load(
        dir.path().join("service.json"),
        service_config("127.0.0.1:29211", "first"),
        &notifier,
    )
    .unwrap();

    let listener = ListenerBuilder::new(Arc::clone(&config))
        .bootstrapper(http::bootstrap)
        .build()
        .unwrap();
    let _completion = listener.start().await.unwrap();
    assert!(common::serves("127.0.0.1:29211", "first").await);

    let mut next = ServiceConfig::clone(&config.get_config());
    next.greeting = "second".into();
    config.set_config(next).unwrap();
    assert!(common::serves("127.0.0.1:29211", "second").await);

    let served: ServiceConfig = common::client()
        .get("http://127.0.0.1:29211/config")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(served, *config.get_config());

    let health: Value = common::client()
        .get("http://127.0.0.1:29211/health")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_document_is_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = ManualNotifier::new();
    let good = service_config("127.0.0.1:29221", "valid");
    let config = ConfigHandler::load(dir.path().join("service.json"), good.clone(), &notifier).unwrap();

    let listener = ListenerBuilder::new(Arc::clone(&config))
        .bootstrapper(http::bootstrap)
        .build()
        .unwrap();
    let _completion = listener.start().await.unwrap();

    // Commits, then fails validation in the bootstrapper.
    let mut bad = good.clone();
    bad.timeouts.request_secs = 0;
    config.set_config(bad).unwrap();

    let rolled_back = common::eventually(Duration::from_secs(5), || {
        let config = Arc::clone(&config);
        let good = good.clone();
        async move { *config.get_config() == good }
    })
    .await;
    assert!(rolled_back);
    assert!(common::serves("127.0.0.1:29221", "valid").await);
    listener.stop().await.unwrap();
}

#[tokio::test]
async fn test_service_runs_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live-listener.json");
    write_service_config(&path, &service_config("127.0.0.1:29231", "from file"));

    let shutdown = Shutdown::new();
    let options = StartupOptions {
        config_path: path.clone(),
        watch: false,
    };
    let service = tokio::spawn(lifecycle::run(options, shutdown.clone(), None));
    assert!(common::serves("127.0.0.1:29231", "from file").await);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .expect("service did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(common::greeting_at("127.0.0.1:29231").await, None);
}

#[tokio::test]
async fn test_service_follows_watched_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live-listener.json");
    write_service_config(&path, &service_config("127.0.0.1:29241", "watched"));

    let shutdown = Shutdown::new();
    let options = StartupOptions {
        config_path: path.clone(),
        watch: true,
    };
    let service = tokio::spawn(lifecycle::run(options, shutdown.clone(), None));
    assert!(common::serves("127.0.0.1:29241", "watched").await);

    write_service_config(&path, &service_config("127.0.0.1:29242", "moved"));
    assert!(common::serves("127.0.0.1:29242", "moved").await, "file change not picked up");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .expect("service did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_service_fails_fast_on_occupied_address() {
    let _taken = std::net::TcpListener::bind("127.0.0.1:29251").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live-listener.json");
    write_service_config(&path, &service_config("127.0.0.1:29251", "never"));

    let options = StartupOptions {
        config_path: path,
        watch: false,
    };
    let err = lifecycle::run(options, Shutdown::new(), None).await.unwrap_err();
    assert!(matches!(err, lifecycle::StartupError::Listener(_)), "{err}");
}
