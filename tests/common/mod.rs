//! Shared utilities for listener integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};

use live_listener::config::loader::{self, BoxError};
use live_listener::config::{ConfigHandler, ManualNotifier};
use live_listener::net::{ListenerState, ServerSetter};
use live_listener::Listener;

/// Minimal application configuration: where to listen and what to say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub address: String,
    pub greeting: String,
}

impl TestConfig {
    pub fn new(address: &str, greeting: &str) -> Self {
        Self {
            address: address.into(),
            greeting: greeting.into(),
        }
    }
}

/// How long `GET /slow` takes to answer.
pub const SLOW_RESPONSE: Duration = Duration::from_millis(300);

/// Serves `GET /` with the configured greeting, and `GET /slow` with the
/// same greeting after [`SLOW_RESPONSE`].
pub fn bootstrap(config: &TestConfig, setter: &mut ServerSetter) -> Result<(), BoxError> {
    setter.name = "test".into();
    setter.address = config.address.clone();
    let greeting = config.greeting.clone();
    let slow_greeting = greeting.clone();
    setter.handler = Some(
        Router::new()
            .route("/", get(move || async move { greeting }))
            .route(
                "/slow",
                get(move || async move {
                    tokio::time::sleep(SLOW_RESPONSE).await;
                    slow_greeting
                }),
            ),
    );
    Ok(())
}

/// Like [`bootstrap`], but fails while `fail` is set.
pub fn failing_bootstrap(
    fail: Arc<AtomicBool>,
) -> impl Fn(&TestConfig, &mut ServerSetter) -> Result<(), BoxError> + Send + Sync + 'static {
    move |config: &TestConfig, setter: &mut ServerSetter| {
        if fail.load(Ordering::SeqCst) {
            return Err("bootstrap refused".into());
        }
        bootstrap(config, setter)
    }
}

/// Handler over `<dir>/config.json` seeded with `initial`.
pub fn config_handler(
    dir: &Path,
    initial: TestConfig,
) -> (Arc<ConfigHandler<TestConfig>>, Arc<ManualNotifier>) {
    let notifier = Arc::new(ManualNotifier::new());
    let handler = ConfigHandler::load(dir.join("config.json"), initial, notifier.as_ref()).unwrap();
    (handler, notifier)
}

/// Replace the file contents the way an operator would.
pub fn write_file(path: &Path, config: &TestConfig) {
    std::fs::write(path, loader::encode(config).unwrap()).unwrap();
}

/// Non-pooled client so restarts never hit a stale connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Body of `GET http://<addr>/`, or `None` if nothing answers.
pub async fn greeting_at(addr: &str) -> Option<String> {
    let res = client().get(format!("http://{addr}/")).send().await.ok()?;
    if !res.status().is_success() {
        return None;
    }
    res.text().await.ok()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub async fn serves(addr: &str, greeting: &str) -> bool {
    let addr = addr.to_string();
    let greeting = greeting.to_string();
    eventually(Duration::from_secs(5), || {
        let addr = addr.clone();
        let greeting = greeting.clone();
        async move { greeting_at(&addr).await.as_deref() == Some(greeting.as_str()) }
    })
    .await
}

pub async fn reaches_state(listener: &Listener<TestConfig>, state: ListenerState) -> bool {
    let mut rx = listener.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .is_ok_and(|res| res.is_ok())
}
