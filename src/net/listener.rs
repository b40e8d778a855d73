//! Listener lifecycle with restart on configuration change and rollback.
//!
//! # States
//! ```text
//! Idle → Starting → Running → Stopping → Idle      (restart)
//!                            ↘ Stopping → Idle → Terminated (stop)
//! Starting ✗ → restore() → Idle → Starting ...     (rollback, also on the first start)
//! Starting ✗ and nothing to restore → Terminated   (fatal)
//! ```
//!
//! # Responsibilities
//! - Bootstrap a [`ServerSetter`] from the current configuration snapshot
//! - Restart when the configuration is modified or restored
//! - Roll the configuration back when a start or a running server fails
//! - Report the terminal outcome through [`Completion`]
//!
//! # Design Decisions
//! - One supervisor task owns the server; start/stop talk to it over channels
//! - Change notifications are coalesced in a watch channel, so a burst of
//!   commits causes at most one extra restart
//! - The restart always reads the newest snapshot, never the event payload

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::events::SubscriptionId;
use crate::config::handler::{ConfigHandler, Configuration};
use crate::config::loader::BoxError;
use crate::net::server::RunningServer;
use crate::net::setter::{Bootstrapper, ProtocolDefinitions, ServerSetter};
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The builder or a bootstrapped setter is unusable.
    #[error("listener misconfigured: {0}")]
    Misconfigured(String),

    #[error("listener {name}: no address configured")]
    AddressNotConfigured { name: String },

    #[error("listener {name}: bootstrap failed: {source}")]
    Bootstrap {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Binding or serving failed.
    #[error("listener {name}: {source}")]
    Serve {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot {action} a listener that is {state:?}")]
    InvalidState {
        state: ListenerState,
        action: &'static str,
    },

    #[error("unexpected listener error: {0}")]
    Unexpected(#[source] BoxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not serving. Initial state, and between stop and start of a restart.
    Idle,
    Starting,
    Running,
    Stopping,
    /// Final. The listener cannot be started again.
    Terminated,
}

impl ListenerState {
    fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Idle => "idle",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Stopping => "stopping",
            ListenerState::Terminated => "terminated",
        }
    }
}

/// Resolves with the listener's terminal outcome: `Ok` after `stop()`,
/// `Err` when a failure could not be rolled back.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<(), ListenerError>>,
}

impl Future for Completion {
    type Output = Result<(), ListenerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(ListenerError::Unexpected("listener supervisor exited without an outcome".into()))
            })
        })
    }
}

/// A network listener bound to a [`ConfigHandler`].
///
/// Built with [`ListenerBuilder`](crate::net::builder::ListenerBuilder).
/// Dropping a running listener stops its server.
pub struct Listener<T: Configuration> {
    shared: Arc<Shared<T>>,
}

struct Shared<T: Configuration> {
    name: String,
    config: Arc<ConfigHandler<T>>,
    bootstrapper: Bootstrapper<T>,
    definitions: Option<ProtocolDefinitions>,
    state: watch::Sender<ListenerState>,
    local_addr: ArcSwapOption<SocketAddr>,
    /// Held for the whole of start() and stop(); at most one runs at a time.
    control: Mutex<Option<Control>>,
}

struct Control {
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

/// Everything the supervisor task owns.
struct Supervision {
    server: Option<RunningServer>,
    version: u64,
    reload_rx: watch::Receiver<()>,
    stop_rx: mpsc::Receiver<oneshot::Sender<()>>,
    done_tx: oneshot::Sender<Result<(), ListenerError>>,
    subscriptions: [SubscriptionId; 2],
}

impl<T: Configuration> Listener<T> {
    pub(crate) fn new(
        name: String,
        config: Arc<ConfigHandler<T>>,
        bootstrapper: Bootstrapper<T>,
        definitions: Option<ProtocolDefinitions>,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            shared: Arc::new(Shared {
                name,
                config,
                bootstrapper,
                definitions,
                state,
                local_addr: ArcSwapOption::empty(),
                control: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.shared.state.subscribe()
    }

    /// Address of the running server, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.load_full().map(|addr| *addr)
    }

    pub fn config(&self) -> &Arc<ConfigHandler<T>> {
        &self.shared.config
    }

    /// Bootstrap from the current snapshot and start serving.
    ///
    /// Returns once the server is listening. If the first launch fails and
    /// the configuration has a previous value, that value is restored and
    /// launched instead. A failure that cannot be rolled back is returned
    /// directly and leaves the listener `Terminated`. Later failures are
    /// reported through the returned [`Completion`].
    pub async fn start(&self) -> Result<Completion, ListenerError> {
        let shared = &self.shared;
        let mut control = shared.control.lock().await;
        let state = *shared.state.borrow();
        if state != ListenerState::Idle || control.is_some() {
            return Err(ListenerError::InvalidState { state, action: "start" });
        }

        // Subscribe before reading the snapshot so no commit slips between.
        let (reload_tx, reload_rx) = watch::channel(());
        let subscriptions = shared.subscribe(Arc::new(reload_tx));
        let (mut version, mut config) = shared.config.snapshot();

        shared.set_state(ListenerState::Starting);
        let server = loop {
            match shared.launch(&config).await {
                Ok(server) => break server,
                Err(err) => match shared.recover(err).await {
                    // restore() clears the previous value, so this retries at most once.
                    Ok(()) => (version, config) = shared.config.snapshot(),
                    Err(err) => {
                        tracing::error!(listener = %shared.name, error = %err, "Listener failed to start");
                        shared.unsubscribe(&subscriptions);
                        shared.set_state(ListenerState::Terminated);
                        return Err(err);
                    }
                },
            }
        };
        shared.set_state(ListenerState::Running);

        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let supervisor = tokio::spawn(Arc::clone(shared).supervise(Supervision {
            server: Some(server),
            version,
            reload_rx,
            stop_rx,
            done_tx,
            subscriptions,
        }));
        *control = Some(Control { stop_tx, supervisor });

        Ok(Completion { rx: done_rx })
    }

    /// Stop serving and release the address. Idempotent.
    ///
    /// Resolves after the server has shut down and the [`Completion`] has
    /// been resolved.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let mut control = self.shared.control.lock().await;
        let Some(Control { stop_tx, supervisor }) = control.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        // A send error means the supervisor already terminated on its own.
        if stop_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
        supervisor
            .await
            .map_err(|err| ListenerError::Unexpected(Box::new(err)))
    }
}

impl<T: Configuration> Drop for Listener<T> {
    fn drop(&mut self) {
        // Closing the stop channel makes the supervisor shut the server down.
        if let Ok(mut control) = self.shared.control.try_lock() {
            control.take();
        }
    }
}

impl<T: Configuration> Shared<T> {
    fn set_state(&self, state: ListenerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(
                listener = %self.name,
                from = previous.as_str(),
                to = state.as_str(),
                "Listener state changed"
            );
        }
    }

    fn subscribe(&self, reload: Arc<watch::Sender<()>>) -> [SubscriptionId; 2] {
        let events = self.config.events();
        let on_modified = {
            let reload = Arc::clone(&reload);
            events.on_modified(move |_| {
                reload.send_replace(());
            })
        };
        let on_restored = events.on_restored(move |_| {
            reload.send_replace(());
        });
        [on_modified, on_restored]
    }

    fn unsubscribe(&self, subscriptions: &[SubscriptionId]) {
        for id in subscriptions {
            self.config.events().unsubscribe(*id);
        }
    }

    /// Bootstrap a fresh setter from `config` and bring a server up.
    async fn launch(&self, config: &T) -> Result<RunningServer, ListenerError> {
        let mut setter = ServerSetter::new();
        (self.bootstrapper)(config, &mut setter).map_err(|source| ListenerError::Bootstrap {
            name: self.name.clone(),
            source,
        })?;
        let server = RunningServer::launch(setter, self.definitions.as_ref()).await?;
        self.local_addr.store(Some(Arc::new(server.local_addr())));
        Ok(server)
    }

    /// Roll the configuration back after `error`. The resulting `Restored`
    /// event schedules the next start. Returns `error` when nothing can be
    /// restored.
    async fn recover(&self, error: ListenerError) -> Result<(), ListenerError> {
        if !self.config.can_restore() {
            return Err(error);
        }
        tracing::warn!(listener = %self.name, error = %error, "Rolling back configuration");
        let config = Arc::clone(&self.config);
        match tokio::task::spawn_blocking(move || config.restore()).await {
            Ok(Ok(())) => {
                metrics::record_listener_rollback(&self.name);
                Ok(())
            }
            Ok(Err(restore_error)) => {
                tracing::error!(
                    listener = %self.name,
                    error = %restore_error,
                    "Configuration rollback failed"
                );
                Err(error)
            }
            Err(join) => {
                tracing::error!(listener = %self.name, error = %join, "Configuration rollback panicked");
                Err(error)
            }
        }
    }

    async fn supervise(self: Arc<Self>, mut run: Supervision) {
        let mut stop_ack = None;

        let outcome = loop {
            tokio::select! {
                request = run.stop_rx.recv() => {
                    // None: the Listener was dropped.
                    stop_ack = request;
                    if let Some(server) = run.server.take() {
                        self.set_state(ListenerState::Stopping);
                        if let Err(err) = server.shutdown().await {
                            tracing::warn!(listener = %self.name, error = %err, "Server did not stop cleanly");
                        }
                        self.set_state(ListenerState::Idle);
                    }
                    break Ok(());
                }
                Ok(()) = run.reload_rx.changed() => {
                    let (version, config) = self.config.snapshot();
                    if run.server.is_some() && version == run.version {
                        tracing::debug!(listener = %self.name, version, "Already serving this version");
                        continue;
                    }
                    run.version = version;

                    if let Some(server) = run.server.take() {
                        self.set_state(ListenerState::Stopping);
                        if let Err(err) = server.shutdown().await {
                            tracing::warn!(listener = %self.name, error = %err, "Server did not stop cleanly");
                        }
                        self.local_addr.store(None);
                        self.set_state(ListenerState::Idle);
                    }

                    self.set_state(ListenerState::Starting);
                    match self.launch(&config).await {
                        Ok(server) => {
                            run.server = Some(server);
                            self.set_state(ListenerState::Running);
                            metrics::record_listener_restart(&self.name, "ok");
                            tracing::info!(listener = %self.name, version, "Listener restarted");
                        }
                        Err(err) => {
                            metrics::record_listener_restart(&self.name, "failed");
                            tracing::warn!(listener = %self.name, version, error = %err, "Restart failed");
                            if let Err(fatal) = self.recover(err).await {
                                break Err(fatal);
                            }
                            self.set_state(ListenerState::Idle);
                        }
                    }
                }
                failure = wait_for(&mut run.server) => {
                    run.server = None;
                    self.local_addr.store(None);
                    tracing::warn!(listener = %self.name, error = %failure, "Server failed while running");
                    if let Err(fatal) = self.recover(failure).await {
                        break Err(fatal);
                    }
                    self.set_state(ListenerState::Idle);
                }
            }
        };

        self.unsubscribe(&run.subscriptions);
        self.local_addr.store(None);
        self.set_state(ListenerState::Terminated);
        match &outcome {
            Ok(()) => tracing::info!(listener = %self.name, "Listener stopped"),
            Err(err) => tracing::error!(listener = %self.name, error = %err, "Listener terminated"),
        }

        let _ = run.done_tx.send(outcome);
        if let Some(ack) = stop_ack {
            let _ = ack.send(());
        }
    }
}

async fn wait_for(server: &mut Option<RunningServer>) -> ListenerError {
    match server {
        Some(server) => server.wait().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_reports_a_vanished_supervisor() {
        let (tx, rx) = oneshot::channel::<Result<(), ListenerError>>();
        drop(tx);
        let err = Completion { rx }.await.unwrap_err();
        assert!(matches!(err, ListenerError::Unexpected(_)));
    }

    #[test]
    fn invalid_state_message_names_the_action() {
        let err = ListenerError::InvalidState {
            state: ListenerState::Terminated,
            action: "start",
        };
        assert_eq!(err.to_string(), "cannot start a listener that is Terminated");
    }
}
