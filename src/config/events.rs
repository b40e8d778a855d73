//! Configuration change notifications.
//!
//! # Delivery
//! ```text
//! Modifying             sequential, stops at the first subscriber that cancels
//! ModificationCanceled  parallel
//! Modified              parallel
//! Restored              parallel
//! ```
//!
//! Parallel delivery spawns one task per subscriber on the handler's runtime.
//! A panicking subscriber is logged and does not affect the others.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;

/// Where a committed configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// `set_config` or `propose_config`.
    Api,
    /// The backing file changed on disk.
    File,
    /// A pending change applied by `force_refresh`.
    Refresh,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Api => "api",
            ChangeSource::File => "file",
            ChangeSource::Refresh => "refresh",
        }
    }
}

/// A proposed change, delivered before commit. Any subscriber may veto it.
#[derive(Debug)]
pub struct Modifying<T> {
    pub proposed: Arc<T>,
    pub current: Arc<T>,
    cancel: Option<String>,
}

impl<T> Modifying<T> {
    pub fn new(proposed: Arc<T>, current: Arc<T>) -> Self {
        Self { proposed, current, cancel: None }
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.cancel = Some(reason.into());
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn reason(&self) -> Option<&str> {
        self.cancel.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct ModificationCanceled {
    pub reason: String,
}

/// A change was committed.
#[derive(Debug)]
pub struct Modified<T> {
    pub version: u64,
    pub previous: Arc<T>,
    pub current: Arc<T>,
    pub source: ChangeSource,
}

/// The previous configuration was brought back.
#[derive(Debug)]
pub struct Restored<T> {
    pub version: u64,
    pub restored: Arc<T>,
    /// The value that was in effect before the restore.
    pub discarded: Arc<T>,
}

/// Handle returned by every `on_*` call, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type VetoHandler<E> = Arc<dyn Fn(&mut E) + Send + Sync>;

struct Subscribers<H> {
    entries: Mutex<Vec<(SubscriptionId, H)>>,
}

impl<H: Clone> Subscribers<H> {
    fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    fn add(&self, id: SubscriptionId, handler: H) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<H> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Subscriber registry for one configuration handler.
pub struct ConfigEvents<T> {
    next_id: AtomicU64,
    runtime: Handle,
    modifying: Subscribers<VetoHandler<Modifying<T>>>,
    canceled: Subscribers<Handler<ModificationCanceled>>,
    modified: Subscribers<Handler<Modified<T>>>,
    restored: Subscribers<Handler<Restored<T>>>,
}

impl<T: Send + Sync + 'static> ConfigEvents<T> {
    pub fn new(runtime: Handle) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            runtime,
            modifying: Subscribers::new(),
            canceled: Subscribers::new(),
            modified: Subscribers::new(),
            restored: Subscribers::new(),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs on the committing thread while the handler's lock is held, so it
    /// must not call back into mutating handler methods.
    pub fn on_modifying<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&mut Modifying<T>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.modifying.add(id, Arc::new(f));
        id
    }

    pub fn on_modification_canceled<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ModificationCanceled) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.canceled.add(id, Arc::new(f));
        id
    }

    pub fn on_modified<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Modified<T>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.modified.add(id, Arc::new(f));
        id
    }

    pub fn on_restored<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Restored<T>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.restored.add(id, Arc::new(f));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        // Ids are unique across kinds, so at most one list matches.
        self.modifying.remove(id)
            || self.canceled.remove(id)
            || self.modified.remove(id)
            || self.restored.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.modifying.len() + self.canceled.len() + self.modified.len() + self.restored.len()
    }

    /// Deliver `event` to veto subscribers in registration order.
    ///
    /// Returns the cancel reason if any subscriber vetoed. A subscriber that
    /// panics vetoes the change.
    pub(crate) fn deliver_modifying(&self, event: &mut Modifying<T>) -> Option<String> {
        for handler in self.modifying.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut *event)));
            if outcome.is_err() {
                tracing::error!("Modifying subscriber panicked, treating as cancellation");
                event.cancel("subscriber panicked");
            }
            if event.is_canceled() {
                break;
            }
        }
        event.cancel.clone()
    }

    pub(crate) fn emit_canceled(&self, event: ModificationCanceled) {
        self.broadcast("modification_canceled", self.canceled.snapshot(), event);
    }

    pub(crate) fn emit_modified(&self, event: Modified<T>) {
        self.broadcast("modified", self.modified.snapshot(), event);
    }

    pub(crate) fn emit_restored(&self, event: Restored<T>) {
        self.broadcast("restored", self.restored.snapshot(), event);
    }

    fn broadcast<E>(&self, kind: &'static str, handlers: Vec<Handler<E>>, event: E)
    where
        E: Send + Sync + 'static,
    {
        if handlers.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for handler in handlers {
            let event = Arc::clone(&event);
            self.runtime.spawn(async move {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(event.as_ref()))).is_err() {
                    tracing::error!(event = kind, "Configuration event subscriber panicked");
                }
            });
        }
    }
}
