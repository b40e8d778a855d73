//! Live, file-backed configuration.
//!
//! # Slots
//! ```text
//! current               in effect, read lock-free through ArcSwap
//! previous              displaced by the last commit, consumed by restore()
//! pending_from_file     last content parsed from (or written to) the file
//! pending_while_frozen  change seen while frozen, applied by force_refresh()
//! ```
//!
//! Every mutation runs under one mutex for its whole
//! read-validate-persist-apply sequence. `current` is swapped as a single
//! `Arc`, so readers see either the old or the new value, never a mix.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::events::{
    ChangeSource, ConfigEvents, ModificationCanceled, Modified, Modifying, Restored,
};
use crate::config::loader::{self, ConfigError, ReadOutcome};
use crate::config::period::Period;
use crate::config::watcher::ChangeNotifier;
use crate::observability::metrics;

/// Interval between periodic refresh checks.
pub const REFRESH_TICK: Duration = Duration::from_secs(30);

/// Capability required from an application configuration type.
///
/// Snapshots are cloned, compared for no-op detection, and round-tripped
/// through JSON to validate them before they are committed.
pub trait Configuration:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

impl<T> Configuration for T where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

/// What a call to [`ConfigHandler::reload`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// File content matches `current`.
    Unchanged,
    /// New content committed and announced.
    Applied,
    /// New content held because the handler is frozen.
    Deferred,
    /// Bad content copied aside and the file rewritten from `current`.
    Quarantined,
    /// File was missing and has been rewritten from `current`.
    Regenerated,
}

struct Versioned<T> {
    version: u64,
    config: Arc<T>,
}

struct Slots<T> {
    previous: Option<Arc<T>>,
    pending_from_file: Option<Arc<T>>,
    pending_while_frozen: Option<Arc<T>>,
    frozen: bool,
}

/// Owns the authoritative configuration of type `T` backed by one file.
///
/// Reads are lock-free. Every mutating method (`set_config`, `restore`,
/// `reload`, `force_refresh` and the rest) does blocking file I/O under a
/// mutex, and `reload` may sleep between read attempts. Call them from
/// `spawn_blocking` or a plain thread when on an async worker.
pub struct ConfigHandler<T: Configuration> {
    path: PathBuf,
    current: ArcSwap<Versioned<T>>,
    slots: Mutex<Slots<T>>,
    events: ConfigEvents<T>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl<T: Configuration> ConfigHandler<T> {
    /// Load the file at `path`, creating it from `defaults` if absent, and
    /// subscribe to `notifier` for subsequent changes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn load(
        path: impl Into<PathBuf>,
        defaults: T,
        notifier: &dyn ChangeNotifier,
    ) -> Result<Arc<Self>, ConfigError> {
        let path = path.into();
        let runtime = Handle::try_current().map_err(|e| ConfigError::Unexpected(Box::new(e)))?;

        let initial = if path.exists() {
            match loader::read_config::<T>(&path).map_err(|e| unreadable(&path, e))? {
                ReadOutcome::Parsed(value) => value,
                ReadOutcome::Empty => {
                    return Err(ConfigError::Unreadable {
                        path,
                        reason: format!("file still empty after {} reads", loader::READ_ATTEMPTS),
                    })
                }
                ReadOutcome::Invalid { error, .. } => return Err(unreadable(&path, error)),
            }
        } else {
            let bytes = loader::encode(&defaults)?;
            loader::write_config(&path, &bytes).map_err(|source| ConfigError::Persist {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path.display(), "Configuration file created from defaults");
            defaults
        };

        let initial = Arc::new(initial);
        let handler = Arc::new(Self {
            current: ArcSwap::from_pointee(Versioned {
                version: 0,
                config: Arc::clone(&initial),
            }),
            slots: Mutex::new(Slots {
                previous: None,
                pending_from_file: Some(initial),
                pending_while_frozen: None,
                frozen: false,
            }),
            events: ConfigEvents::new(runtime.clone()),
            refresh_task: Mutex::new(None),
            runtime,
            path,
        });

        let weak: Weak<Self> = Arc::downgrade(&handler);
        notifier.subscribe(Arc::new(move || {
            if let Some(handler) = weak.upgrade() {
                if let Err(e) = handler.reload() {
                    tracing::error!(error = %e, "Configuration reload failed");
                }
            }
        }))?;

        tracing::info!(path = %handler.path.display(), "Configuration loaded");
        Ok(handler)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn events(&self) -> &ConfigEvents<T> {
        &self.events
    }

    /// The configuration currently in effect.
    pub fn get_config(&self) -> Arc<T> {
        Arc::clone(&self.current.load().config)
    }

    /// The configuration in effect together with its version.
    pub fn snapshot(&self) -> (u64, Arc<T>) {
        let current = self.current.load();
        (current.version, Arc::clone(&current.config))
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Validate, persist and commit `value`, then announce it.
    pub fn set_config(&self, value: T) -> Result<(), ConfigError> {
        let (next, bytes) = round_trip(&value)?;
        let mut slots = self.lock_slots();
        self.write_bytes(&mut slots, &next, &bytes)?;
        slots.pending_while_frozen = None;
        self.apply(&mut slots, next, ChangeSource::Api);
        Ok(())
    }

    /// Like [`set_config`](Self::set_config), but `Modifying` subscribers may
    /// veto the change first.
    pub fn propose_config(&self, value: T) -> Result<(), ConfigError> {
        let (next, bytes) = round_trip(&value)?;
        let mut slots = self.lock_slots();

        let mut proposal = Modifying::new(Arc::clone(&next), self.get_config());
        if let Some(reason) = self.events.deliver_modifying(&mut proposal) {
            tracing::info!(reason = %reason, "Configuration change canceled");
            self.events.emit_canceled(ModificationCanceled { reason: reason.clone() });
            return Err(ConfigError::Canceled(reason));
        }

        self.write_bytes(&mut slots, &next, &bytes)?;
        slots.pending_while_frozen = None;
        self.apply(&mut slots, next, ChangeSource::Api);
        Ok(())
    }

    /// Stop applying file changes; they are parsed and held instead.
    pub fn freeze(&self) {
        self.lock_slots().frozen = true;
        tracing::info!(path = %self.path.display(), "Configuration frozen");
    }

    /// Resume applying file changes. Anything held while frozen stays held
    /// until [`force_refresh`](Self::force_refresh).
    pub fn unfreeze(&self) {
        self.lock_slots().frozen = false;
        tracing::info!(path = %self.path.display(), "Configuration unfrozen");
    }

    pub fn is_frozen(&self) -> bool {
        self.lock_slots().frozen
    }

    /// Apply the change held while frozen, if it differs from `current`.
    ///
    /// Returns whether anything was committed.
    pub fn force_refresh(&self) -> Result<bool, ConfigError> {
        let mut slots = self.lock_slots();
        let Some(pending) = slots.pending_while_frozen.take() else {
            return Ok(false);
        };
        if *pending == *self.get_config() {
            return Ok(false);
        }
        if let Err(e) = self.persist(&mut slots, &pending) {
            slots.pending_while_frozen = Some(pending);
            return Err(e);
        }
        self.apply(&mut slots, pending, ChangeSource::Refresh);
        Ok(true)
    }

    pub fn can_restore(&self) -> bool {
        self.lock_slots().previous.is_some()
    }

    /// Bring back the configuration displaced by the last commit.
    pub fn restore(&self) -> Result<(), ConfigError> {
        let mut slots = self.lock_slots();
        let Some(previous) = slots.previous.take() else {
            return Err(ConfigError::RestoreUnavailable);
        };
        if let Err(e) = self.persist(&mut slots, &previous) {
            slots.previous = Some(previous);
            return Err(e);
        }
        slots.pending_while_frozen = None;

        let displaced = self.current.load_full();
        let version = displaced.version + 1;
        self.current.store(Arc::new(Versioned {
            version,
            config: Arc::clone(&previous),
        }));
        drop(slots);

        metrics::record_config_restore();
        tracing::warn!(path = %self.path.display(), version, "Previous configuration restored");
        self.events.emit_restored(Restored {
            version,
            restored: previous,
            discarded: Arc::clone(&displaced.config),
        });
        Ok(())
    }

    /// Re-read the backing file and react to what it contains.
    pub fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let mut slots = self.lock_slots();

        let outcome = match loader::read_config::<T>(&self.path) {
            Ok(outcome) => outcome,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let current = self.get_config();
                self.persist(&mut slots, &current)?;
                tracing::warn!(path = %self.path.display(), "Configuration file missing, regenerated");
                return Ok(ReloadOutcome::Regenerated);
            }
            Err(e) => return Err(unreadable(&self.path, e)),
        };

        let (raw, reason) = match outcome {
            ReadOutcome::Parsed(value) => return Ok(self.absorb(&mut slots, Arc::new(value))),
            ReadOutcome::Empty => (Vec::new(), "file is empty".to_string()),
            ReadOutcome::Invalid { raw, error } => (raw, error.to_string()),
        };

        let target = loader::quarantine(&self.path, &raw).map_err(|source| ConfigError::Persist {
            path: loader::bad_config_path(&self.path),
            source,
        })?;
        let current = self.get_config();
        self.persist(&mut slots, &current)?;

        metrics::record_config_quarantine();
        tracing::warn!(
            path = %self.path.display(),
            quarantined = %target.display(),
            reason = %reason,
            "Unreadable configuration quarantined, file rewritten from last good value"
        );
        Ok(ReloadOutcome::Quarantined)
    }

    /// Run [`force_refresh`](Self::force_refresh) whenever `period` is due,
    /// replacing any earlier schedule.
    pub fn set_refresh_time(self: &Arc<Self>, period: Period) {
        let weak = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            let mut ticker = time::interval(REFRESH_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(handler) = weak.upgrade() else {
                    break;
                };
                if !period.is_due() {
                    continue;
                }
                match tokio::task::spawn_blocking(move || handler.force_refresh()).await {
                    Ok(Ok(true)) => tracing::info!(%period, "Scheduled refresh applied pending configuration"),
                    Ok(Ok(false)) => tracing::debug!(%period, "Scheduled refresh found nothing pending"),
                    Ok(Err(e)) => tracing::error!(error = %e, "Scheduled refresh failed"),
                    Err(e) => tracing::error!(error = %e, "Scheduled refresh task panicked"),
                }
            }
        });

        let previous = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::info!(%period, "Configuration refresh scheduled");
    }

    /// Whether a refresh schedule is active.
    pub fn refresh_scheduled(&self) -> bool {
        self.refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn cancel_refresh_time(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Parsed file content: no-op, defer, or commit.
    fn absorb(&self, slots: &mut Slots<T>, value: Arc<T>) -> ReloadOutcome {
        let current = self.get_config();
        if *value == *current {
            slots.pending_from_file = Some(value);
            slots.pending_while_frozen = None;
            return ReloadOutcome::Unchanged;
        }
        if slots.frozen {
            if slots.pending_from_file.as_deref() != Some(&*value) {
                tracing::info!(path = %self.path.display(), "Configuration change held while frozen");
            }
            slots.pending_from_file = Some(Arc::clone(&value));
            slots.pending_while_frozen = Some(value);
            return ReloadOutcome::Deferred;
        }
        slots.pending_from_file = Some(Arc::clone(&value));
        slots.pending_while_frozen = None;
        self.apply(slots, value, ChangeSource::File);
        ReloadOutcome::Applied
    }

    fn persist(&self, slots: &mut Slots<T>, value: &Arc<T>) -> Result<(), ConfigError> {
        let bytes = loader::encode(&**value)?;
        self.write_bytes(slots, value, &bytes)
    }

    fn write_bytes(&self, slots: &mut Slots<T>, value: &Arc<T>, bytes: &[u8]) -> Result<(), ConfigError> {
        loader::write_config(&self.path, bytes).map_err(|source| ConfigError::Persist {
            path: self.path.clone(),
            source,
        })?;
        slots.pending_from_file = Some(Arc::clone(value));
        Ok(())
    }

    // Commit protocol: current -> previous, next -> current, announce.
    fn apply(&self, slots: &mut Slots<T>, next: Arc<T>, source: ChangeSource) {
        let displaced = self.current.load_full();
        let version = displaced.version + 1;
        slots.previous = Some(Arc::clone(&displaced.config));
        self.current.store(Arc::new(Versioned {
            version,
            config: Arc::clone(&next),
        }));

        metrics::record_config_commit(source.as_str());
        tracing::info!(
            path = %self.path.display(),
            version,
            source = source.as_str(),
            "Configuration committed"
        );
        self.events.emit_modified(Modified {
            version,
            previous: Arc::clone(&displaced.config),
            current: next,
            source,
        });
    }
}

impl<T: Configuration> Drop for ConfigHandler<T> {
    fn drop(&mut self) {
        self.cancel_refresh_time();
    }
}

fn round_trip<T: Configuration>(value: &T) -> Result<(Arc<T>, Vec<u8>), ConfigError> {
    let bytes = loader::encode(value)?;
    let checked: T = loader::decode(&bytes)?;
    Ok((Arc::new(checked), bytes))
}

fn unreadable(path: &Path, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Unreadable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
