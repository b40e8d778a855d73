//! Change notification for the configuration file.
//!
//! The handler only needs "the file may have changed, go re-read it". Two
//! sources are provided: [`FileWatcher`] listens to filesystem events and
//! [`ManualNotifier`] fires when told to (SIGHUP, tests, embedding code).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

/// Quiet period after the last event before callbacks run.
pub const DEBOUNCE: Duration = Duration::from_millis(150);

/// Callback invoked once per (debounced) change.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("cannot watch {}: path has no file name", .0.display())]
    InvalidPath(PathBuf),
    #[error("file watcher failed: {0}")]
    Watch(#[from] notify::Error),
    #[error("failed to start watcher thread: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can tell subscribers the configuration file was written.
pub trait ChangeNotifier: Send + Sync {
    fn subscribe(&self, callback: ChangeCallback) -> Result<(), NotifierError>;
}

type Callbacks = Arc<Mutex<Vec<ChangeCallback>>>;

fn fire(callbacks: &Callbacks) {
    let current: Vec<ChangeCallback> = callbacks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for callback in current {
        callback();
    }
}

/// Watches one file through the platform's filesystem notifications.
///
/// The parent directory is watched so editors that replace the file by
/// rename are still seen. Bursts of events collapse into a single callback
/// run after [`DEBOUNCE`] of silence.
pub struct FileWatcher {
    path: PathBuf,
    callbacks: Callbacks,
    wake: mpsc::Sender<()>,
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, NotifierError> {
        let path = path.into();
        let target: OsString = path
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| NotifierError::InvalidPath(path.clone()))?;

        let (wake, rx) = mpsc::channel();
        let callbacks: Callbacks = Arc::new(Mutex::new(Vec::new()));

        let event_tx = wake.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event, &target) {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let worker_callbacks = Arc::clone(&callbacks);
        thread::Builder::new()
            .name("config-watcher".into())
            .spawn(move || debounce_loop(rx, worker_callbacks))?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(Self {
            path,
            callbacks,
            wake,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a re-read as if the file had been written.
    pub fn trigger(&self) {
        let _ = self.wake.send(());
    }
}

impl ChangeNotifier for FileWatcher {
    fn subscribe(&self, callback: ChangeCallback) -> Result<(), NotifierError> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
        Ok(())
    }
}

fn is_relevant(event: &Event, target: &OsString) -> bool {
    let kind = &event.kind;
    if !(kind.is_modify() || kind.is_create() || kind.is_remove()) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|name| name == target.as_os_str()))
}

// Exits once the watcher and its trigger handle are dropped.
fn debounce_loop(rx: mpsc::Receiver<()>, callbacks: Callbacks) {
    while rx.recv().is_ok() {
        loop {
            match rx.recv_timeout(DEBOUNCE) {
                Ok(()) => continue,
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
        tracing::debug!("Config file change detected");
        fire(&callbacks);
    }
}

/// Notifier driven entirely by [`ManualNotifier::notify`].
///
/// Callbacks run synchronously on the caller's thread.
#[derive(Default)]
pub struct ManualNotifier {
    callbacks: Callbacks,
}

impl ManualNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        fire(&self.callbacks);
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ChangeNotifier for ManualNotifier {
    fn subscribe(&self, callback: ChangeCallback) -> Result<(), NotifierError> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(notifier: &dyn ChangeNotifier) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        notifier
            .subscribe(Arc::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        hits
    }

    #[test]
    fn manual_notifier_calls_every_subscriber() {
        let notifier = ManualNotifier::new();
        let a = counter(&notifier);
        let b = counter(&notifier);
        notifier.notify();
        notifier.notify();
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.subscriber_count(), 2);
    }

    #[test]
    fn file_watcher_trigger_is_debounced() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FileWatcher::new(dir.path().join("app.json")).unwrap();
        let hits = counter(&watcher);

        for _ in 0..5 {
            watcher.trigger();
        }
        thread::sleep(DEBOUNCE * 4);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_watcher_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        let watcher = FileWatcher::new(&path).unwrap();
        let hits = counter(&watcher);

        std::fs::write(&path, b"{}").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn rejects_path_without_file_name() {
        assert!(matches!(
            FileWatcher::new(PathBuf::from("/")),
            Err(NotifierError::InvalidPath(_))
        ));
    }
}
