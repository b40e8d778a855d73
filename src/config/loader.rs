//! Configuration file I/O.
//!
//! Files are pretty-printed JSON indented with tabs. Reads tolerate a writer
//! that has truncated the file but not yet flushed new content: an empty
//! file is re-read a bounded number of times before it is reported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// How many times an empty file is read before giving up.
pub const READ_ATTEMPTS: u32 = 5;

/// Pause between reads of an empty file.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Suffix appended to the configuration path when quarantining bad content.
pub const BAD_CONFIG_SUFFIX: &str = "badconfig";

/// Boxed error used to carry foreign causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for configuration handling.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File missing, empty beyond the retry bound, or not parseable.
    #[error("configuration file {} is unreadable: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("no previous configuration version to restore")]
    RestoreUnavailable,

    #[error("configuration change canceled: {0}")]
    Canceled(String),

    #[error("configuration does not round-trip through JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to persist configuration to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("change notifier subscription failed: {0}")]
    Notifier(#[from] crate::config::watcher::NotifierError),

    #[error("unexpected configuration error: {0}")]
    Unexpected(#[source] BoxError),
}

/// Result of reading the configuration file once the retry bound is applied.
#[derive(Debug)]
pub enum ReadOutcome<T> {
    Parsed(T),
    /// Still empty after every attempt.
    Empty,
    /// Content present but not a valid document for `T`.
    Invalid { raw: Vec<u8>, error: serde_json::Error },
}

/// Serialize to pretty JSON with tab indentation and a trailing newline.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::with_capacity(256);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Read and parse the file, retrying while it is empty.
///
/// I/O errors (including a missing file) are returned as-is.
pub fn read_config<T: DeserializeOwned>(path: &Path) -> io::Result<ReadOutcome<T>> {
    for attempt in 1..=READ_ATTEMPTS {
        let raw = fs::read(path)?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            tracing::trace!(path = %path.display(), attempt, "Configuration file empty, retrying");
            if attempt < READ_ATTEMPTS {
                thread::sleep(READ_RETRY_DELAY);
            }
            continue;
        }
        return Ok(match decode(&raw) {
            Ok(value) => ReadOutcome::Parsed(value),
            Err(error) => ReadOutcome::Invalid { raw, error },
        });
    }
    Ok(ReadOutcome::Empty)
}

/// Write already-encoded content, creating parent directories as needed.
pub fn write_config(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// `<path>.badconfig`
pub fn bad_config_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(BAD_CONFIG_SUFFIX);
    PathBuf::from(name)
}

/// Copy rejected content next to the configuration file.
pub fn quarantine(path: &Path, raw: &[u8]) -> io::Result<PathBuf> {
    let target = bad_config_path(path);
    fs::write(&target, raw)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        port: u16,
    }

    fn sample() -> Sample {
        Sample { name: "edge".into(), port: 8080 }
    }

    #[test]
    fn encode_uses_tab_indentation() {
        let text = String::from_utf8(encode(&sample()).unwrap()).unwrap();
        assert!(text.starts_with("{\n\t\"name\": \"edge\""), "{text}");
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn read_parses_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.json");
        write_config(&path, &encode(&sample()).unwrap()).unwrap();

        match read_config::<Sample>(&path).unwrap() {
            ReadOutcome::Parsed(value) => assert_eq!(value, sample()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn empty_file_is_reported_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, b"  \n").unwrap();

        let started = std::time::Instant::now();
        assert!(matches!(read_config::<Sample>(&path).unwrap(), ReadOutcome::Empty));
        assert!(started.elapsed() >= READ_RETRY_DELAY * (READ_ATTEMPTS - 1));
    }

    #[test]
    fn invalid_content_keeps_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, b"{ not json").unwrap();

        match read_config::<Sample>(&path).unwrap() {
            ReadOutcome::Invalid { raw, .. } => assert_eq!(raw, b"{ not json"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_config::<Sample>(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn quarantine_appends_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        let target = quarantine(&path, b"garbage").unwrap();
        assert_eq!(target, dir.path().join("app.json.badconfig"));
        assert_eq!(fs::read(target).unwrap(), b"garbage");
    }
}
