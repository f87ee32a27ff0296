//! Bridge transcript logging.
//!
//! Every line exchanged with the bridge process can be mirrored to an
//! append-only file with a UTC timestamp. This is separate from the `log`
//! facade, which carries the operational messages.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only transcript file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as ISO 8601 with milliseconds (e.g. 2026-02-04T10:15:30.123Z).
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the transcript (if one is open).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "[{}] {}: {}", utc_timestamp(), direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{name}.log` and return a shared handle.
///
/// A missing directory is created. When `log_dir` is `None` or the file
/// cannot be opened, the handle is empty and `log_line` becomes a no-op.
pub fn open_log_file(log_dir: Option<&Path>, name: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", name)))
        {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("Cannot open transcript in {}: {}", dir.display(), e);
                None
            }
        }
    });
    Arc::new(Mutex::new(file))
}
