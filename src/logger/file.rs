//! File persistence for log output
//!
//! Appends to a daily log file under the logs directory. File output is
//! best-effort, a failed write never interrupts the tracker.

use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

static LOG_FILE: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(None));

/// Open the daily log file for appending
///
/// Called once from `logger::init()`. If the logs directory does not exist
/// yet or the file cannot be opened, file logging stays disabled.
pub fn init_file_logging() {
    let logs_dir = crate::paths::get_logs_directory();
    if !logs_dir.exists() {
        if std::fs::create_dir_all(&logs_dir).is_err() {
            return;
        }
    }

    let filename = format!("pricetracker_{}.log", Local::now().format("%Y-%m-%d"));
    let path = logs_dir.join(filename);

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            if let Ok(mut slot) = LOG_FILE.lock() {
                *slot = Some(file);
            }
        }
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", path.display(), e);
        }
    }
}

/// Append one line to the log file (no-op when file logging is disabled)
pub fn write_to_file(line: &str) {
    if let Ok(mut slot) = LOG_FILE.lock() {
        if let Some(file) = slot.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Flush pending writes to disk
pub fn flush_file_logging() {
    if let Ok(mut slot) = LOG_FILE.lock() {
        if let Some(file) = slot.as_mut() {
            let _ = file.flush();
        }
    }
}
