//! Structured logging for PriceTracker
//!
//! This module provides a clean, ergonomic logging API with:
//! - Automatic debug mode filtering from command-line arguments
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<module> flags
//! - Dual output: colored console + file persistence
//!
//! ## Usage
//!
//! ```rust
//! use pricetracker::logger::{self, LogTag};
//!
//! logger::error(LogTag::Api, "Connection failed");
//! logger::warning(LogTag::Pool, "Pool exhausted, opening direct connection");
//! logger::info(LogTag::Fetcher, "Cycle complete");
//! logger::debug(LogTag::Processor, "Document details: ..."); // Only if --debug-processor
//! ```
//!
//! ## Initialization
//!
//! Call once at startup, before any logging occurs:
//! ```rust
//! pricetracker::logger::init();
//! ```

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

// Re-export public types
pub use config::{get_logger_config, init_from_args, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Parses command-line arguments for debug flags, configures per-module
/// debug modes and initializes file logging.
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

/// Log with an explicit event label (e.g. "CYCLE", "RESET")
///
/// Event-labeled logs are emitted at INFO level; the label takes the place
/// of the level string in the output so cycle summaries stay scannable.
pub fn log(tag: LogTag, event: &str, message: &str) {
    if !core::should_log(&tag, LogLevel::Info) {
        return;
    }
    format::format_and_log(tag, event, message);
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics)
///
/// Debug logs are ONLY shown when the --debug-<module> flag is provided.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (very detailed tracing)
///
/// Verbose logs are ONLY shown when the --verbose flag is provided.
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush all pending log writes
///
/// Call this during shutdown to ensure all logs are written to disk.
pub fn flush() {
    file::flush_file_logging();
}
