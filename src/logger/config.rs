/// Logger configuration and command-line flag parsing
///
/// Flags recognized:
/// - `--quiet`             raise the minimum level to Warning
/// - `--verbose`           lower the minimum level to Verbose
/// - `--debug-<module>`    enable Debug logs for one tag (e.g. --debug-fetcher)
/// - `--verbose-<module>`  enable Verbose logs for one tag

use super::levels::LogLevel;
use super::tags::LogTag;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level to display (Error always passes)
    pub min_level: LogLevel,
    /// Tags with --debug-<module> enabled
    pub debug_tags: HashSet<String>,
    /// Tags with --verbose-<module> enabled
    pub verbose_tags: HashSet<String>,
    /// If non-empty, only these tags are logged
    pub enabled_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
        }
    }
}

static CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Build configuration from command-line arguments
pub fn init_from_args() {
    let mut config = LoggerConfig::default();

    if let Ok(args) = crate::global::CMD_ARGS.lock() {
        for arg in args.iter() {
            if arg == "--quiet" {
                config.min_level = LogLevel::Warning;
            } else if arg == "--verbose" {
                config.min_level = LogLevel::Verbose;
            } else if let Some(module) = arg.strip_prefix("--debug-") {
                config.debug_tags.insert(module.to_lowercase());
            } else if let Some(module) = arg.strip_prefix("--verbose-") {
                config.verbose_tags.insert(module.to_lowercase());
            }
        }
    }

    set_logger_config(config);
}

/// Get a snapshot of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    CONFIG
        .read()
        .map(|c| c.clone())
        .unwrap_or_default()
}

/// Replace the logger configuration
pub fn set_logger_config(config: LoggerConfig) {
    if let Ok(mut slot) = CONFIG.write() {
        *slot = config;
    }
}

/// Check whether --debug-<module> was passed for this tag
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = get_logger_config();
    config.min_level >= LogLevel::Debug || config.debug_tags.contains(&tag.to_debug_key())
}

/// Check whether --verbose-<module> was passed for this tag
pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    get_logger_config().verbose_tags.contains(&tag.to_debug_key())
}
