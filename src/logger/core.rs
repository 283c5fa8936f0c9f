/// Core logging implementation with automatic filtering
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Check against minimum log level threshold
/// 3. Debug level requires --debug-<module> flag for that tag
/// 4. Verbose level requires --verbose flag OR --verbose-<module> flag for that tag
/// 5. If enabled_tags is non-empty, tag must be in the set

use super::config::{get_logger_config, is_debug_enabled_for_tag, is_verbose_enabled_for_tag};
use super::levels::LogLevel;
use super::tags::LogTag;

/// Check if a log message should be displayed
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    let config = get_logger_config();

    // Rule 1: Errors always log (critical)
    if level == LogLevel::Error {
        return true;
    }

    // Rule 2: Check minimum level threshold
    if level > config.min_level {
        // Debug and Verbose can still be enabled per-tag below
        if level == LogLevel::Debug {
            return is_debug_enabled_for_tag(tag);
        }
        if level == LogLevel::Verbose {
            return is_verbose_enabled_for_tag(tag);
        }
        return false;
    }

    // Rule 5: Check if tag is enabled (empty set = all enabled)
    if !config.enabled_tags.is_empty() {
        let tag_name = tag.to_debug_key();
        if !config.enabled_tags.contains(&tag_name) {
            return false;
        }
    }

    true
}

/// Internal logging function with automatic filtering
pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level.as_str(), message);
}
