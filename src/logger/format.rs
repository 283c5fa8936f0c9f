//! Log formatting and output with ANSI colors and text wrapping
//!
//! Handles:
//! - Colorized console output with tag and level formatting
//! - Text wrapping at word boundaries
//! - Dual output (console + file)
//! - Broken pipe handling for piped commands

use super::file::write_to_file;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LOG_TYPE_WIDTH: usize = 12;
const BRACKET_SPACE_WIDTH: usize = 3;
const TOTAL_PREFIX_WIDTH: usize = TAG_WIDTH + LOG_TYPE_WIDTH + BRACKET_SPACE_WIDTH * 2;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, log_type: &str, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();
    let prefix = format!("{} ", time).dimmed().to_string();

    let tag_str = format_tag(&tag);
    let log_type_str = format_log_type(log_type);

    let base_line = format!("{}[{}] [{}] ", prefix, tag_str, log_type_str);

    let base_length = strip_ansi_codes(&base_line)
        .len()
        .max(TOTAL_PREFIX_WIDTH + 9);
    let available_space = if MAX_LINE_LENGTH > base_length {
        MAX_LINE_LENGTH - base_length
    } else {
        50
    };

    let message_chunks = wrap_text(message, available_space);

    // Print first line
    let console_line = format!("{}{}", base_line, message_chunks[0]);
    print_stdout_safe(&console_line);

    // Write to file
    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let tag_clean = tag.to_plain_string();
    let file_line = format!(
        "{} [{}] [{}] {}",
        timestamp, tag_clean, log_type, message_chunks[0]
    );
    write_to_file(&file_line);

    // Print continuation lines
    if message_chunks.len() > 1 {
        let continuation_prefix = " ".repeat(base_length);
        for chunk in &message_chunks[1..] {
            let console_continuation = format!("{}{}", continuation_prefix, chunk);
            print_stdout_safe(&console_continuation);

            let file_continuation =
                format!("{} [{}] [{}] {}", timestamp, tag_clean, log_type, chunk);
            write_to_file(&file_continuation);
        }
    }
}

/// Format a tag with appropriate color
fn format_tag(tag: &LogTag) -> ColoredString {
    let padded = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => padded.bright_yellow().bold(),
        LogTag::Database => padded.bright_blue().bold(),
        LogTag::Pool => padded.bright_cyan().bold(),
        LogTag::Api => padded.bright_purple().bold(),
        LogTag::Selector => padded.bright_white().bold(),
        LogTag::Fetcher => padded.bright_green().bold(),
        LogTag::Processor => padded.bright_magenta().bold(),
        LogTag::Staging => padded.bright_cyan().bold(),
        LogTag::Failures => padded.bright_red().bold(),
        LogTag::Recovery => padded.bright_yellow().bold(),
        LogTag::Classifier => padded.bright_green().bold(),
        LogTag::Stats => padded.bright_white().bold(),
        LogTag::Summary => padded.bright_white().bold(),
        LogTag::Test => padded.bright_blue().bold(),
        LogTag::Other(_) => padded.white().bold(),
    }
}

/// Format log type with appropriate color
fn format_log_type(log_type: &str) -> ColoredString {
    match log_type.to_uppercase().as_str() {
        "ERROR" => format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH)
            .bright_red()
            .bold(),
        "WARNING" => format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH)
            .bright_yellow()
            .bold(),
        _ => format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH)
            .white()
            .bold(),
    }
}

/// Print to stdout but ignore broken pipe errors
fn print_stdout_safe(message: &str) {
    if let Err(e) = writeln!(stdout(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
    if let Err(e) = stdout().flush() {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
}

/// Remove ANSI color codes from text
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::new();
    let mut in_escape = false;

    for ch in text.chars() {
        if ch == '\x1b' {
            in_escape = true;
        } else if in_escape && ch == 'm' {
            in_escape = false;
        } else if !in_escape {
            result.push(ch);
        }
    }
    result
}

/// Wrap text at word boundaries, respecting existing newlines
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        if line.len() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current_line = String::new();
        for word in line.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() + 1 <= max_width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                result.push(current_line);
                current_line = word.to_string();
            }
        }
        if !current_line.is_empty() {
            result.push(current_line);
        }
    }

    if result.is_empty() {
        result.push(String::new());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_short_text_is_untouched() {
        let chunks = wrap_text("hello world", 80);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_wrap_splits_at_word_boundaries() {
        let chunks = wrap_text("one two three four", 9);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 9);
        }
    }

    #[test]
    fn test_strip_ansi_codes() {
        let colored = "\x1b[31mred\x1b[0m";
        assert_eq!(strip_ansi_codes(colored), "red");
    }
}
