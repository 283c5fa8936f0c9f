//! Centralized path resolution for PriceTracker
//!
//! All file and directory paths are resolved through this module so the
//! tracker behaves the same regardless of where it is launched from.
//!
//! ## Path Strategy
//!
//! Platform data directories are used as the base:
//! - **macOS**: `~/Library/Application Support/PriceTracker/`
//! - **Windows**: `%LOCALAPPDATA%\PriceTracker\`
//! - **Linux**: `$XDG_DATA_HOME/PriceTracker/` (fallback `~/.local/share/PriceTracker/`)
//!
//! ## Directory Structure
//!
//! ```text
//! ~/PriceTracker/
//! ├── data/
//! │ ├── settings.json
//! │ └── pricetracker.db
//! └── logs/
//!     └── pricetracker_*.log
//! ```

use once_cell::sync::Lazy;
use std::path::PathBuf;

// =============================================================================
// BASE DIRECTORY RESOLUTION
// =============================================================================

/// Lazy-initialized base directory (thread-safe)
static BASE_DIRECTORY: Lazy<PathBuf> = Lazy::new(resolve_base_directory);

/// Resolves the base directory for all tracker data
fn resolve_base_directory() -> PathBuf {
  const APP_DIR: &str = "PriceTracker";

  if let Some(dir) = dirs::data_local_dir() {
    return dir.join(APP_DIR);
  }

  if let Some(dir) = dirs::data_dir() {
    return dir.join(APP_DIR);
  }

  if let Some(home) = dirs::home_dir() {
    return home.join(APP_DIR);
  }

  PathBuf::from(APP_DIR)
}

// =============================================================================
// DIRECTORY ACCESSORS
// =============================================================================

/// Returns the base directory for all tracker data
pub fn get_base_directory() -> PathBuf {
  BASE_DIRECTORY.clone()
}

/// Returns the data directory path (database + settings)
pub fn get_data_directory() -> PathBuf {
  BASE_DIRECTORY.join("data")
}

/// Returns the logs directory path
pub fn get_logs_directory() -> PathBuf {
  BASE_DIRECTORY.join("logs")
}

// =============================================================================
// FILE PATHS
// =============================================================================

/// Returns the settings file path
pub fn get_settings_path() -> PathBuf {
  get_data_directory().join("settings.json")
}

/// Returns the tracker database path
pub fn get_database_path() -> PathBuf {
  get_data_directory().join("pricetracker.db")
}

/// Returns all related files for a SQLite database (main DB, SHM, WAL)
///
/// SQLite creates sidecar files for write-ahead logging and shared memory.
/// This helper returns all three files for cleanup operations.
pub fn get_db_with_wal_files(db_path: PathBuf) -> Vec<PathBuf> {
  vec![
    db_path.clone(),
    db_path.with_extension("db-shm"),
    db_path.with_extension("db-wal"),
  ]
}

// =============================================================================
// DIRECTORY CREATION
// =============================================================================

/// Ensures all required directories exist
///
/// Creates the base directory and all subdirectories needed for operation.
/// Call this early in the application startup.
pub fn ensure_all_directories() -> Result<(), String> {
  let dirs_to_create = vec![
    ("base", get_base_directory()),
    ("data", get_data_directory()),
    ("logs", get_logs_directory()),
  ];

  for (name, dir) in dirs_to_create {
    if !dir.exists() {
      std::fs::create_dir_all(&dir).map_err(|e| {
        format!(
          "Failed to create {} directory at {}: {}",
          name,
          dir.display(),
          e
        )
      })?;

      eprintln!("Created directory: {}", dir.display());
    }
  }

  Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
