//! Safety checks for the state files of a run.
//!
//! The match cache is rewritten wholesale on every flush, so it must never
//! point at the chart database.

use anyhow::{bail, Result};
use std::path::Path;

/// Cache file extensions that would collide with a SQLite database.
const DATABASE_EXTENSIONS: &[&str] = &["sqlite", "sqlite3", "db"];

/// Validates that the cache path is safe to overwrite.
///
/// Checks:
/// - The cache cannot be the same file as the chart database
/// - The cache cannot carry a database file extension
pub fn validate_state_paths(cache: &Path, database: &Path) -> Result<()> {
    if cache == database {
        bail!(
            "Safety check failed: cache '{}' cannot be the same as database '{}'",
            cache.display(),
            database.display()
        );
    }

    let extension = cache.extension().and_then(|e| e.to_str()).unwrap_or("");
    if DATABASE_EXTENSIONS.iter().any(|ext| extension.eq_ignore_ascii_case(ext)) {
        bail!(
            "Safety check failed: cache '{}' looks like a database file",
            cache.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_paths() {
        let cache = PathBuf::from("/data/playlist-cache.json");
        let database = PathBuf::from("/data/charts.sqlite3");
        assert!(validate_state_paths(&cache, &database).is_ok());
    }

    #[test]
    fn test_cache_equals_database() {
        let path = PathBuf::from("/data/charts.sqlite3");
        let result = validate_state_paths(&path, &path);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as database"));
    }

    #[test]
    fn test_database_extension_blocked() {
        let cache = PathBuf::from("/data/other.SQLITE3");
        let database = PathBuf::from("/data/charts.sqlite3");
        assert!(validate_state_paths(&cache, &database).is_err());
    }
}
