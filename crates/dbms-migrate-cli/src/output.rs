//! Writing structured results to local files.

use std::path::Path;

use dbms_migrate::MigrateError;
use serde::Serialize;

/// Save `value` as pretty-printed JSON, replacing any existing file.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MigrateError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbms_migrate::ErrorLog;

    #[test]
    fn test_save_error_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.json");

        let mut log = ErrorLog::new();
        log.insert("dbo.orders".into(), "Write failed".into());
        save_json(&path, &log).unwrap();

        let saved: ErrorLog =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, log);
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("errors.json");

        let err = save_json(&path, &ErrorLog::new()).unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
    }
}
