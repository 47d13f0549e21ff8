use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const READY_MARKER_FILE: &str = ".portly.ready";

/// `<work_dir>/.portly.ready`
pub fn ready_marker_path(work_dir: &Path) -> PathBuf {
    work_dir.join(READY_MARKER_FILE)
}

/// Signal downstream tooling that the port is held and the config written.
///
/// The file's existence is the signal; its content is an RFC 3339 timestamp.
pub fn mark_ready(work_dir: &Path) -> Result<PathBuf> {
    let marker_file = ready_marker_path(work_dir);
    let timestamp = chrono::Utc::now().to_rfc3339();

    fs::write(&marker_file, timestamp).map_err(|e| Error::persistence(&marker_file, e))?;

    tracing::debug!("Readiness marker written to {}", marker_file.display());
    Ok(marker_file)
}

pub fn is_ready(work_dir: &Path) -> bool {
    ready_marker_path(work_dir).exists()
}

/// Remove the readiness marker. Missing is fine.
pub fn clear_ready(work_dir: &Path) -> Result<()> {
    let marker_file = ready_marker_path(work_dir);

    match fs::remove_file(&marker_file) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::persistence(&marker_file, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_ready(dir.path()));

        let path = mark_ready(dir.path()).unwrap();
        assert!(is_ready(dir.path()));
        let content = fs::read_to_string(path).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&content).is_ok());

        clear_ready(dir.path()).unwrap();
        assert!(!is_ready(dir.path()));
        // Clearing twice is fine
        clear_ready(dir.path()).unwrap();
    }

    #[test]
    fn mark_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = mark_ready(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
    }
}
