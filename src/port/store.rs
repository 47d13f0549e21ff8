use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE_FILE: &str = ".portly.env";

/// Durable key -> port mapping.
///
/// Holds at most one assignment. Reads never fail: a missing or garbled
/// record is just "no prior assignment". Writes replace the whole record.
///
/// # Implementations
///
/// - [`EnvFileStore`] - a sourceable `export KEY=PORT` file
/// - [`MemoryStore`] - in-process only, for tests and dry runs
pub trait AssignmentStore: Send + Sync {
    /// Look up the last assigned port for `key`.
    fn read(&self, key: &str) -> Option<u16>;

    /// Replace the stored assignment with `key` -> `port`.
    fn write(&mut self, key: &str, port: u16) -> Result<()>;
}

/// Store backed by a shell-sourceable env file (`export PORT=3042`).
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<work_dir>/.portly.env`
    pub fn in_dir(work_dir: &Path) -> Self {
        Self::new(work_dir.join(DEFAULT_STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(contents: &str, key: &str) -> Option<u16> {
        let pattern = format!(r"^\s*export\s+{}=(\d+)\s*$", regex::escape(key));
        let re = Regex::new(&pattern).ok()?;

        contents
            .lines()
            .filter_map(|line| re.captures(line))
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
            .find(|port| *port != 0)
    }

    /// Write-then-rename so a crash mid-write never leaves a truncated record.
    fn atomic_write(path: &Path, contents: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let result = Self::write_then_rename(&temp_path, path, contents);
        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", temp_path.display(), e);
                }
            }
        }
        result
    }

    fn write_then_rename(temp_path: &Path, path: &Path, contents: &str) -> Result<()> {
        let mut file =
            fs::File::create(temp_path).map_err(|e| Error::persistence(temp_path, e))?;

        file.write_all(contents.as_bytes())
            .map_err(|e| Error::persistence(temp_path, e))?;
        file.sync_all()
            .map_err(|e| Error::persistence(temp_path, e))?;
        drop(file);

        fs::rename(temp_path, path).map_err(|e| Error::persistence(path, e))
    }
}

impl AssignmentStore for EnvFileStore {
    fn read(&self, key: &str) -> Option<u16> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable assignment file {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };
        Self::parse(&contents, key)
    }

    fn write(&mut self, key: &str, port: u16) -> Result<()> {
        Self::atomic_write(&self.path, &format!("export {}={}\n", key, port))?;
        tracing::info!("Port {} written to {}", port, self.path.display());
        Ok(())
    }
}

/// In-memory store; holds a single assignment like the file store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    assignment: Option<(String, u16)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assignment(key: &str, port: u16) -> Self {
        Self {
            assignment: Some((key.to_string(), port)),
        }
    }
}

impl AssignmentStore for MemoryStore {
    fn read(&self, key: &str) -> Option<u16> {
        self.assignment
            .as_ref()
            .filter(|(k, port)| k == key && *port != 0)
            .map(|(_, port)| *port)
    }

    fn write(&mut self, key: &str, port: u16) -> Result<()> {
        self.assignment = Some((key.to_string(), port));
        Ok(())
    }
}
