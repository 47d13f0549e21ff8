// Bind/Persistence/Template fields are read only through #[error(...)].
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(portly::config::error),
        help("Set APP_NAME and DOMAIN in the environment or in a .env file")
    )]
    Config(String),

    #[error("No available port in range {min}-{max}")]
    #[diagnostic(
        code(portly::port::exhausted),
        help("Widen the range with PORT_MIN/PORT_MAX or run with --expand-max")
    )]
    NoPortAvailable { min: u16, max: u16 },

    #[error("Port {port} could not be reserved: {source}")]
    #[diagnostic(
        code(portly::port::bind_failed),
        help("Find what's using the port with: lsof -i :{port}")
    )]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    #[diagnostic(code(portly::filesystem::error))]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read template {}: {source}", .path.display())]
    #[diagnostic(
        code(portly::template::unreadable),
        help("Create the template or point PORTLY_TEMPLATE at an existing file")
    )]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Name of the lifecycle stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::NoPortAvailable { .. } => "allocation",
            Error::Bind { .. } => "reservation",
            Error::Persistence { .. } => "persistence",
            Error::Template { .. } => "render",
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Config(msg) if msg.contains("APP_NAME") || msg.contains("DOMAIN") => Some(
                "Export the variable or add it to the .env file in the working directory"
                    .to_string(),
            ),
            Error::Config(_) => None,
            Error::NoPortAvailable { min, max } => Some(format!(
                "Every port in {}-{} is bound. Free one, widen PORT_MIN/PORT_MAX, or pass --expand-max.",
                min, max
            )),
            Error::Bind { port, .. } => Some(format!(
                "Another process claimed port {} between the check and the bind. Run portly again to pick a new port.",
                port
            )),
            Error::Persistence { path, .. } => Some(format!(
                "Check that {} is writable",
                path.parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| path.display().to_string())
            )),
            Error::Template { .. } => None,
        }
    }

    /// The error and its suggestion (if any) on a single line.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}. Hint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Same as validating a PID for signalling, but only for read-only existence checks.
/// Rejects PID 0 (process group) and values that do not fit in `pid_t`.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}
