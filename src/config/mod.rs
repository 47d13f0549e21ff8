pub mod env_loader;

pub use env_loader::{load_env_file, merge_environment, validate_env_name};

use crate::error::{Error, Result};
use crate::port::PortRange;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const APP_NAME_VAR: &str = "APP_NAME";
pub const DOMAIN_VAR: &str = "DOMAIN";
pub const PORT_ENV_NAME_VAR: &str = "PORT_ENV_NAME";
pub const PORT_MIN_VAR: &str = "PORT_MIN";
pub const PORT_MAX_VAR: &str = "PORT_MAX";
pub const TEMPLATE_VAR: &str = "PORTLY_TEMPLATE";
pub const CONFIG_DIR_VAR: &str = "PORTLY_CONFIG_DIR";

pub const DEFAULT_PORT_ENV_NAME: &str = "PORT";
pub const DEFAULT_PORT_MIN: u16 = 3000;
/// `PORT_MAX` defaults to `PORT_MIN` plus this span.
pub const DEFAULT_RANGE_SPAN: u16 = 600;
pub const DEFAULT_TEMPLATE: &str = "nginx-template.txt";
pub const DEFAULT_CONFIG_DIR: &str = "nginx-configs";

/// Validated run configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub app_name: String,
    pub domain: String,
    /// Name under which the chosen port is exposed; also the store key.
    pub port_env_name: String,
    pub range: PortRange,
    pub template_path: PathBuf,
    pub config_dir: PathBuf,
}

impl Settings {
    /// Resolve settings from `<work_dir>/.env` overlaid with the process
    /// environment, then with `overrides` (keyed by variable name).
    pub fn from_env(work_dir: &Path, overrides: HashMap<String, String>) -> Result<Self> {
        let from_file = load_env_file(work_dir.join(".env"))?;
        let process: HashMap<String, String> = std::env::vars().collect();
        let mut vars = merge_environment(from_file, process);
        vars.extend(overrides);
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let app_name = required(vars, APP_NAME_VAR)?;
        let domain = required(vars, DOMAIN_VAR)?;
        validate_domain(&domain)?;

        let port_env_name = optional(vars, PORT_ENV_NAME_VAR)
            .unwrap_or_else(|| DEFAULT_PORT_ENV_NAME.to_string());
        validate_env_name(&port_env_name)?;

        let min = match optional(vars, PORT_MIN_VAR) {
            Some(raw) => parse_port(PORT_MIN_VAR, &raw)?,
            None => DEFAULT_PORT_MIN,
        };
        let max = match optional(vars, PORT_MAX_VAR) {
            Some(raw) => parse_port(PORT_MAX_VAR, &raw)?,
            None => min.saturating_add(DEFAULT_RANGE_SPAN),
        };
        let range = PortRange::new(min, max)?;

        Ok(Self {
            app_name,
            domain,
            port_env_name,
            range,
            template_path: optional(vars, TEMPLATE_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE)),
            config_dir: optional(vars, CONFIG_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)),
        })
    }
}

fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String> {
    optional(vars, name).ok_or_else(|| {
        Error::Config(format!(
            "Missing required environment variable {}",
            name
        ))
    })
}

fn parse_port(name: &str, raw: &str) -> Result<u16> {
    raw.parse::<u16>().map_err(|_| {
        Error::Config(format!("{}=`{}` is not a valid port number", name, raw))
    })
}

/// The domain doubles as the rendered config's filename.
///
/// Rejects names with path separators or a leading dot so the output cannot
/// escape the config directory.
fn validate_domain(domain: &str) -> Result<()> {
    if domain.contains('/') || domain.contains('\\') {
        return Err(Error::Config(format!(
            "Domain '{}' contains path separators",
            domain
        )));
    }

    if domain.starts_with('.') {
        return Err(Error::Config(format!(
            "Domain '{}' cannot start with a dot",
            domain
        )));
    }

    Ok(())
}
