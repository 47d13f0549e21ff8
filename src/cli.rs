use clap::Parser;
use portly::config::{APP_NAME_VAR, PORT_ENV_NAME_VAR, PORT_MAX_VAR, PORT_MIN_VAR};
use std::collections::HashMap;
use std::path::PathBuf;

/// Everything else comes from the environment (APP_NAME, DOMAIN, PORT_ENV_NAME,
/// PORT_MIN, PORT_MAX, PORTLY_TEMPLATE, PORTLY_CONFIG_DIR) or a `.env` file.
/// Flags that overlap a variable win over it.
#[derive(Parser)]
#[command(name = "portly", version)]
#[command(about = "Assign, persist and hold a stable port for an application")]
pub struct Cli {
    /// Working directory for .env, the assignment file, template and output (defaults to cwd)
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Lowest port to consider (overrides PORT_MIN)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub min: Option<u16>,

    /// Highest port to consider (overrides PORT_MAX)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub max: Option<u16>,

    /// Variable name the port is stored under (overrides PORT_ENV_NAME)
    #[arg(long)]
    pub key: Option<String>,

    /// Supervisor process name (overrides APP_NAME)
    #[arg(short, long)]
    pub app_name: Option<String>,

    /// Ignore the previously assigned port and scan the range
    #[arg(long)]
    pub forced: bool,

    /// Grow the range upward when every port in it is taken
    #[arg(long)]
    pub expand_max: bool,

    /// Assignment file, relative to the working directory
    #[arg(long, default_value = portly::port::store::DEFAULT_STORE_FILE)]
    pub env_file: PathBuf,
}

impl Cli {
    /// Flag values keyed by the variable they replace.
    pub fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(min) = self.min {
            overrides.insert(PORT_MIN_VAR.to_string(), min.to_string());
        }
        if let Some(max) = self.max {
            overrides.insert(PORT_MAX_VAR.to_string(), max.to_string());
        }
        if let Some(key) = &self.key {
            overrides.insert(PORT_ENV_NAME_VAR.to_string(), key.clone());
        }
        if let Some(app_name) = &self.app_name {
            overrides.insert(APP_NAME_VAR.to_string(), app_name.clone());
        }
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_no_overrides() {
        let cli = Cli::parse_from(["portly"]);
        assert!(cli.overrides().is_empty());
    }

    #[test]
    fn flags_map_to_variables() {
        let cli = Cli::parse_from([
            "portly", "--min", "4000", "--max", "4100", "--key", "API_PORT", "-a", "chat",
        ]);
        let overrides = cli.overrides();

        assert_eq!(overrides["PORT_MIN"], "4000");
        assert_eq!(overrides["PORT_MAX"], "4100");
        assert_eq!(overrides["PORT_ENV_NAME"], "API_PORT");
        assert_eq!(overrides["APP_NAME"], "chat");
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(Cli::try_parse_from(["portly", "--min", "0"]).is_err());
    }
}
