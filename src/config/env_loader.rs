//! `.env` loading for portly.
//!
//! Values are read into a map rather than exported into the process
//! environment, so the resolved configuration stays an explicit value.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Load variables from a `.env` file.
///
/// A missing file yields an empty map: running without a `.env` is the
/// normal case. Uses dotenvy for parsing which handles:
/// - KEY=VALUE and `export KEY=VALUE`
/// - Comments starting with #
/// - Single and double quoted values
pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();

    if !path.exists() {
        return Ok(HashMap::new());
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read environment file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut env_vars = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| {
            Error::Config(format!(
                "Failed to parse environment file {}: {}",
                path.display(),
                e
            ))
        })?;
        env_vars.insert(key, value);
    }

    tracing::debug!(
        "Loaded {} variable(s) from {}",
        env_vars.len(),
        path.display()
    );

    Ok(env_vars)
}

/// Merge environment variables, later layers winning.
///
/// Priority order (highest to lowest):
/// 1. process - the live process environment
/// 2. from_file - values loaded from `.env`
pub fn merge_environment(
    from_file: HashMap<String, String>,
    process: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = from_file;
    merged.extend(process);
    merged
}

/// Validate an environment variable name.
///
/// Names must start with a letter or underscore and contain only ASCII
/// alphanumerics and underscores. The port key is written into the store as
/// `export <NAME>=<PORT>`, so anything else would produce a file no shell
/// could source.
pub fn validate_env_name(name: &str) -> Result<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(Error::Config(
            "Environment variable name cannot be empty".to_string(),
        ));
    };

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': must start with a letter or underscore",
            name
        )));
    }

    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::Config(format!(
                "Invalid environment variable name '{}': character '{}' at position {} is not allowed (must be alphanumeric or underscore)",
                name, c, i
            )));
        }
    }

    Ok(())
}
