//! Reverse-proxy config rendering.
//!
//! `{{NAME}}` placeholders are replaced in a single pass, so a substituted
//! value containing braces is never expanded again.

use crate::error::{Error, Result};
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Placeholder that always receives the allocated port.
pub const PORT_PLACEHOLDER: &str = "PORT";

/// Global template regex compiled once
static TEMPLATE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_template_regex() -> &'static Regex {
    TEMPLATE_REGEX
        .get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("static regex pattern is valid"))
}

/// Substitute `placeholders` into `template`.
///
/// `PORT` gets `port` whatever value the caller paired with it. Names with no
/// entry are left as written. When a name appears twice, the first entry wins.
pub fn render(template: &str, placeholders: &[(String, String)], port: u16) -> String {
    let port = port.to_string();

    get_template_regex()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            if name == PORT_PLACEHOLDER {
                return port.clone();
            }
            placeholders
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// List the placeholder names a template uses, in order of first appearance.
pub fn placeholders_in(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in get_template_regex().captures_iter(template) {
        if !names.iter().any(|n| n == &cap[1]) {
            names.push(cap[1].to_string());
        }
    }
    names
}

pub fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Template {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `content` to `<dir>/<filename>`, creating `dir` if needed.
pub fn write_config(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;

    let path = dir.join(filename);
    fs::write(&path, content).map_err(|e| Error::persistence(&path, e))?;

    tracing::info!("Config written to {}", path.display());
    Ok(path)
}
