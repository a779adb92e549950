// OAuth token discovery
//
// The GitHub OAuth token comes from the environment or from the config files
// the Copilot editor plugins maintain under the per-OS config directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// One host entry in apps.json / hosts.json
#[derive(Debug, Deserialize)]
struct HostEntry {
    #[serde(default)]
    oauth_token: Option<String>,
}

/// Finds the GitHub OAuth token, preferring an explicit override to the
/// github-copilot config file lookup.
pub fn discover_oauth_token(override_token: Option<&str>) -> Result<String> {
    if let Some(token) = override_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    let config_dir = copilot_config_dir().context("resolve user home directory")?;
    find_token_in(&config_dir)
}

fn find_token_in(config_dir: &Path) -> Result<String> {
    for name in ["apps.json", "hosts.json"] {
        let path = config_dir.join(name);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let hosts: HashMap<String, Option<HostEntry>> = serde_json::from_slice(&data)
            .with_context(|| format!("parse {}", path.display()))?;
        for (host, entry) in hosts {
            if !host.contains("github.com") {
                continue;
            }
            let token = entry
                .and_then(|e| e.oauth_token)
                .filter(|t| !t.is_empty());
            if let Some(token) = token {
                return Ok(token);
            }
        }
    }
    anyhow::bail!("GitHub OAuth token not found; set COPILOT_OAUTH_TOKEN or sign in to Copilot")
}

/// Per-OS directory holding the github-copilot config files.
fn copilot_config_dir() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let base = if cfg!(windows) {
        home.join("AppData").join("Local")
    } else {
        home.join(".config")
    };
    Some(base.join("github-copilot"))
}
