//! Configuration.
//!
//! Rules
//! - File: `$PROBOX_CONFIG`, else `$XDG_CONFIG_HOME/probox/config.yaml`, else
//!   `~/.config/probox/config.yaml`. A missing file means defaults; a malformed one is an error.
//! - Environment overrides (`PROBOX_*`) win over the file; empty values are ignored.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{ProboxError, Result};

pub const DEFAULT_BASE_IMAGE: &str = "base";
pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_NETWORK: &str = "slirp4netns:allow_host_loopback=true";
pub const DEFAULT_AGENT_PROGRAM: &str = "ssh-agent";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Runtime binary name or path; autodetected when unset.
    pub runtime: Option<String>,
    pub base_image: String,
    pub default_shell: String,
    pub network: String,
    pub agent_program: String,
    pub overlay_dir: Option<PathBuf>,
    pub push_overlay_on_create: bool,
    /// Per runtime call; unset waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: None,
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            default_shell: DEFAULT_SHELL.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            agent_program: DEFAULT_AGENT_PROGRAM.to_string(),
            overlay_dir: None,
            push_overlay_on_create: true,
            timeout_secs: None,
        }
    }
}

/// Trimmed env getter returning Some when non-empty.
fn env_trim(k: &str) -> Option<String> {
    env::var(k)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn config_home() -> Option<PathBuf> {
    env_trim("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| home::home_dir().map(|h| h.join(".config")))
}

pub fn default_config_path() -> Option<PathBuf> {
    if let Some(p) = env_trim("PROBOX_CONFIG") {
        return Some(PathBuf::from(p));
    }
    config_home().map(|d| d.join("probox").join("config.yaml"))
}

impl Config {
    /// File (if any) plus environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match default_config_path() {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text).map_err(|e| {
                ProboxError::config(format!("{}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn apply_env(&mut self) {
        if let Some(v) = env_trim("PROBOX_RUNTIME") {
            self.runtime = Some(v);
        }
        if let Some(v) = env_trim("PROBOX_BASE_IMAGE") {
            self.base_image = v;
        }
        if let Some(v) = env_trim("PROBOX_DEFAULT_SHELL") {
            self.default_shell = v;
        }
        if let Some(v) = env_trim("PROBOX_NETWORK") {
            self.network = v;
        }
        if let Some(v) = env_trim("PROBOX_AGENT") {
            self.agent_program = v;
        }
        if let Some(v) = env_trim("PROBOX_OVERLAY_DIR") {
            self.overlay_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_trim("PROBOX_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(0) => self.timeout_secs = None,
                Ok(n) => self.timeout_secs = Some(n),
                Err(_) => crate::warn_print(&format!(
                    "ignoring PROBOX_TIMEOUT_SECS={v}: not a number of seconds"
                )),
            }
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    /// Overlay directory, explicit or the conventional one next to the config file.
    pub fn overlay_dir(&self) -> Option<PathBuf> {
        self.overlay_dir
            .clone()
            .or_else(|| config_home().map(|d| d.join("probox").join("overlay")))
    }
}
