// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::BulkMode, typer::MagicMode};

/// Default cap for the SMB per-direction coalescing buffer (§3, §9
/// Open Question 3).
pub const DEFAULT_SMB_BUFFER_CAP: usize = 4096;

/// Default cap for the email line buffer (§9's "suggested 64 KiB").
pub const DEFAULT_EMAIL_LINE_CAP: usize = 64 * 1024;

/// The core-relevant CLI/config surface named in §6/§10.2.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    #[serde(rename = "magicMode", default)]
    /// How the content-typer combines its built-in table with an
    /// external typer.
    pub magic_mode: MagicMode,

    #[serde(rename = "disableParsers", default)]
    /// Dissector identifiers to skip at registration time.
    pub disable_parsers: Vec<String>,

    #[serde(rename = "parsersDir", default)]
    /// Directories plug-ins would be loaded from. Dynamic plug-in
    /// loading is out of scope (§1); this field is accepted and
    /// validated (each entry must exist) so a config file written
    /// against the full contract still loads, but nothing reads it.
    pub parsers_dir: Vec<PathBuf>,

    #[serde(rename = "extraOps", default)]
    /// An opaque field-ops expression forwarded to session records at
    /// flush time, not interpreted by the core.
    pub extra_ops: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "MaxSessions", default = "default_max_sessions")]
    /// External limit on the number of simultaneously tracked sessions.
    pub max_sessions: u32,

    #[serde(rename = "SmbBufferCap", default = "default_smb_buffer_cap")]
    /// Hard cap on the SMB per-direction coalescing buffer
    /// (`MAX_SMB_BUFFER`, §9 Open Question 3).
    pub smb_buffer_cap: usize,

    #[serde(rename = "EmailLineCap", default = "default_email_line_cap")]
    /// Hard cap on the email dissector's line buffer (§9).
    pub email_line_cap: usize,

    #[serde(rename = "BulkMode", default)]
    pub bulk_mode: BulkMode,
}

fn default_max_sessions() -> u32 {
    100_000
}

fn default_smb_buffer_cap() -> usize {
    DEFAULT_SMB_BUFFER_CAP
}

fn default_email_line_cap() -> usize {
    DEFAULT_EMAIL_LINE_CAP
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_sessions: default_max_sessions(),
            smb_buffer_cap: default_smb_buffer_cap(),
            email_line_cap: default_email_line_cap(),
            bulk_mode: BulkMode::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path).context("failed to read config file")?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants; a failure here is a fatal startup error
    /// per §7 "Config error at startup ... abort startup."
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.runtime.max_sessions >= 1, "MaxSessions must be >= 1");
        ensure!(self.runtime.smb_buffer_cap >= 1024, "SmbBufferCap must be >= 1024");
        ensure!(self.runtime.email_line_cap >= 1024, "EmailLineCap must be >= 1024");

        for dir in &self.parsers_dir {
            ensure!(dir.is_dir(), "parsersDir entry {:?} does not exist", dir);
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            magic_mode: MagicMode::default(),
            disable_parsers: Vec::new(),
            parsers_dir: Vec::new(),
            extra_ops: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let mut cfg = Config::default();
        assert!(cfg.validate_and_normalize().is_ok());
    }

    #[test]
    fn rejects_zero_max_sessions() {
        let mut cfg = Config::default();
        cfg.runtime.max_sessions = 0;
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn parses_yaml() {
        let yaml = "magicMode: both\nruntime:\n  MaxSessions: 10\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.magic_mode, MagicMode::Both);
        assert_eq!(cfg.runtime.max_sessions, 10);
    }
}
