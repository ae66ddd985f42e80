//! Configuration file handling. A small TOML file names the TAP device
//! and the UDP broadcast group this bridge joins.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of the TAP device node, or the clone device `/dev/net/tun`.
    pub device: PathBuf,
    /// Interface name to attach when `device` is the clone device.
    #[serde(default)]
    pub interface: Option<String>,
    /// UDP port shared by every peer on the segment.
    pub port: u16,
    /// IPv4 broadcast address of the segment.
    pub broadcast: Ipv4Addr,
    /// Where to record the PID after detaching.
    #[serde(default)]
    pub pidfile: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg = toml::from_str(&text)
            .with_context(|| format!("invalid TOML in {}", path.display()))?;
        Ok(cfg)
    }
}
