use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WatchdogConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_fallback_target")]
    pub fallback_target: String,
    #[serde(default = "default_supplicant_service")]
    pub supplicant_service: String,
    #[serde(default = "default_dhcp_service")]
    pub dhcp_service: String,
}

fn default_interface() -> String { "wlan0".into() }
fn default_check_interval() -> u64 { 30 }
fn default_fallback_target() -> String { "8.8.8.8".into() }
fn default_supplicant_service() -> String { "wpa_supplicant".into() }
fn default_dhcp_service() -> String { "dhcpcd".into() }

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            check_interval: default_check_interval(),
            fallback_target: default_fallback_target(),
            supplicant_service: default_supplicant_service(),
            dhcp_service: default_dhcp_service(),
        }
    }
}

impl WatchdogConfig {
    /// Reads the config from `path`, or from `config.json` in the working
    /// directory when it exists, or falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            bail!("interface name must not be empty");
        }
        if self.check_interval == 0 {
            bail!("check_interval must be at least 1 second");
        }
        if self.fallback_target.trim().is_empty() {
            bail!("fallback_target must not be empty");
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}
