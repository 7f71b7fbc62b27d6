//! Application settings loaded from config.toml
//!
//! Every field has a default, so a missing file or a partial file is valid. Secrets
//! (the JWT signing secret, the database URL) are read from the environment instead
//! and never live in this struct.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP listener settings
    pub server: ServerSettings,
    /// Pagination limits for list endpoints
    pub listing: ListingSettings,
    /// Lab testing behaviour
    pub testing: TestingSettings,
    /// Outbound notification settings
    pub notifications: NotificationSettings,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address to bind, e.g. `"0.0.0.0:4002"`
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4002".to_string(),
        }
    }
}

/// Pagination limits
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ListingSettings {
    /// Page size used when none is requested
    pub default_page_size: u64,
    /// Hard cap applied to every requested page size
    pub max_page_size: u64,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            max_page_size: 200,
        }
    }
}

/// How the overall test status is derived from the five screening results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatusPolicy {
    /// Only the results supplied in the current call are considered; any Reactive
    /// means Reactive, anything else means Passed.
    #[default]
    Eager,
    /// The merged record is considered; Passed requires all five screens resolved.
    Strict,
}

/// Lab testing settings
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct TestingSettings {
    /// How the overall status is derived
    pub overall_status_policy: OverallStatusPolicy,
}

/// Which outbound transport to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Write messages to the log and report success
    #[default]
    Log,
    /// Report every delivery as failed; messages stay auditable as `Failed`
    Disabled,
}

/// Outbound notification settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Base URL of the donor portal, used for links in emails
    pub portal_url: String,
    /// Outbound transport
    pub transport: Transport,
    /// Sender shown on outbound messages
    pub sender: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            portal_url: "https://donor.example.com".to_string(),
            transport: Transport::default(),
            sender: "Life Link <no-reply@example.com>".to_string(),
        }
    }
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_settings(&contents)
}

/// Parses settings from TOML text.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads settings from `CONFIG_PATH` (default `./config.toml`), or defaults if the file is absent.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        info!("Loading settings from {path}");
        load_settings(&path)
    } else {
        info!("No settings file at {path}, using defaults");
        Ok(Settings::default())
    }
}
