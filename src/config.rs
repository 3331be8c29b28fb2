use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Argument names injected by the Node.js module wrapper. They never show up as user variables.
pub const DEFAULT_EXCLUDED_ARGUMENTS: [&str; 5] =
    ["__dirname", "__filename", "exports", "module", "require"];

/// Settings for one tracing session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Basename of the user's script, matched exactly against frame sources.
    pub target_filename: String,
    pub host: String,
    pub port: u16,
    pub excluded_arguments: BTreeSet<String>,
    /// Seconds to wait for any single response. `0` waits forever.
    pub request_timeout_secs: u64,
    pub connect_attempts: u32,
    pub connect_interval_ms: u64,
    /// Issue a step-in as soon as the handshake arrives.
    pub step_on_connect: bool,
    /// Stop stepping after this many trace records.
    pub max_steps: Option<usize>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            target_filename: String::new(),
            host: "127.0.0.1".to_string(),
            port: 5858,
            excluded_arguments: DEFAULT_EXCLUDED_ARGUMENTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            request_timeout_secs: 30,
            connect_attempts: 20,
            connect_interval_ms: 250,
            step_on_connect: true,
            max_steps: None,
        }
    }
}

impl InspectorConfig {
    pub fn new(target_filename: impl Into<String>, port: u16) -> Self {
        Self {
            target_filename: target_filename.into(),
            port,
            ..Self::default()
        }
    }

    /// Load settings from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_filename.is_empty() {
            return Err(Error::Config("target filename must not be empty".into()));
        }
        if self.target_filename.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "target filename `{}` must be a basename, not a path",
                self.target_filename
            )));
        }
        if self.port == 0 {
            return Err(Error::Config("debug port must be non-zero".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }
}
