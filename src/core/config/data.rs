use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub payment: PaymentSettings,
    #[serde(default)]
    pub http: HttpSettings,
}

/// Retry policy for resumable response streams.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamSettings {
    pub max_retries: u32,
    /// Fixed pause between a read failure and the next reader.
    pub backoff_ms: u64,
    /// An active stream idle for longer than this gets a fresh retry budget
    /// when resumed.
    pub inactivity_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverSettings {
    pub geo_timeout_ms: u64,
    pub geo_endpoint: String,
}

/// Limits applied by the payment gateway wrapper.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PaymentSettings {
    /// x402 network name, e.g. `base` or `base-sepolia`.
    pub network: String,
    /// Largest accepted `maxAmountRequired`, as a decimal integer in the
    /// asset's smallest unit.
    pub max_payment_value: String,
    /// JSON-RPC endpoint used for balance reads. Falls back to the
    /// network's public endpoint.
    pub rpc_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl StreamSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

impl ResolverSettings {
    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms)
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.config/capdeck/config.toml` → `~/.config/capdeck/config.toml`
/// - Windows paths are returned unchanged
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
