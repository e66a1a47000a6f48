use crate::core::config::data::{HttpSettings, PaymentSettings, ResolverSettings, StreamSettings};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GEO_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_GEO_ENDPOINT: &str = "https://ipapi.co/json/";
pub const DEFAULT_PAYMENT_NETWORK: &str = "base-sepolia";
/// One USDC (six decimals).
pub const DEFAULT_MAX_PAYMENT_VALUE: &str = "1000000";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_ms: DEFAULT_BACKOFF_MS,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            geo_timeout_ms: DEFAULT_GEO_TIMEOUT_MS,
            geo_endpoint: DEFAULT_GEO_ENDPOINT.to_string(),
        }
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            network: DEFAULT_PAYMENT_NETWORK.to_string(),
            max_payment_value: DEFAULT_MAX_PAYMENT_VALUE.to_string(),
            rpc_url: None,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}
