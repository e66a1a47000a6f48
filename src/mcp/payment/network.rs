use crate::mcp::error::{McpError, McpResult};

/// Chain parameters for a network the gateway can pay on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: &'static str,
    pub chain_id: u64,
    /// USDC contract used as the default payment asset.
    pub usdc: &'static str,
    pub default_rpc_url: &'static str,
}

pub const NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "base",
        chain_id: 8453,
        usdc: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        default_rpc_url: "https://mainnet.base.org",
    },
    NetworkInfo {
        name: "base-sepolia",
        chain_id: 84532,
        usdc: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        default_rpc_url: "https://sepolia.base.org",
    },
    NetworkInfo {
        name: "avalanche",
        chain_id: 43114,
        usdc: "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
        default_rpc_url: "https://api.avax.network/ext/bc/C/rpc",
    },
    NetworkInfo {
        name: "avalanche-fuji",
        chain_id: 43113,
        usdc: "0x5425890298aed601595a70AB815c96711a31Bc65",
        default_rpc_url: "https://api.avax-test.network/ext/bc/C/rpc",
    },
];

pub fn network_info(name: &str) -> McpResult<&'static NetworkInfo> {
    NETWORKS
        .iter()
        .find(|network| network.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            let known: Vec<&str> = NETWORKS.iter().map(|network| network.name).collect();
            McpError::PaymentValidation(format!(
                "unsupported network '{name}' (expected one of: {})",
                known.join(", ")
            ))
        })
}

/// Validates a `0x`-prefixed 20-byte hex address.
pub fn check_address(address: &str) -> McpResult<&str> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .filter(|digits| digits.len() == 40 && hex::decode(digits).is_ok());
    digits.ok_or_else(|| McpError::protocol(format!("Invalid account address '{address}'")))
}
