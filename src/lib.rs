//! capdeck is the runtime core that lets a chat persona ("cap") use tools
//! served by remote MCP servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] provides the transports (streamable HTTP, SSE, cross-frame
//!   post-message), the canonical client, the signed-request and x402
//!   payment decorators, and the per-cap session manager.
//! - [`core`] owns cap definitions, configuration, prompt resolution and the
//!   resumable response stream.
//! - [`ui`] relays stream output and theme changes into an embedding frame.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod mcp;
pub mod ui;
pub mod utils;
