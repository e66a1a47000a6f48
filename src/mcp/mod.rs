//! Model Context Protocol plumbing: transports, the canonical client, the
//! signing and payment decorators, and the per-cap session manager.

pub mod client;
pub mod error;
pub mod identity;
pub mod payment;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;
