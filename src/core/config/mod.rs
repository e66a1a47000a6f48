pub mod data;
pub mod defaults;
pub mod io;

pub use data::{Config, HttpSettings, PaymentSettings, ResolverSettings, StreamSettings};
pub use io::ConfigError;
