pub mod cap;
pub mod config;
pub mod resolver;
pub mod resumable_stream;
