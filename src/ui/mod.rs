//! Surfaces served to an embedding UI.

pub mod embed;
