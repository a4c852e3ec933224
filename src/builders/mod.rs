//! Builders
//!
//! Fluent builder patterns for identity client configuration.

pub mod config;

pub use config::{client_config, ClientConfigBuilder};
