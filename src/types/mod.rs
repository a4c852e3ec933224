//! Identity Types
//!
//! Core type definitions for credentials, sign-in and webhooks.

pub mod auth;
pub mod config;
pub mod token;
pub mod webhook;

pub use auth::*;
pub use config::*;
pub use token::*;
pub use webhook::*;
