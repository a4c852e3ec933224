//! Core Components
//!
//! Transport, clock and request authentication infrastructure.

pub mod authenticating;
pub mod clock;
pub mod transport;

pub use authenticating::*;
pub use clock::*;
pub use transport::*;
