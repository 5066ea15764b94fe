//! Venue capability layer.
//!
//! Defines the uniform [`VenueClient`] contract both exchanges are driven
//! through, the venue error taxonomy, a bounded-retry helper, a paper-trading
//! decorator with a persisted virtual ledger, and a scriptable stub venue for
//! tests.

pub mod client;
pub mod error;
pub mod paper;
pub mod retry;
pub mod stub;

pub use client::*;
pub use error::*;
pub use paper::*;
pub use retry::*;
pub use stub::*;
