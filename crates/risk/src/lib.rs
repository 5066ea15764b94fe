//! Risk management.
//!
//! A single actor task owns the daily counters, the active-trade ledger and
//! the emergency-stop latch; admission and completion are serialized through
//! its message queue, so concurrent strategies can never race the limits.

pub mod ledger;
pub mod limits;
pub mod manager;

pub use ledger::*;
pub use limits::*;
pub use manager::*;
