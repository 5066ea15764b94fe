//! Core data types for the KRW/USDT arbitrage engine.

pub mod coin;
pub mod market;
pub mod opportunity;
pub mod premium;
pub mod venue;

pub use coin::*;
pub use market::*;
pub use opportunity::*;
pub use premium::*;
pub use venue::*;
