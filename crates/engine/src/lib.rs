//! Premium and opportunity engine.
//!
//! Fuses ticker and order-book data from both venues with the USD/KRW rate
//! to produce signed premiums, nets expected fees, and sizes trades against
//! book liquidity.

pub mod error;
pub mod fee;
pub mod premium;
pub mod rate;
pub mod sizing;

pub use error::*;
pub use fee::*;
pub use premium::*;
pub use rate::*;
pub use sizing::*;
