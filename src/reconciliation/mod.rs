//! Receipt reconciliation and balance settlement
//!
//! [`classify`] decides the status of every submitted receipt id from data
//! already read; [`engine`] loads that data, compares the validated total to
//! the net amount due and commits the settlement.

pub mod classify;
pub mod engine;

pub use classify::*;
pub use engine::*;
