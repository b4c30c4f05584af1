//! Utility modules

pub mod memory_storage;
pub mod normalize;
pub mod validation;

pub use memory_storage::*;
pub use normalize::*;
pub use validation::*;
