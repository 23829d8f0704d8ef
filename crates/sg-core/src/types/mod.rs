//! Core data types: sides, positions, protective-order views, precision and
//! reconciliation results.

pub mod enums;
pub mod precision;
pub mod trading;

pub use enums::*;
pub use precision::*;
pub use trading::*;
