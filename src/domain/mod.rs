//! Validated conversion parameters and the faults raised while building them.

pub mod error;
pub mod options;
