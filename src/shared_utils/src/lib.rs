//! Small helpers shared by the meter-history crates.

pub mod duration;
pub mod env;
