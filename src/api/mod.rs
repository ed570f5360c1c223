//! Public configuration and statistics types.

pub mod config;
pub mod stats;
