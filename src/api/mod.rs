//! Configuration and statistics types shared by the public API.

pub mod config;
pub mod stats;
