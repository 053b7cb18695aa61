//! Configuration module for HostPrep
//!
//! Provides CLI arguments, the JSON configuration file format and the
//! deployment defaults.

mod settings;

pub use settings::*;
