//! Data Models
//!
//! Configuration structures shared by storage and services.

pub mod settings;

pub use settings::*;
