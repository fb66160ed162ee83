//! # insight-core
//!
//! Core types, traits, and abstractions for the insight extraction queue.
//!
//! This crate provides the job model, the structured job error, the
//! storage trait, and the shared defaults that the other insight crates
//! depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
