//! Core domain models for stagegate
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, steps, and their configuration.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod hook;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod step;

pub use condition::*;
pub use context::*;
pub use error::*;
pub use hook::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use step::*;
