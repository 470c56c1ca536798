//! Core traits and types for the tagflow release runner.
//!
//! This crate has no runtime dependencies. It defines what a pipeline step
//! is, how steps share data, and how they fail.
//!
//! # Core Types
//!
//! - [`Step`] - The core trait for pipeline steps
//! - [`Context`] - Heterogeneous type storage for sharing data between steps
//! - [`WorkflowError`] - Error types for pipeline execution
//!
//! # Optional Traits
//!
//! - [`Conditional`] - Guard a step so it is skipped instead of executed

mod context;
mod error;
mod step;
mod traits;

pub use context::{Context, ContextKey};
pub use error::WorkflowError;
pub use step::{Step, StepName};
pub use traits::Conditional;
