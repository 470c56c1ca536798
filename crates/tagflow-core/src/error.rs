//! Workflow error types.

use crate::context::ContextKey;
use crate::step::StepName;
use thiserror::Error;

/// Errors that can occur during pipeline execution.
///
/// Any of these aborts the run: the pipeline is fail-fast and never retries.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step failed during execution.
    #[error("Step failed: {step_name}, details: {details}")]
    StepError {
        /// The name of the step that failed.
        step_name: StepName,
        /// Details about the failure.
        details: String,
    },

    /// A step exceeded its timeout, or the job timeout expired while it ran.
    #[error("Timeout occurred in step: {step_name}")]
    Timeout {
        /// The name of the step that timed out.
        step_name: StepName,
    },

    /// Two steps were registered under the same name.
    #[error("Duplicate step: {0}")]
    DuplicateStep(StepName),

    /// A step needed a value that no earlier step produced.
    #[error("Step '{step_name}' is missing required input '{key}'")]
    MissingInput {
        /// The step that asked for the value.
        step_name: StepName,
        /// The context key that was absent or had the wrong type.
        key: ContextKey,
    },

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    /// Wraps any displayable failure as a [`WorkflowError::StepError`].
    pub fn step(step_name: StepName, details: impl std::fmt::Display) -> Self {
        WorkflowError::StepError {
            step_name,
            details: details.to_string(),
        }
    }

    /// Returns the name of the step the error is attributed to, if any.
    pub fn step_name(&self) -> Option<&StepName> {
        match self {
            WorkflowError::StepError { step_name, .. }
            | WorkflowError::Timeout { step_name }
            | WorkflowError::MissingInput { step_name, .. } => Some(step_name),
            WorkflowError::DuplicateStep(name) => Some(name),
            WorkflowError::Configuration(_) => None,
        }
    }
}
