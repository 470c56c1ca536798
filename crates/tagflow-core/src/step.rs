//! Step trait and related types.

use crate::context::Context;
use crate::error::WorkflowError;
use async_trait::async_trait;
use std::fmt::{self, Debug};

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A pipeline step that can be executed asynchronously.
///
/// # Examples
///
/// ```
/// use tagflow_core::{Step, StepName, Context, WorkflowError};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct StampStep;
///
/// #[async_trait]
/// impl Step for StampStep {
///     async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
///         ctx.insert("stamped", true);
///         Ok(())
///     }
///
///     fn name(&self) -> StepName {
///         StepName::new("stamp")
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Executes the step logic. An error aborts the run.
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError>;

    /// Returns the step name.
    fn name(&self) -> StepName;
}
