//! Step guard trait.

use crate::context::Context;
use crate::step::Step;

/// Optional trait for steps guarded by a run-time condition.
///
/// A step whose guard returns `false` is skipped: it is not executed, it is
/// not a failure, and the run continues with the next step.
///
/// # Examples
///
/// ```
/// use tagflow_core::{Step, StepName, Context, WorkflowError, Conditional};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct NotifyStep {
///     webhook: String,
/// }
///
/// #[async_trait]
/// impl Step for NotifyStep {
///     async fn execute(&self, _ctx: &mut Context) -> Result<(), WorkflowError> {
///         Ok(())
///     }
///
///     fn name(&self) -> StepName {
///         StepName::new("notify")
///     }
/// }
///
/// impl Conditional for NotifyStep {
///     fn should_run(&self, _ctx: &Context) -> bool {
///         !self.webhook.is_empty()
///     }
/// }
///
/// let step = NotifyStep { webhook: String::new() };
/// assert!(!step.should_run(&Context::new()));
/// ```
pub trait Conditional: Step {
    /// Returns `true` if the step should execute in this run.
    fn should_run(&self, _ctx: &Context) -> bool {
        true
    }
}
