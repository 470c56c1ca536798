//! Sequential engine for executing pipeline steps.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tagflow_core::{Conditional, Context, Step, StepName, WorkflowError};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

/// A pipeline of steps executed one after another in registration order.
///
/// The first failing step aborts the run. Steps registered with
/// [`WorkflowBuilder::add_conditional`] are skipped when their guard is false.
pub struct Workflow {
    steps: Vec<StepEntry>,
    job_timeout: Option<Duration>,
}

enum Runnable {
    Plain(Box<dyn Step>),
    Guarded(Box<dyn Conditional>),
}

impl Runnable {
    fn should_run(&self, ctx: &Context) -> bool {
        match self {
            Runnable::Plain(_) => true,
            Runnable::Guarded(step) => step.should_run(ctx),
        }
    }

    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        match self {
            Runnable::Plain(step) => step.execute(ctx).await,
            Runnable::Guarded(step) => step.execute(ctx).await,
        }
    }
}

struct StepEntry {
    name: StepName,
    step: Runnable,
    timeout: Option<Duration>,
}

/// What happened to a single step in a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step executed and returned successfully.
    Succeeded,
    /// The step's guard was false, so it never executed.
    Skipped,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Steps that were reached, in execution order.
    pub steps: Vec<(StepName, StepStatus)>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Returns the status of the named step, or `None` if it was never reached.
    pub fn status(&self, name: &str) -> Option<StepStatus> {
        self.steps
            .iter()
            .find(|(step, _)| step.as_str() == name)
            .map(|(_, status)| *status)
    }

    /// Returns `true` if the named step actually executed.
    pub fn ran(&self, name: &str) -> bool {
        self.status(name) == Some(StepStatus::Succeeded)
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field(
                "steps",
                &self.steps.iter().map(|e| &e.name).collect::<Vec<_>>(),
            )
            .field("job_timeout", &self.job_timeout)
            .finish()
    }
}

impl Workflow {
    /// Creates a new workflow builder.
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    /// Returns the registered step names in execution order.
    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.steps.iter().map(|e| &e.name)
    }

    /// Returns the number of registered steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Executes every step in order, stopping at the first failure.
    pub async fn execute(&self, ctx: &mut Context) -> Result<RunReport, WorkflowError> {
        let started = Instant::now();
        let deadline = self.job_timeout.map(|t| started + t);
        let mut report = Vec::with_capacity(self.steps.len());

        for entry in &self.steps {
            if !entry.step.should_run(ctx) {
                info!("Step '{}' skipped: condition not met", entry.name);
                report.push((entry.name.clone(), StepStatus::Skipped));
                continue;
            }

            info!("Step '{}' started", entry.name);
            match self.execute_step(entry, deadline, ctx).await {
                Ok(()) => {
                    info!("Step '{}' completed successfully", entry.name);
                    report.push((entry.name.clone(), StepStatus::Succeeded));
                }
                Err(e) => {
                    warn!("Step '{}' failed: {}", entry.name, e);
                    return Err(e);
                }
            }
        }

        Ok(RunReport {
            steps: report,
            elapsed: started.elapsed(),
        })
    }

    async fn execute_step(
        &self,
        entry: &StepEntry,
        deadline: Option<Instant>,
        ctx: &mut Context,
    ) -> Result<(), WorkflowError> {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let limit = match (entry.timeout, remaining) {
            (Some(step), Some(job)) => Some(step.min(job)),
            (step, job) => step.or(job),
        };

        match limit {
            Some(limit) => match timeout(limit, entry.step.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::Timeout {
                    step_name: entry.name.clone(),
                }),
            },
            None => entry.step.execute(ctx).await,
        }
    }
}

/// Builder for constructing [`Workflow`] instances.
#[derive(Default)]
pub struct WorkflowBuilder {
    steps: Vec<StepEntry>,
    job_timeout: Option<Duration>,
}

impl WorkflowBuilder {
    /// Creates a new empty workflow builder.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            job_timeout: None,
        }
    }

    fn push(mut self, name: impl Into<StepName>, step: Runnable, timeout: Option<Duration>) -> Self {
        self.steps.push(StepEntry {
            name: name.into(),
            step,
            timeout,
        });
        self
    }

    /// Appends a step that always runs.
    pub fn add_step<S: Step + 'static>(self, name: impl Into<StepName>, step: S) -> Self {
        self.push(name, Runnable::Plain(Box::new(step)), None)
    }

    /// Appends a step that runs only when its guard holds.
    pub fn add_conditional<S: Conditional + 'static>(
        self,
        name: impl Into<StepName>,
        step: S,
    ) -> Self {
        self.push(name, Runnable::Guarded(Box::new(step)), None)
    }

    /// Appends a step with a custom timeout.
    pub fn add_with_timeout<S: Step + 'static>(
        self,
        name: impl Into<StepName>,
        step: S,
        timeout: Duration,
    ) -> Self {
        self.push(name, Runnable::Plain(Box::new(step)), Some(timeout))
    }

    /// Bounds the total run time; the step running when it expires fails
    /// with [`WorkflowError::Timeout`].
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Builds the workflow.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::Configuration(
                "At least one step must be registered".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.steps {
            if !seen.insert(entry.name.clone()) {
                return Err(WorkflowError::DuplicateStep(entry.name.clone()));
            }
        }

        Ok(Workflow {
            steps: self.steps,
            job_timeout: self.job_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct RecordStep(&'static str);

    #[async_trait]
    impl Step for RecordStep {
        async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
            if ctx.get::<Vec<&'static str>>("order").is_none() {
                ctx.insert("order", Vec::<&'static str>::new());
            }
            if let Some(order) = ctx.get_mut::<Vec<&'static str>>("order") {
                order.push(self.0);
            }
            Ok(())
        }

        fn name(&self) -> StepName {
            StepName::new(self.0)
        }
    }

    #[derive(Debug)]
    struct FailureStep;

    #[async_trait]
    impl Step for FailureStep {
        async fn execute(&self, _ctx: &mut Context) -> Result<(), WorkflowError> {
            Err(WorkflowError::StepError {
                step_name: self.name(),
                details: "Intentional failure".to_string(),
            })
        }

        fn name(&self) -> StepName {
            StepName::new("FailureStep")
        }
    }

    #[derive(Debug)]
    struct GuardedStep {
        enabled: bool,
    }

    #[async_trait]
    impl Step for GuardedStep {
        async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
            ctx.insert("guarded", true);
            Ok(())
        }

        fn name(&self) -> StepName {
            StepName::new("GuardedStep")
        }
    }

    impl Conditional for GuardedStep {
        fn should_run(&self, _ctx: &Context) -> bool {
            self.enabled
        }
    }

    #[derive(Debug)]
    struct SlowStep;

    #[async_trait]
    impl Step for SlowStep {
        async fn execute(&self, _ctx: &mut Context) -> Result<(), WorkflowError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        fn name(&self) -> StepName {
            StepName::new("SlowStep")
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_registration_order() {
        let workflow = Workflow::builder()
            .add_step("first", RecordStep("first"))
            .add_step("second", RecordStep("second"))
            .add_step("third", RecordStep("third"))
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let report = workflow.execute(&mut ctx).await.expect("run succeeds");
        assert_eq!(
            ctx.get::<Vec<&'static str>>("order"),
            Some(&vec!["first", "second", "third"])
        );
        assert_eq!(report.steps.len(), 3);
        assert!(report.ran("third"));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_steps() {
        let workflow = Workflow::builder()
            .add_step("first", RecordStep("first"))
            .add_step("failure", FailureStep)
            .add_step("never", RecordStep("never"))
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let error = workflow.execute(&mut ctx).await.expect_err("run fails");
        match error {
            WorkflowError::StepError { step_name, details } => {
                assert_eq!(step_name, "FailureStep");
                assert_eq!(details, "Intentional failure");
            }
            other => panic!("Unexpected error type: {other:?}"),
        }
        assert_eq!(ctx.get::<Vec<&'static str>>("order"), Some(&vec!["first"]));
    }

    #[tokio::test]
    async fn test_false_guard_skips_without_failing() {
        let workflow = Workflow::builder()
            .add_conditional("guarded", GuardedStep { enabled: false })
            .add_step("after", RecordStep("after"))
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let report = workflow.execute(&mut ctx).await.expect("run succeeds");
        assert_eq!(report.status("guarded"), Some(StepStatus::Skipped));
        assert!(report.ran("after"));
        assert!(!ctx.contains_key("guarded"));
    }

    #[tokio::test]
    async fn test_true_guard_executes() {
        let workflow = Workflow::builder()
            .add_conditional("guarded", GuardedStep { enabled: true })
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let report = workflow.execute(&mut ctx).await.expect("run succeeds");
        assert!(report.ran("guarded"));
        assert_eq!(ctx.get::<bool>("guarded"), Some(&true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let workflow = Workflow::builder()
            .add_with_timeout("slow", SlowStep, Duration::from_millis(10))
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let error = workflow.execute(&mut ctx).await.expect_err("run times out");
        assert!(matches!(error, WorkflowError::Timeout { ref step_name } if step_name == &"slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_applies_to_untimed_steps() {
        let workflow = Workflow::builder()
            .add_step("slow", SlowStep)
            .with_job_timeout(Duration::from_secs(1))
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let error = workflow.execute(&mut ctx).await.expect_err("run times out");
        assert!(matches!(error, WorkflowError::Timeout { .. }));
    }

    #[test]
    fn test_builder_validation() {
        let result = Workflow::builder().build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));

        let result = Workflow::builder()
            .add_step("same", RecordStep("a"))
            .add_step("same", RecordStep("b"))
            .build();
        assert!(matches!(result, Err(WorkflowError::DuplicateStep(_))));
    }
}
