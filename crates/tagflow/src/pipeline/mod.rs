//! The tag release pipeline.
//!
//! Seven steps, always in this order:
//!
//! 1. `checkout` - full history at the pushed tag
//! 2. `setup-interpreter` - locate the pinned interpreter
//! 3. `install-dependencies` - upgrade the task runner and packaging tools
//! 4. `build` - run the build task, collect `version` and `asset_path`
//! 5. `changelog` - release notes for `version`
//! 6. `release` - publish the release with the built asset attached
//! 7. `publish` - upload to the package registry, only with a credential

mod steps;

pub use steps::{
    BuildStep, ChangelogStep, CheckoutStep, InstallDependenciesStep, PublishStep, ReleaseStep,
    SetupInterpreterStep,
};

use crate::config::{PipelineConfig, Secrets};
use crate::github::ReleasePublisher;
use crate::process::CommandRunner;
use crate::registry::PackageUploader;
use crate::workflow::{RunReport, Workflow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagflow_core::{Context, WorkflowError};
use tracing::info;

/// Step names, in execution order.
pub mod names {
    pub const CHECKOUT: &str = "checkout";
    pub const SETUP_INTERPRETER: &str = "setup-interpreter";
    pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
    pub const BUILD: &str = "build";
    pub const CHANGELOG: &str = "changelog";
    pub const RELEASE: &str = "release";
    pub const PUBLISH: &str = "publish";
}

/// Context keys shared between steps.
pub mod keys {
    /// `String`: the pushed tag, inserted before the run starts.
    pub const TAG: &str = "tag";
    /// `String`: interpreter executable found by `setup-interpreter`.
    pub const PYTHON: &str = "python";
    /// `String`: full version the interpreter reported.
    pub const PYTHON_VERSION: &str = "python_version";
    /// `String`: version emitted by the build.
    pub const VERSION: &str = "version";
    /// `PathBuf`: built distribution emitted by the build.
    pub const ASSET_PATH: &str = "asset_path";
    /// `StepOutputs`: everything the build emitted.
    pub const BUILD_OUTPUTS: &str = "build_outputs";
    /// `String`: changelog section for the version.
    pub const RELEASE_NOTES: &str = "release_notes";
    /// `PublishedRelease`
    pub const RELEASE: &str = "release";
    /// `Vec<String>`: file names uploaded to the registry.
    pub const UPLOADED: &str = "uploaded";
}

/// External collaborators of the pipeline.
#[derive(Debug, Clone)]
pub struct Services {
    pub runner: Arc<dyn CommandRunner>,
    pub publisher: Arc<dyn ReleasePublisher>,
    pub uploader: Arc<dyn PackageUploader>,
}

/// Assembles the release workflow for a repository checked out at `workdir`.
pub fn build_pipeline(
    config: &PipelineConfig,
    workdir: &Path,
    secrets: &Secrets,
    services: Services,
) -> Result<Workflow, WorkflowError> {
    let workdir = workdir.to_path_buf();
    let resolve = |path: &Path| -> PathBuf {
        if path.is_relative() {
            workdir.join(path)
        } else {
            path.to_path_buf()
        }
    };

    Workflow::builder()
        .add_conditional(
            names::CHECKOUT,
            CheckoutStep::new(
                services.runner.clone(),
                workdir.clone(),
                config.checkout.remote.clone(),
                config.checkout.enabled,
            ),
        )
        .add_step(
            names::SETUP_INTERPRETER,
            SetupInterpreterStep::new(
                services.runner.clone(),
                workdir.clone(),
                config.interpreter.version.clone(),
                config.interpreter.candidates.clone(),
            ),
        )
        .add_step(
            names::INSTALL_DEPENDENCIES,
            InstallDependenciesStep::new(
                services.runner.clone(),
                workdir.clone(),
                config.install.commands.clone(),
            ),
        )
        .add_step(
            names::BUILD,
            BuildStep::new(
                services.runner.clone(),
                workdir.clone(),
                config.build.command.clone(),
            ),
        )
        .add_step(
            names::CHANGELOG,
            ChangelogStep::new(resolve(&config.changelog.path)),
        )
        .add_step(names::RELEASE, ReleaseStep::new(services.publisher))
        .add_conditional(
            names::PUBLISH,
            PublishStep::new(
                services.uploader,
                secrets.registry_password.clone(),
                config.registry.packages_dir.as_deref().map(resolve),
            ),
        )
        .with_job_timeout(config.job.timeout())
        .build()
}

/// Runs `workflow` once for `tag`. Returns the report and the final context.
pub async fn run_release(
    workflow: &Workflow,
    tag: &str,
) -> Result<(RunReport, Context), WorkflowError> {
    let mut ctx = Context::new();
    ctx.insert(keys::TAG, tag.to_string());

    info!("releasing {} ({} steps)", tag, workflow.step_count());
    let report = workflow.execute(&mut ctx).await?;
    info!(
        "release of {} finished in {:.1}s",
        tag,
        report.elapsed.as_secs_f64()
    );
    Ok((report, ctx))
}
