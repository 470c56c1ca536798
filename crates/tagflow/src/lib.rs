//! A tag-triggered release runner.
//!
//! One run corresponds to one pushed tag matching `v*`: check out the tag
//! with full history, locate the pinned interpreter, install the build
//! tooling, build, pull the release notes out of the changelog, publish a
//! release with the built asset attached, and upload the distribution to the
//! package registry when a credential is configured.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workdir = std::env::current_dir()?;
//!     let mut config = PipelineConfig::load(None, &workdir)?;
//!     config.apply_env(|k| std::env::var(k).ok());
//!     let secrets = Secrets::from_env(&config.secrets);
//!
//!     let services = Services {
//!         runner: Arc::new(SystemRunner),
//!         publisher: Arc::new(GithubClient::new(
//!             &config.release.api_url,
//!             "octo/tool",
//!             secrets.github_token.clone(),
//!         )?),
//!         uploader: Arc::new(RegistryClient::new(&config.registry.url, &config.registry.username)?),
//!     };
//!
//!     let workflow = build_pipeline(&config, &workdir, &secrets, services)?;
//!     run_release(&workflow, "v1.2.3").await?;
//!     Ok(())
//! }
//! ```

pub mod changelog;
pub mod config;
pub mod github;
pub mod outputs;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod trigger;
mod workflow;

// Re-export core types
pub use tagflow_core::*;

// Export workflow types
pub use workflow::{RunReport, StepStatus, Workflow, WorkflowBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{PipelineConfig, Secret, Secrets};
    pub use crate::github::{GithubClient, ReleasePublisher};
    pub use crate::pipeline::{build_pipeline, run_release, Services};
    pub use crate::process::{CommandRunner, SystemRunner};
    pub use crate::registry::{PackageUploader, RegistryClient};
    pub use crate::trigger::TagTrigger;
    pub use crate::{
        Conditional, Context, ContextKey, RunReport, Step, StepName, StepStatus, Workflow,
        WorkflowBuilder, WorkflowError,
    };
}
