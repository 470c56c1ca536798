use super::{keys, names};
use crate::changelog;
use crate::config::{CommandLine, Secret, TemplateVars};
use crate::github::{ReleasePublisher, ReleaseRequest};
use crate::outputs::{BuildOutputs, StepOutputs, OUTPUT_ENV};
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use crate::registry::{self, Distribution, PackageUploader, RegistryError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tagflow_core::{Conditional, Context, Step, StepName, WorkflowError};
use tracing::{debug, info};

fn vars(ctx: &Context) -> TemplateVars<'_> {
    TemplateVars {
        python: ctx.get::<String>(keys::PYTHON).map(String::as_str),
        tag: ctx.get::<String>(keys::TAG).map(String::as_str),
        version: ctx.get::<String>(keys::VERSION).map(String::as_str),
    }
}

/// Fetches full history if the clone is shallow, then checks out the tag.
#[derive(Debug)]
pub struct CheckoutStep {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    remote: String,
    enabled: bool,
}

impl CheckoutStep {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        workdir: PathBuf,
        remote: String,
        enabled: bool,
    ) -> Self {
        Self {
            runner,
            workdir,
            remote,
            enabled,
        }
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new("git").cwd(&self.workdir)
    }
}

#[async_trait]
impl Step for CheckoutStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        let tag = ctx.require::<String>(&self.name(), keys::TAG)?.clone();
        let fail = |e: ProcessError| WorkflowError::step(self.name(), e);

        let shallow = self
            .runner
            .run(&self.git().args(["rev-parse", "--is-shallow-repository"]))
            .await
            .map_err(fail)?;
        if shallow.stdout.trim() == "true" {
            info!("repository is shallow, fetching full history");
            self.runner
                .run(&self.git().args(["fetch", "--unshallow", "--tags", self.remote.as_str()]))
                .await
                .map_err(fail)?;
        }

        self.runner
            .run(&self.git().args(["checkout", "--quiet", "--detach", tag.as_str()]))
            .await
            .map_err(fail)?;
        Ok(())
    }

    fn name(&self) -> StepName {
        StepName::new(names::CHECKOUT)
    }
}

impl Conditional for CheckoutStep {
    fn should_run(&self, _ctx: &Context) -> bool {
        self.enabled
    }
}

/// Finds an interpreter that reports the pinned version.
#[derive(Debug)]
pub struct SetupInterpreterStep {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    version: String,
    candidates: Vec<String>,
}

impl SetupInterpreterStep {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        workdir: PathBuf,
        version: String,
        candidates: Vec<String>,
    ) -> Self {
        Self {
            runner,
            workdir,
            version,
            candidates,
        }
    }
}

/// Checks `Python 3.11.4` against a pin such as `3.11`. Returns the
/// reported version on a match.
fn reported_version<'a>(output: &'a str, pinned: &str) -> Option<&'a str> {
    let reported = output.trim().strip_prefix("Python ")?.trim();
    let matches = reported == pinned
        || reported
            .strip_prefix(pinned)
            .is_some_and(|rest| rest.starts_with('.'));
    matches.then_some(reported)
}

#[async_trait]
impl Step for SetupInterpreterStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        let pin = TemplateVars {
            version: Some(self.version.as_str()),
            ..TemplateVars::default()
        };

        for candidate in &self.candidates {
            let program = pin.interpolate(candidate);
            let spec = CommandSpec::new(&program).arg("--version").cwd(&self.workdir);
            let output = match self.runner.run(&spec).await {
                Ok(output) => output,
                Err(e) => {
                    debug!("interpreter candidate {} unusable: {}", program, e);
                    continue;
                }
            };

            // Interpreters before 3.4 print the version on stderr.
            let text = if output.stdout.trim().is_empty() {
                &output.stderr
            } else {
                &output.stdout
            };
            match reported_version(text, &self.version) {
                Some(reported) => {
                    info!("using {} (Python {})", program, reported);
                    ctx.insert(keys::PYTHON_VERSION, reported.to_string());
                    ctx.insert(keys::PYTHON, program);
                    return Ok(());
                }
                None => debug!("{} reports {:?}, wanted {}", program, text.trim(), self.version),
            }
        }

        Err(WorkflowError::step(
            self.name(),
            format!(
                "no interpreter reporting Python {} among: {}",
                self.version,
                self.candidates.join(", ")
            ),
        ))
    }

    fn name(&self) -> StepName {
        StepName::new(names::SETUP_INTERPRETER)
    }
}

/// Runs each install command in order.
#[derive(Debug)]
pub struct InstallDependenciesStep {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    commands: Vec<CommandLine>,
}

impl InstallDependenciesStep {
    pub fn new(runner: Arc<dyn CommandRunner>, workdir: PathBuf, commands: Vec<CommandLine>) -> Self {
        Self {
            runner,
            workdir,
            commands,
        }
    }
}

#[async_trait]
impl Step for InstallDependenciesStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        ctx.require::<String>(&self.name(), keys::PYTHON)?;
        let vars = vars(ctx);

        for command in &self.commands {
            let spec = CommandSpec::from_argv(command.render(&vars))
                .map_err(|e| WorkflowError::step(self.name(), e))?
                .cwd(&self.workdir);
            info!("installing: {}", spec);
            self.runner
                .run(&spec)
                .await
                .map_err(|e| WorkflowError::step(self.name(), e))?;
        }
        Ok(())
    }

    fn name(&self) -> StepName {
        StepName::new(names::INSTALL_DEPENDENCIES)
    }
}

/// Runs the build task and collects the `version` and `asset_path` it
/// writes to the output channel.
#[derive(Debug)]
pub struct BuildStep {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    command: CommandLine,
}

impl BuildStep {
    pub fn new(runner: Arc<dyn CommandRunner>, workdir: PathBuf, command: CommandLine) -> Self {
        Self {
            runner,
            workdir,
            command,
        }
    }
}

#[async_trait]
impl Step for BuildStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        let fail = |e: &dyn std::fmt::Display| WorkflowError::step(self.name(), e);

        let channel = tempfile::Builder::new()
            .prefix("tagflow-output-")
            .tempfile()
            .map_err(|e| fail(&e))?;
        let spec = CommandSpec::from_argv(self.command.render(&vars(ctx)))
            .map_err(|e| fail(&e))?
            .cwd(&self.workdir)
            .env(OUTPUT_ENV, channel.path().to_string_lossy());
        info!("building: {}", spec);
        self.runner.run(&spec).await.map_err(|e| fail(&e))?;

        let outputs = StepOutputs::read(channel.path())
            .await
            .map_err(|e| fail(&e))?;
        let build = BuildOutputs::from_outputs(&outputs)
            .and_then(|b| b.resolve_asset(&self.workdir))
            .map_err(|e| fail(&e))?;

        info!(
            "built version {} at {}",
            build.version,
            build.asset_path.display()
        );
        ctx.insert(keys::VERSION, build.version);
        ctx.insert(keys::ASSET_PATH, build.asset_path);
        ctx.insert(keys::BUILD_OUTPUTS, outputs);
        Ok(())
    }

    fn name(&self) -> StepName {
        StepName::new(names::BUILD)
    }
}

/// Looks up the release notes for the built version.
#[derive(Debug)]
pub struct ChangelogStep {
    path: PathBuf,
}

impl ChangelogStep {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Step for ChangelogStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        let version = ctx.require::<String>(&self.name(), keys::VERSION)?;
        let notes = changelog::read_release_notes(&self.path, version)
            .await
            .map_err(|e| WorkflowError::step(self.name(), e))?;
        ctx.insert(keys::RELEASE_NOTES, notes);
        Ok(())
    }

    fn name(&self) -> StepName {
        StepName::new(names::CHANGELOG)
    }
}

/// Publishes a final (non-draft, non-prerelease) release named after the
/// version, with the built asset as its only attachment.
#[derive(Debug)]
pub struct ReleaseStep {
    publisher: Arc<dyn ReleasePublisher>,
}

impl ReleaseStep {
    pub fn new(publisher: Arc<dyn ReleasePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Step for ReleaseStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        let name = self.name();
        let request = ReleaseRequest {
            tag: ctx.require::<String>(&name, keys::TAG)?.clone(),
            name: ctx.require::<String>(&name, keys::VERSION)?.clone(),
            body: ctx.require::<String>(&name, keys::RELEASE_NOTES)?.clone(),
            draft: false,
            prerelease: false,
            assets: vec![ctx.require::<PathBuf>(&name, keys::ASSET_PATH)?.clone()],
        };

        let release = self
            .publisher
            .publish(&request)
            .await
            .map_err(|e| WorkflowError::step(name, e))?;
        info!("published release {}", release.html_url);
        ctx.insert(keys::RELEASE, release);
        Ok(())
    }

    fn name(&self) -> StepName {
        StepName::new(names::RELEASE)
    }
}

/// Uploads the distribution to the package registry. Skipped when the
/// credential is empty.
#[derive(Debug)]
pub struct PublishStep {
    uploader: Arc<dyn PackageUploader>,
    password: Secret,
    packages_dir: Option<PathBuf>,
}

impl PublishStep {
    pub fn new(
        uploader: Arc<dyn PackageUploader>,
        password: Secret,
        packages_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            uploader,
            password,
            packages_dir,
        }
    }

    fn distributions(&self, ctx: &Context) -> Result<Vec<Distribution>, WorkflowError> {
        let fail = |e: RegistryError| WorkflowError::step(self.name(), e);
        match &self.packages_dir {
            Some(dir) => {
                let found = registry::discover(dir).map_err(fail)?;
                if found.is_empty() {
                    return Err(WorkflowError::step(
                        self.name(),
                        format!("no distributions found in {}", dir.display()),
                    ));
                }
                Ok(found)
            }
            None => {
                let asset = ctx.require::<PathBuf>(&self.name(), keys::ASSET_PATH)?;
                Ok(vec![Distribution::from_path(asset).map_err(fail)?])
            }
        }
    }
}

#[async_trait]
impl Step for PublishStep {
    async fn execute(&self, ctx: &mut Context) -> Result<(), WorkflowError> {
        let dists = self.distributions(ctx)?;
        let mut uploaded = Vec::with_capacity(dists.len());
        for dist in &dists {
            self.uploader
                .upload(dist, &self.password)
                .await
                .map_err(|e| WorkflowError::step(self.name(), e))?;
            uploaded.push(dist.file_name.clone());
        }
        info!("uploaded {} distribution(s)", uploaded.len());
        ctx.insert(keys::UPLOADED, uploaded);
        Ok(())
    }

    fn name(&self) -> StepName {
        StepName::new(names::PUBLISH)
    }
}

impl Conditional for PublishStep {
    fn should_run(&self, _ctx: &Context) -> bool {
        !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_version() {
        assert_eq!(reported_version("Python 3.11.4\n", "3.11"), Some("3.11.4"));
        assert_eq!(reported_version("Python 3.11", "3.11"), Some("3.11"));
        assert_eq!(reported_version("Python 3.11.4", "3"), Some("3.11.4"));
        assert_eq!(reported_version("Python 3.110.0", "3.11"), None);
        assert_eq!(reported_version("Python 3.12.1", "3.11"), None);
        assert_eq!(reported_version("pypy 3.11", "3.11"), None);
    }

    #[test]
    fn test_publish_guard() {
        #[derive(Debug)]
        struct NoUpload;

        #[async_trait]
        impl PackageUploader for NoUpload {
            async fn upload(
                &self,
                _dist: &Distribution,
                _password: &Secret,
            ) -> Result<(), RegistryError> {
                Ok(())
            }
        }

        let ctx = Context::new();
        let skipped = PublishStep::new(Arc::new(NoUpload), Secret::new(""), None);
        assert!(!skipped.should_run(&ctx));

        let runs = PublishStep::new(Arc::new(NoUpload), Secret::new("pypi-token"), None);
        assert!(runs.should_run(&ctx));
    }
}
