use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tagflow::config::{CommandLine, PipelineConfig, Secret, Secrets};
use tagflow::github::{PublishedRelease, ReleaseError, ReleasePublisher, ReleaseRequest};
use tagflow::pipeline::{build_pipeline, keys, names, run_release, Services};
use tagflow::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};
use tagflow::registry::{Distribution, PackageUploader, RegistryError};
use tagflow::trigger::TagTrigger;
use tagflow::{StepStatus, WorkflowError};

const CHANGELOG: &str = "\
# Changelog

## [Unreleased]

## [1.4.0] - 2024-03-01
### Fixed
- Retry uploads on 503

## [1.3.0] - 2024-01-10
- `sync` command
";

type Behavior = dyn Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync;

struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    behavior: Box<Behavior>,
}

impl fmt::Debug for FakeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeRunner").finish_non_exhaustive()
    }
}

impl FakeRunner {
    fn new(
        behavior: impl Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            behavior: Box::new(behavior),
        })
    }

    fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().expect("lock").push(spec.clone());
        (self.behavior)(spec)
    }
}

fn stdout(text: &str) -> Result<CommandOutput, ProcessError> {
    Ok(CommandOutput {
        stdout: text.to_string(),
        stderr: String::new(),
    })
}

fn not_found(spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
    Err(ProcessError::Spawn {
        command: spec.to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })
}

/// Simulates git, a Python 3.11 interpreter, pip and a build task that writes
/// `outputs` to the output channel and creates the files in `dist`.
fn simulated_host(
    shallow: bool,
    outputs: &'static str,
    dist: &'static [&'static str],
) -> impl Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync + 'static {
    move |spec: &CommandSpec| match spec.program.as_str() {
        "git" if spec.args.first().map(String::as_str) == Some("rev-parse") => {
            stdout(if shallow { "true\n" } else { "false\n" })
        }
        "git" => stdout(""),
        "python3.11" if spec.args == ["--version"] => stdout("Python 3.11.7\n"),
        "python3.11" => stdout("Successfully installed nox\n"),
        "nox" => {
            let channel = spec.env.get("GITHUB_OUTPUT").expect("output channel set");
            std::fs::write(channel, outputs).expect("write outputs");
            let cwd = spec.cwd.as_ref().expect("cwd set");
            std::fs::create_dir_all(cwd.join("dist")).expect("mkdir dist");
            for file in dist {
                std::fs::write(cwd.join("dist").join(file), b"payload").expect("write dist");
            }
            stdout("")
        }
        _ => not_found(spec),
    }
}

#[derive(Debug, Default)]
struct FakePublisher {
    requests: Mutex<Vec<ReleaseRequest>>,
}

#[async_trait]
impl ReleasePublisher for FakePublisher {
    async fn publish(&self, request: &ReleaseRequest) -> Result<PublishedRelease, ReleaseError> {
        let mut requests = self.requests.lock().expect("lock");
        requests.push(request.clone());
        Ok(PublishedRelease {
            id: requests.len() as u64,
            html_url: format!("https://github.com/octo/tool/releases/tag/{}", request.tag),
            assets: request
                .assets
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        })
    }
}

#[derive(Debug, Default)]
struct FakeUploader {
    uploads: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl PackageUploader for FakeUploader {
    async fn upload(&self, dist: &Distribution, password: &Secret) -> Result<(), RegistryError> {
        self.uploads
            .lock()
            .expect("lock")
            .push((dist.file_name.clone(), password.expose().to_string()));
        Ok(())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    runner: Arc<FakeRunner>,
    publisher: Arc<FakePublisher>,
    uploader: Arc<FakeUploader>,
    config: PipelineConfig,
}

impl Harness {
    fn new(runner: Arc<FakeRunner>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("CHANGELOG.md"), CHANGELOG).expect("write changelog");

        let mut config = PipelineConfig::default();
        config.release.repository = Some("octo/tool".to_string());
        config.install.commands = vec![CommandLine::from_args([
            "{python}", "-m", "pip", "install", "--upgrade", "nox",
        ])];

        Self {
            dir,
            runner,
            publisher: Arc::new(FakePublisher::default()),
            uploader: Arc::new(FakeUploader::default()),
            config,
        }
    }

    fn workdir(&self) -> &Path {
        self.dir.path()
    }

    async fn run(
        &self,
        password: &str,
    ) -> Result<(tagflow::RunReport, tagflow::Context), WorkflowError> {
        let secrets = Secrets {
            github_token: Secret::new("ghs_test"),
            registry_password: Secret::new(password),
        };
        let services = Services {
            runner: self.runner.clone(),
            publisher: self.publisher.clone(),
            uploader: self.uploader.clone(),
        };
        let workflow = build_pipeline(&self.config, self.workdir(), &secrets, services)
            .expect("valid pipeline");
        run_release(&workflow, "v1.4.0").await
    }

    fn releases(&self) -> Vec<ReleaseRequest> {
        self.publisher.requests.lock().expect("lock").clone()
    }

    fn uploads(&self) -> Vec<(String, String)> {
        self.uploader.uploads.lock().expect("lock").clone()
    }
}

const GOOD_OUTPUTS: &str = "version=1.4.0\nasset_path=dist/b2-1.4.0.tar.gz\n";

#[tokio::test]
async fn test_full_release_with_registry_credential() {
    let harness = Harness::new(FakeRunner::new(simulated_host(
        false,
        GOOD_OUTPUTS,
        &["b2-1.4.0.tar.gz"],
    )));

    let (report, ctx) = harness.run("pypi-secret").await.expect("release succeeds");

    let order: Vec<&str> = report.steps.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        order,
        vec![
            names::CHECKOUT,
            names::SETUP_INTERPRETER,
            names::INSTALL_DEPENDENCIES,
            names::BUILD,
            names::CHANGELOG,
            names::RELEASE,
            names::PUBLISH,
        ]
    );
    assert!(report
        .steps
        .iter()
        .all(|(_, status)| *status == StepStatus::Succeeded));

    let releases = harness.releases();
    assert_eq!(releases.len(), 1);
    let release = &releases[0];
    assert_eq!(release.tag, "v1.4.0");
    assert_eq!(release.name, "1.4.0");
    assert_eq!(release.body, "### Fixed\n- Retry uploads on 503");
    assert!(!release.draft);
    assert!(!release.prerelease);
    assert_eq!(
        release.assets,
        vec![harness.workdir().join("dist/b2-1.4.0.tar.gz")]
    );

    assert_eq!(
        harness.uploads(),
        vec![("b2-1.4.0.tar.gz".to_string(), "pypi-secret".to_string())]
    );
    assert_eq!(
        ctx.get::<Vec<String>>(keys::UPLOADED),
        Some(&vec!["b2-1.4.0.tar.gz".to_string()])
    );
    assert_eq!(
        ctx.get::<String>(keys::PYTHON).map(String::as_str),
        Some("python3.11")
    );
}

#[tokio::test]
async fn test_empty_credential_skips_registry() {
    let harness = Harness::new(FakeRunner::new(simulated_host(
        false,
        GOOD_OUTPUTS,
        &["b2-1.4.0.tar.gz"],
    )));

    let (report, _ctx) = harness.run("").await.expect("release succeeds");

    assert_eq!(report.status(names::PUBLISH), Some(StepStatus::Skipped));
    assert!(report.ran(names::RELEASE));
    assert_eq!(harness.releases().len(), 1);
    assert!(harness.uploads().is_empty());
}

#[tokio::test]
async fn test_partial_build_outputs_stop_before_release() {
    let harness = Harness::new(FakeRunner::new(simulated_host(
        false,
        "version=1.4.0\n",
        &["b2-1.4.0.tar.gz"],
    )));

    let error = harness.run("pypi-secret").await.expect_err("build fails");

    assert_eq!(error.step_name().map(|n| n.as_str()), Some(names::BUILD));
    assert!(error.to_string().contains("asset_path"));
    assert!(harness.releases().is_empty());
    assert!(harness.uploads().is_empty());
}

#[tokio::test]
async fn test_missing_asset_file_fails_build() {
    let harness = Harness::new(FakeRunner::new(simulated_host(false, GOOD_OUTPUTS, &[])));

    let error = harness.run("").await.expect_err("asset missing");
    assert_eq!(error.step_name().map(|n| n.as_str()), Some(names::BUILD));
    assert!(harness.releases().is_empty());
}

#[tokio::test]
async fn test_version_absent_from_changelog_fails_without_release() {
    let harness = Harness::new(FakeRunner::new(simulated_host(
        false,
        "version=2.0.0\nasset_path=dist/b2-2.0.0.tar.gz\n",
        &["b2-2.0.0.tar.gz"],
    )));

    let error = harness.run("pypi-secret").await.expect_err("changelog fails");

    assert_eq!(error.step_name().map(|n| n.as_str()), Some(names::CHANGELOG));
    assert!(error.to_string().contains("2.0.0"));
    assert!(harness.releases().is_empty());
    assert!(harness.uploads().is_empty());
}

#[tokio::test]
async fn test_shallow_clone_is_unshallowed_before_checkout() {
    let runner = FakeRunner::new(simulated_host(true, GOOD_OUTPUTS, &["b2-1.4.0.tar.gz"]));
    let harness = Harness::new(runner.clone());

    harness.run("").await.expect("release succeeds");

    let git: Vec<String> = runner
        .command_lines()
        .into_iter()
        .filter(|line| line.starts_with("git "))
        .collect();
    assert_eq!(
        git,
        vec![
            "git rev-parse --is-shallow-repository",
            "git fetch --unshallow --tags origin",
            "git checkout --quiet --detach v1.4.0",
        ]
    );
}

#[tokio::test]
async fn test_checkout_can_be_disabled() {
    let runner = FakeRunner::new(simulated_host(false, GOOD_OUTPUTS, &["b2-1.4.0.tar.gz"]));
    let mut harness = Harness::new(runner.clone());
    harness.config.checkout.enabled = false;

    let (report, _ctx) = harness.run("").await.expect("release succeeds");

    assert_eq!(report.status(names::CHECKOUT), Some(StepStatus::Skipped));
    assert!(!runner
        .command_lines()
        .iter()
        .any(|line| line.starts_with("git ")));
}

#[tokio::test]
async fn test_interpreter_falls_back_to_matching_candidate() {
    let runner = FakeRunner::new(|spec| match spec.program.as_str() {
        "git" => stdout("false\n"),
        "python3" if spec.args == ["--version"] => stdout("Python 3.10.12\n"),
        "python" if spec.args == ["--version"] => stdout("Python 3.11.2\n"),
        "python" => stdout(""),
        _ => not_found(spec),
    });
    let mut harness = Harness::new(runner.clone());
    harness.config.build.command = CommandLine::from_args(["false-build"]);

    // The build command does not exist, so the run stops at the build step
    // after the interpreter has been resolved and used for installation.
    let error = harness.run("").await.expect_err("build cannot start");
    assert_eq!(error.step_name().map(|n| n.as_str()), Some(names::BUILD));

    let lines = runner.command_lines();
    assert!(lines.contains(&"python -m pip install --upgrade nox".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("python3 -m")));
}

#[tokio::test]
async fn test_no_matching_interpreter_fails() {
    let runner = FakeRunner::new(|spec| match spec.program.as_str() {
        "git" => stdout("false\n"),
        "python3" | "python" => stdout("Python 3.9.18\n"),
        _ => not_found(spec),
    });
    let harness = Harness::new(runner);

    let error = harness.run("").await.expect_err("no interpreter");
    assert_eq!(
        error.step_name().map(|n| n.as_str()),
        Some(names::SETUP_INTERPRETER)
    );
    assert!(error.to_string().contains("3.11"));
}

#[tokio::test]
async fn test_packages_dir_uploads_every_distribution() {
    let harness = {
        let mut harness = Harness::new(FakeRunner::new(simulated_host(
            false,
            "version=1.4.0\nasset_path=dist/b2-1.4.0-py3-none-any.whl\n",
            &["b2-1.4.0-py3-none-any.whl", "b2-1.4.0.tar.gz"],
        )));
        harness.config.registry.packages_dir = Some(PathBuf::from("dist"));
        harness
    };

    harness.run("pypi-secret").await.expect("release succeeds");

    let uploaded: Vec<String> = harness.uploads().into_iter().map(|(f, _)| f).collect();
    assert_eq!(uploaded, vec!["b2-1.4.0-py3-none-any.whl", "b2-1.4.0.tar.gz"]);
    // the release itself still carries exactly the emitted asset
    assert_eq!(
        harness.releases()[0].assets,
        vec![harness.workdir().join("dist/b2-1.4.0-py3-none-any.whl")]
    );
}

#[test]
fn test_only_version_tags_trigger_a_run() {
    let trigger = TagTrigger::new(PipelineConfig::default().trigger.pattern);
    assert_eq!(trigger.resolve_tag("refs/tags/v1.4.0"), Some("v1.4.0"));
    assert_eq!(trigger.resolve_tag("refs/heads/main"), None);
    assert_eq!(trigger.resolve_tag("refs/tags/nightly"), None);
}
