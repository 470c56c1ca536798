//! Runner configuration.
//!
//! Everything has a default, so a repository without a `tagflow.toml` gets
//! the stock pipeline. A handful of values are taken from the environment the
//! CI host provides.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tagflow.toml";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level runner configuration. Each field is the TOML table of the same
/// name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub trigger: TriggerConfig,
    pub checkout: CheckoutConfig,
    pub interpreter: InterpreterConfig,
    pub install: InstallConfig,
    pub build: BuildConfig,
    pub changelog: ChangelogConfig,
    pub release: ReleaseConfig,
    pub registry: RegistryConfig,
    pub secrets: SecretsConfig,
    pub job: JobConfig,
}

/// `[trigger]`: which pushed refs start a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerConfig {
    /// Glob the pushed tag must match.
    pub pattern: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pattern: "v*".to_string(),
        }
    }
}

/// `[checkout]`: fetching the tag with full history.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Set to false when the runner is started inside an existing checkout
    /// of the tag.
    pub enabled: bool,
    /// Remote to fetch history and tags from.
    pub remote: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: "origin".to_string(),
        }
    }
}

/// `[interpreter]`: the pinned interpreter and where to look for it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterConfig {
    /// Pinned interpreter version, e.g. "3.11".
    pub version: String,
    /// Executables probed in order; `{version}` is interpolated.
    pub candidates: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            version: "3.11".to_string(),
            candidates: vec![
                "python{version}".to_string(),
                "python3".to_string(),
                "python".to_string(),
            ],
        }
    }
}

/// `[install]`: tooling installed before the build.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallConfig {
    /// Run in order, each as an argv list.
    pub commands: Vec<CommandLine>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            commands: vec![CommandLine::from_args([
                "{python}", "-m", "pip", "install", "--upgrade", "nox", "pip", "setuptools",
            ])],
        }
    }
}

/// `[build]`: the build task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Must write `version` and `asset_path` to the file named by
    /// `GITHUB_OUTPUT`.
    pub command: CommandLine,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: CommandLine::from_args(["nox", "-vs", "build"]),
        }
    }
}

/// `[changelog]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangelogConfig {
    /// Relative paths are resolved against the working directory.
    pub path: PathBuf,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("CHANGELOG.md"),
        }
    }
}

/// `[release]`: where the release is published.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    /// `owner/name`; falls back to `GITHUB_REPOSITORY`.
    pub repository: Option<String>,
    /// REST API root; `GITHUB_API_URL` overrides it.
    pub api_url: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            repository: None,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// `[registry]`: package registry upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Legacy upload endpoint.
    pub url: String,
    /// `__token__` for API-token authentication.
    pub username: String,
    /// Upload every distribution in this directory instead of only the
    /// built asset.
    pub packages_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "https://upload.pypi.org/legacy/".to_string(),
            username: "__token__".to_string(),
            packages_dir: None,
        }
    }
}

/// `[secrets]`: names of the environment variables holding credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Variable holding the release API token.
    pub github_token_env: String,
    /// Variable holding the registry credential. Empty or unset skips
    /// registry publication.
    pub registry_password_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            github_token_env: "GITHUB_TOKEN".to_string(),
            registry_password_env: "B2_PYPI_PASSWORD".to_string(),
        }
    }
}

/// `[job]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Limit for the whole run.
    pub timeout_minutes: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 360,
        }
    }
}

impl JobConfig {
    /// Returns the job limit as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

impl PipelineConfig {
    /// Loads configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] in
    /// `workdir` if it exists. An absent default file yields the defaults; an
    /// explicitly named file must exist.
    pub fn load(path: Option<&Path>, workdir: &Path) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (workdir.join(DEFAULT_CONFIG_FILE), false),
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Parses a TOML document; missing sections and fields take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies the values a CI host exports. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(version) = lookup("PYTHON_DEFAULT_VERSION").filter(|v| !v.is_empty()) {
            self.interpreter.version = version;
        }
        if self.release.repository.is_none() {
            self.release.repository = lookup("GITHUB_REPOSITORY").filter(|v| !v.is_empty());
        }
        if let Some(url) = lookup("GITHUB_API_URL").filter(|v| !v.is_empty()) {
            self.release.api_url = url;
        }
    }

    /// Checks what a run needs: at least one interpreter candidate, non-empty
    /// build and install commands, and an `owner/name` repository.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.candidates.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter.candidates must not be empty".to_string(),
            ));
        }
        if self.build.command.is_empty() {
            return Err(ConfigError::Invalid(
                "build.command must not be empty".to_string(),
            ));
        }
        if let Some(index) = self.install.commands.iter().position(CommandLine::is_empty) {
            return Err(ConfigError::Invalid(format!(
                "install.commands[{index}] must not be empty"
            )));
        }
        match &self.release.repository {
            Some(repo) if is_owner_slash_name(repo) => Ok(()),
            Some(repo) => Err(ConfigError::Invalid(format!(
                "release.repository must be 'owner/name', got '{repo}'"
            ))),
            None => Err(ConfigError::Invalid(
                "release.repository is not set and GITHUB_REPOSITORY is empty".to_string(),
            )),
        }
    }
}

fn is_owner_slash_name(repo: &str) -> bool {
    matches!(repo.split_once('/'), Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/'))
}

/// A command as an argv list. Arguments may contain `{python}`, `{tag}` and
/// `{version}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    /// Builds a command line from its arguments, program first.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if there is no program to run.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Substitutes every known placeholder; unknown braces are left alone.
    pub fn render(&self, vars: &TemplateVars<'_>) -> Vec<String> {
        self.0.iter().map(|arg| vars.interpolate(arg)).collect()
    }
}

/// Values available to command templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateVars<'a> {
    /// Replaces `{python}`.
    pub python: Option<&'a str>,
    /// Replaces `{tag}`.
    pub tag: Option<&'a str>,
    /// Replaces `{version}`.
    pub version: Option<&'a str>,
}

impl TemplateVars<'_> {
    /// Replaces the placeholders whose value is set.
    pub fn interpolate(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (placeholder, value) in [
            ("{python}", self.python),
            ("{tag}", self.tag),
            ("{version}", self.version),
        ] {
            if let Some(value) = value {
                out = out.replace(placeholder, value);
            }
        }
        out
    }
}

/// A credential read from the environment. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value, for the request that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the credential is unset or blank.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Credentials for one run.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Release API token.
    pub github_token: Secret,
    /// May be empty, in which case registry publication is skipped.
    pub registry_password: Secret,
}

impl Secrets {
    /// Reads both credentials through `lookup`; unset variables become empty
    /// secrets.
    pub fn from_lookup(config: &SecretsConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            github_token: Secret::new(lookup(&config.github_token_env).unwrap_or_default()),
            registry_password: Secret::new(
                lookup(&config.registry_password_env).unwrap_or_default(),
            ),
        }
    }

    /// Reads both credentials from the process environment.
    pub fn from_env(config: &SecretsConfig) -> Self {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }
}
