use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagflow::changelog;
use tagflow::outputs::{BuildOutputs, StepOutputs};
use tagflow::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagflow", version, about = "Release a pushed version tag")]
struct Cli {
    /// Configuration file (default: ./tagflow.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository checkout to operate in
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the release pipeline for a pushed tag
    Run {
        /// Pushed ref, e.g. refs/tags/v1.2.3
        #[arg(long = "ref", env = "GITHUB_REF")]
        git_ref: String,
    },
    /// Print the changelog section for a version
    Notes {
        version: String,
        /// Changelog file (default: from configuration)
        #[arg(long)]
        changelog: Option<PathBuf>,
    },
    /// Validate a step output file written by the build
    Outputs { file: PathBuf },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref(), &cli.workdir)?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

async fn run(cli: &Cli, git_ref: &str) -> Result<()> {
    let config = load_config(cli)?;

    let trigger = TagTrigger::new(&config.trigger.pattern);
    let Some(tag) = trigger.resolve_tag(git_ref) else {
        info!(
            "ref '{}' is not a tag matching '{}', nothing to release",
            git_ref,
            trigger.pattern()
        );
        return Ok(());
    };

    config.validate()?;
    let repository = config
        .release
        .repository
        .clone()
        .context("release repository is not configured")?;
    let workdir = cli
        .workdir
        .canonicalize()
        .with_context(|| format!("workdir {} is not accessible", cli.workdir.display()))?;
    let secrets = Secrets::from_env(&config.secrets);
    if secrets.registry_password.is_empty() {
        info!(
            "{} is empty, registry publication will be skipped",
            config.secrets.registry_password_env
        );
    }

    let services = Services {
        runner: Arc::new(SystemRunner),
        publisher: Arc::new(GithubClient::new(
            config.release.api_url.as_str(),
            repository,
            secrets.github_token.clone(),
        )?),
        uploader: Arc::new(RegistryClient::new(
            config.registry.url.as_str(),
            config.registry.username.as_str(),
        )?),
    };

    let workflow = build_pipeline(&config, &workdir, &secrets, services)?;
    let (report, _ctx) = run_release(&workflow, tag).await?;
    for (step, status) in &report.steps {
        println!("{:<22} {:?}", step.as_str(), status);
    }
    Ok(())
}

fn notes(cli: &Cli, version: &str, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => cli.workdir.join(load_config(cli)?.changelog.path),
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    println!("{}", changelog::extract_section(&content, version)?);
    Ok(())
}

fn outputs(file: &Path) -> Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed = StepOutputs::parse(&content)?;
    let build = BuildOutputs::from_outputs(&parsed)?;
    println!("version={}", build.version);
    println!("asset_path={}", build.asset_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Command::Run { git_ref } => run(&cli, git_ref).await,
        Command::Notes { version, changelog } => notes(&cli, version, changelog.as_deref()),
        Command::Outputs { file } => outputs(file),
    }
}
