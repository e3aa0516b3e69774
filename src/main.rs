use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use stepledger::archive::{ArchiveFormat, run_archive_step};
use stepledger::config::{WorkflowConfig, validate_config};
use stepledger::digest::file_sha256_hex;
use stepledger::evidence::run_generate_evidence_step;
use stepledger::jsonio::to_json_indented;
use stepledger::merge::merged_results;
use stepledger::results::{StepResult, WorkflowResult};
use stepledger::transparency::{GpgSigner, RekorCli, run_transparency_step};
use stepledger::upload::DefaultUploader;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Archive {
            step,
            archive_format,
        } => run_archive(step, archive_format),
        Commands::Evidence(args) => run_evidence(args),
        Commands::Record(args) => run_record(args),
        Commands::Merge { workflow_file } => run_merge(workflow_file),
        Commands::Validate { config } => run_validate(config),
        Commands::Digest { path } => {
            let digest = file_sha256_hex(&path)?;
            println!("{}  {}", digest, path.display());
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stepledger", &mut io::stdout());
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn run_archive(args: StepArgs, archive_format: Option<ArchiveFormat>) -> Result<()> {
    let mut config = load_validated_config(&args.config)?;
    if let Some(format) = archive_format {
        config.archive_format = format;
    }
    let mut workflow = WorkflowResult::load(&args.workflow_file)?;
    let work_dir = prepare_work_dir(&args.work_dir)?;

    let step_result = run_archive_step(&config, &workflow, &work_dir)?;
    finish_step(step_result, &mut workflow, &args.workflow_file)
}

fn run_evidence(args: StepArgs) -> Result<()> {
    let config = load_validated_config(&args.config)?;
    let mut workflow = WorkflowResult::load(&args.workflow_file)?;
    let work_dir = prepare_work_dir(&args.work_dir)?;

    let step_result =
        run_generate_evidence_step(&config, &workflow, &work_dir, &DefaultUploader)?;
    finish_step(step_result, &mut workflow, &args.workflow_file)
}

fn run_record(args: StepArgs) -> Result<()> {
    let config = load_validated_config(&args.config)?;
    let Some(transparency) = config.transparency.clone() else {
        bail!(
            "Config '{}' has no 'transparency' section; it is required for record",
            args.config.display()
        );
    };
    let mut workflow = WorkflowResult::load(&args.workflow_file)?;
    let work_dir = prepare_work_dir(&args.work_dir)?;

    let signer = GpgSigner::new(&transparency.gpg_user);
    let log = RekorCli::new(&transparency.rekor_server);
    let step_result =
        run_transparency_step(&transparency, &workflow, &work_dir, &signer, &log)?;
    finish_step(step_result, &mut workflow, &args.workflow_file)
}

fn run_merge(workflow_file: PathBuf) -> Result<()> {
    let workflow = WorkflowResult::load(&workflow_file)?;
    let merged = merged_results(&workflow)?;
    println!("{}", to_json_indented(&merged)?);
    Ok(())
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = WorkflowConfig::load(&config_path)?;
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(file = %config_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %config_path.display(), "Config validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %config_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn load_validated_config(path: &PathBuf) -> Result<WorkflowConfig> {
    let config = WorkflowConfig::load(path)?;
    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(file = %path.display(), "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %path.display(), "{error_msg}");
        }
        bail!(
            "Cannot run step due to {} config error(s)",
            report.errors.len()
        );
    }
    Ok(config)
}

fn prepare_work_dir(work_dir: &PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create working directory: {}", work_dir.display()))?;
    Ok(work_dir.clone())
}

fn finish_step(
    step_result: StepResult,
    workflow: &mut WorkflowResult,
    workflow_file: &PathBuf,
) -> Result<()> {
    let success = step_result.success;
    let message = step_result.message.clone();
    let step_name = step_result.step_name().to_string();

    workflow.add_step_result(step_result);
    workflow.save(workflow_file)?;

    if success {
        info!(step = step_name.as_str(), "{message}");
        Ok(())
    } else {
        error!(step = step_name.as_str(), "{message}");
        bail!("Step '{step_name}' failed: {message}")
    }
}

#[derive(Parser)]
#[command(
    name = "stepledger",
    version,
    about = "Aggregates pipeline step results into archives, evidence bundles and transparency-log entries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StepArgs {
    /// Persisted workflow result file; created when missing, updated with
    /// this step's result.
    #[arg(long = "workflow-file")]
    workflow_file: PathBuf,
    #[arg(long)]
    config: PathBuf,
    #[arg(long = "work-dir", default_value = "stepledger-work")]
    work_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive all non-ignored result artifacts into one compressed file
    Archive {
        #[command(flatten)]
        step: StepArgs,
        /// Override the configured container format (zip, tar, tar.gz)
        #[arg(long = "archive-format")]
        archive_format: Option<ArchiveFormat>,
    },
    /// Gather evidence from prior steps into a JSON bundle, optionally upload it
    Evidence(StepArgs),
    /// Sign the merged results and record them in the transparency log
    Record(StepArgs),
    /// Print the merged all-results document
    Merge {
        #[arg(long = "workflow-file")]
        workflow_file: PathBuf,
    },
    /// Validate a workflow config file
    Validate {
        config: PathBuf,
    },
    /// Print the SHA256 digest of a file
    Digest {
        path: PathBuf,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
