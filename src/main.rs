use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use py2rust::config::{OptionOverrides, TranspileConfig, TranspileOptions, CONFIG_FILENAME};
use py2rust::pipeline::{load_module, write_atomic, PipelineOutput};
use py2rust::{ReportFormat, RunStatus, TranspilationPipeline, TranspileError, ValidationStrategy};

#[derive(Parser)]
#[command(name = "py2rust")]
#[command(version, about = "Translate Python modules to Rust and report what needs manual work", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Transpile Python modules to Rust
    Transpile {
        /// Python source files (or JSON syntax trees with --tree-json)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (one input) or directory (several inputs)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Name of the emitted module (one input only)
        #[arg(short, long)]
        module: Option<String>,

        /// Promote every warning to blocking
        #[arg(long)]
        strict: bool,

        /// Report format
        #[arg(long, value_enum)]
        report: Option<ReportFormat>,

        /// Write the report to this path instead of stdout (a directory for several inputs)
        #[arg(long)]
        report_out: Option<PathBuf>,

        /// Configuration file (defaults to ./py2rust.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Inputs are JSON syntax trees instead of Python source
        #[arg(long)]
        tree_json: bool,
    },

    /// Report constructs that need manual work, without generating code
    Analyze {
        /// Python source file
        file: PathBuf,

        /// Report format
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,

        /// Promote every warning to blocking
        #[arg(long)]
        strict: bool,

        /// Configuration file (defaults to ./py2rust.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input is a JSON syntax tree instead of Python source
        #[arg(long)]
        tree_json: bool,
    },

    /// Write a default py2rust.toml
    Init {
        /// Directory to write the configuration into
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

/// How a command ended when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Partial,
}

impl Outcome {
    fn from_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Outcome::Success,
            RunStatus::Partial => Outcome::Partial,
        }
    }

    fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Partial => ExitCode::from(2),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter_layer = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("info")
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("py2rust v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Transpile {
            files,
            output,
            module,
            strict,
            report,
            report_out,
            config,
            tree_json,
        } => {
            let overrides = OptionOverrides {
                module_name: module,
                output_destination: output,
                strict,
                report_format: report,
            };
            cmd_transpile(files, overrides, report_out, config, tree_json)
        }
        Commands::Analyze {
            file,
            format,
            strict,
            config,
            tree_json,
        } => {
            let overrides = OptionOverrides {
                strict,
                report_format: format,
                ..OptionOverrides::default()
            };
            cmd_analyze(file, overrides, config, tree_json)
        }
        Commands::Init { path, force } => cmd_init(path, force).map(|()| Outcome::Success),
    };

    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// `--config` when given, else `./py2rust.toml` when present
fn load_config(path: Option<&Path>) -> anyhow::Result<Option<TranspileConfig>> {
    match path {
        Some(path) => {
            let config = TranspileConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            Ok(Some(config))
        }
        None => TranspileConfig::load_optional(Path::new("."))
            .with_context(|| format!("Failed to load {}", CONFIG_FILENAME)),
    }
}

fn configuration_error(message: impl Into<String>) -> anyhow::Error {
    TranspileError::Configuration(message.into()).into()
}

/// Resolve the options of every input before any pass runs
fn plan_transpile(
    files: &[PathBuf],
    overrides: &OptionOverrides,
    config: Option<&TranspileConfig>,
) -> anyhow::Result<Vec<TranspileOptions>> {
    if files.len() == 1 {
        return Ok(vec![TranspileOptions::resolve(&files[0], config, overrides)?]);
    }

    let config_module = config.and_then(|c| c.module.name.as_ref());
    if overrides.module_name.is_some() || config_module.is_some() {
        return Err(configuration_error(
            "a module name can only be set for a single input file",
        ));
    }

    let out_dir = overrides
        .output_destination
        .clone()
        .or_else(|| config.and_then(|c| c.output.destination.clone()));
    if let Some(dir) = &out_dir {
        if dir.exists() && !dir.is_dir() {
            return Err(configuration_error(format!(
                "{} must be a directory when transpiling several files",
                dir.display()
            )));
        }
    }

    files
        .iter()
        .map(|file| {
            let mut per_file = overrides.clone();
            per_file.output_destination = out_dir.as_ref().map(|dir| {
                let stem = py2rust::frontend::module_name_from_path(&file.to_string_lossy());
                dir.join(format!("{}.rs", stem))
            });
            Ok(TranspileOptions::resolve(file, config, &per_file)?)
        })
        .collect()
}

/// Run the pipeline on one input and commit its output
fn transpile_one(
    file: &Path,
    options: TranspileOptions,
    tree_json: bool,
) -> anyhow::Result<PipelineOutput> {
    let module = load_module(file, tree_json)?;
    let destination = options.output_destination.clone();
    let output = TranspilationPipeline::standard(ValidationStrategy::StopOnError)
        .run(module, options)
        .with_context(|| format!("Failed to transpile {}", file.display()))?;

    if let (Some(dest), Some(code)) = (destination, &output.code) {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        write_atomic(&dest, code)?;
        info!("Wrote {}", dest.display());
    }
    Ok(output)
}

fn cmd_transpile(
    files: Vec<PathBuf>,
    overrides: OptionOverrides,
    report_out: Option<PathBuf>,
    config_path: Option<PathBuf>,
    tree_json: bool,
) -> anyhow::Result<Outcome> {
    let config = load_config(config_path.as_deref())?;
    let plans = plan_transpile(&files, &overrides, config.as_ref())?;
    let several = files.len() > 1;

    let results: Vec<(PathBuf, TranspileOptions, anyhow::Result<PipelineOutput>)> = files
        .par_iter()
        .zip(plans.into_par_iter())
        .map(|(file, options)| {
            let result = transpile_one(file, options.clone(), tree_json);
            (file.clone(), options, result)
        })
        .collect();

    let mut outcome = Outcome::Success;
    let mut failures = 0usize;
    for (file, options, result) in &results {
        match result {
            Ok(output) => {
                display_run(file, options, output);
                emit_report(output, options, report_out.as_deref(), several)?;
                if output.blocked() {
                    outcome = Outcome::Partial;
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!(
                    "{} {}: {:#}",
                    "✗".bright_red(),
                    file.display(),
                    e
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} inputs failed, nothing written for them", failures, results.len());
    }
    Ok(outcome)
}

fn display_run(file: &Path, options: &TranspileOptions, output: &PipelineOutput) {
    let target = options
        .output_destination
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let status = match output.report.status() {
        RunStatus::Success => "success".bright_green(),
        RunStatus::Partial => "partial".bright_yellow(),
    };
    eprintln!(
        "{} {} -> {} [{}, {} findings]",
        "✓".bright_green(),
        file.display(),
        target,
        status,
        output.report.findings.len()
    );
    if output.blocked() {
        warn!(
            "{} contains placeholders that need manual implementation",
            target
        );
    }
}

/// Print the report, or save it under `report_out`
fn emit_report(
    output: &PipelineOutput,
    options: &TranspileOptions,
    report_out: Option<&Path>,
    several: bool,
) -> anyhow::Result<()> {
    let format = options.report_format;
    match report_out {
        Some(path) => {
            let path = if several {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                path.join(format!(
                    "{}.report.{}",
                    options.module_name,
                    format.extension()
                ))
            } else {
                path.to_path_buf()
            };
            output.report.save(&path, format)?;
            info!("Report saved to {}", path.display());
        }
        None => println!("{}", output.report.render(format)?),
    }
    Ok(())
}

fn cmd_analyze(
    file: PathBuf,
    overrides: OptionOverrides,
    config_path: Option<PathBuf>,
    tree_json: bool,
) -> anyhow::Result<Outcome> {
    let config = load_config(config_path.as_deref())?;
    let mut options = TranspileOptions::resolve(&file, config.as_ref(), &overrides)?;
    options.output_destination = None;

    let module = load_module(&file, tree_json)?;
    let output = TranspilationPipeline::analysis_only(ValidationStrategy::StopOnError)
        .run(module, options.clone())
        .with_context(|| format!("Failed to analyze {}", file.display()))?;

    println!("{}", output.report.render(options.report_format)?);
    Ok(Outcome::from_status(output.report.status()))
}

fn cmd_init(path: PathBuf, force: bool) -> anyhow::Result<()> {
    let config_path = path.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    TranspileConfig::default().save(&config_path)?;

    println!(
        "{} Wrote {}",
        "✓".bright_green(),
        config_path.display()
    );
    Ok(())
}
