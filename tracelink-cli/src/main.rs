mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use log::{debug, info, warn};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use tracelink_core::config::check_threshold;
use tracelink_core::report::format_percentage;
use tracelink_core::{
    collect_files, render_json, render_markdown, render_text, CoverageResult, GateFailure,
    ScanError, TraceConfig, Validator,
};

use crate::cli::{Cli, OutputFormat};

const EXIT_GATE_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_GATE_FAILED),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Logs go to stderr; RUST_LOG wins over -v
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Returns `Ok(false)` when a coverage gate failed
fn run(cli: &Cli) -> Result<bool> {
    let (config, config_path) = TraceConfig::discover(&cli.root, cli.config.as_deref())?;
    match &config_path {
        Some(path) => info!("Using configuration {}", path.display()),
        None => debug!("Using built-in configuration"),
    }

    if cli.dump_config {
        print!("{}", config.to_yaml()?);
        return Ok(true);
    }

    if let Some(threshold) = cli.fail_under {
        check_threshold("--fail-under", threshold)?;
    }

    let validator = Validator::new(config).context("Invalid configuration")?;

    let files = match collect_files(&cli.root, &validator.config().scan) {
        Ok(files) => files,
        Err(ScanError::NoFiles(root)) if cli.allow_empty => {
            warn!("No files found under {}", root.display());
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let result = validator.validate(&files);

    let report = match cli.format {
        OutputFormat::Text => render_text(&result),
        OutputFormat::Json => render_json(&result)?,
        OutputFormat::Markdown => render_markdown(&result),
    };
    write_report(&report, cli.output.as_deref())?;

    let failures = validator.gates(&result, cli.fail_under)?;
    let gated = cli.fail_under.or(validator.config().fail_under).is_some()
        || validator
            .chain()
            .stages()
            .iter()
            .any(|stage| stage.min_coverage.is_some());
    if gated {
        print_gates(&result, &failures);
    }

    Ok(failures.is_empty())
}

fn write_report(report: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, report)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(report.as_bytes())
                .context("Failed to write report to stdout")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn print_gates(result: &CoverageResult, failures: &[GateFailure]) {
    if failures.is_empty() {
        eprintln!(
            "{} Coverage gates passed (overall {})",
            "✓".green(),
            format_percentage(result.overall_percentage)
        );
        return;
    }

    for failure in failures {
        eprintln!("{} {}", "✗".red(), failure);
    }
    eprintln!(
        "{}",
        format!("{} coverage gate(s) failed", failures.len()).red().bold()
    );
}
