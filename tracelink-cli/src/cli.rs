use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "validate-traceability",
    author,
    version,
    about = "Validate traceability links between requirements, design, code and tests"
)]
pub struct Cli {
    /// Root directory to scan
    #[clap(long, default_value = ".")]
    pub root: PathBuf,

    /// Report format
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Fail (exit 1) when overall coverage is below this percentage
    #[clap(long, value_name = "PERCENT")]
    pub fail_under: Option<f64>,

    /// Configuration file (defaults to .traceability.yaml under the root)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Write the report to a file instead of stdout
    #[clap(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Treat a root without any files as an empty, valid corpus
    #[clap(long)]
    pub allow_empty: bool,

    /// Print the effective configuration as YAML and exit
    #[clap(long)]
    pub dump_config: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Markdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["validate-traceability"]);
        assert_eq!(cli.root, PathBuf::from("."));
        assert_eq!(cli.format, OutputFormat::Text);
        assert_eq!(cli.fail_under, None);
        assert!(!cli.allow_empty);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::parse_from([
            "validate-traceability",
            "--root",
            "docs",
            "--format",
            "markdown",
            "--fail-under",
            "90",
            "--config",
            "trace.yaml",
            "-o",
            "report.md",
            "--allow-empty",
            "-vv",
        ]);
        assert_eq!(cli.root, PathBuf::from("docs"));
        assert_eq!(cli.format, OutputFormat::Markdown);
        assert_eq!(cli.fail_under, Some(90.0));
        assert_eq!(cli.config, Some(PathBuf::from("trace.yaml")));
        assert_eq!(cli.output, Some(PathBuf::from("report.md")));
        assert!(cli.allow_empty);
        assert_eq!(cli.verbose, 2);
    }
}
