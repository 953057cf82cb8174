//! Suitegrade CLI - smart-contract test suite quality analysis

#![deny(warnings)]

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output
// - Logs go to stderr; stdout carries only the report

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use suitegrade_core::config;
use suitegrade_core::findings::Severity;
use suitegrade_core::{analyze_path, render_json, render_text, Report, TestRunner};

#[derive(Parser)]
#[command(name = "suitegrade")]
#[command(about = "Test suite quality analysis for Solidity projects")]
#[command(version = env!("SUITEGRADE_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a Solidity project's contracts, tests and mocks
    Analyze {
        /// Path to project directory or a single source file
        path: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run the configured compile/test/coverage command
        #[arg(long)]
        run: bool,

        /// Toolchain timeout in seconds (overrides config file)
        #[arg(long)]
        timeout: Option<u64>,

        /// Write the report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Exit with status 1 if an active finding has at least this severity
        #[arg(long)]
        fail_on: Option<FailLevel>,
    },
    /// Validate a configuration file
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running analysis
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FailLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl FailLevel {
    fn severity(self) -> Severity {
        match self {
            FailLevel::Low => Severity::Low,
            FailLevel::Medium => Severity::Medium,
            FailLevel::High => Severity::High,
            FailLevel::Critical => Severity::Critical,
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SUITEGRADE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            path,
            format,
            config: config_path,
            run,
            timeout,
            output,
            fail_on,
        } => {
            let normalized_path = if path.is_relative() {
                std::env::current_dir()?.join(&path)
            } else {
                path
            };

            if !normalized_path.exists() {
                anyhow::bail!("Path does not exist: {}", normalized_path.display());
            }

            let project_root = find_project_root(&normalized_path);
            let mut resolved_config = config::load_and_resolve(&project_root, config_path.as_deref())
                .context("failed to load configuration")?;

            if let Some(config_path) = &resolved_config.config_path {
                tracing::info!(config = %config_path.display(), "using config");
            }

            // CLI flags override config file values
            if let Some(secs) = timeout {
                if secs == 0 {
                    anyhow::bail!("--timeout must be positive");
                }
                resolved_config.toolchain_timeout = Duration::from_secs(secs);
            }

            let runner = resolved_config.runner();
            let runner: Option<&dyn TestRunner> = if run { Some(&runner) } else { None };
            let report = analyze_path(&normalized_path, &project_root, &resolved_config, runner)?;

            let rendered = match format {
                OutputFormat::Text => render_text(&report),
                OutputFormat::Json => format!("{}\n", render_json(&report)),
            };
            match output {
                Some(out) => {
                    write_report(&out, &rendered)?;
                    eprintln!("Report written to {}", out.display());
                }
                None => print!("{}", rendered),
            }

            if let Some(level) = fail_on {
                if exceeds(&report, level.severity()) {
                    std::process::exit(1);
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref());

                match resolved {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

fn print_config(resolved: &config::ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Classification:");
    println!("  min_distinct_hits: {}", resolved.classifier.min_distinct_hits);
    let priority: Vec<&str> = resolved.classifier.priority.iter().map(|d| d.as_str()).collect();
    println!("  priority: {}", priority.join(" > "));
    println!();
    println!("Risk:");
    println!("  function_weight: {}", resolved.risk_weights.function_weight);
    println!("  structural_cap: {}", resolved.risk_weights.structural_cap);
    println!("  security_cap: {}", resolved.risk_weights.security_cap);
    for (domain, base) in &resolved.risk_weights.domain_base_risk {
        println!("  base[{}]: {}", domain.as_str(), base);
    }
    println!();
    println!("Thresholds:");
    println!("  moderate: {}", resolved.risk_thresholds.moderate);
    println!("  high: {}", resolved.risk_thresholds.high);
    println!("  critical: {}", resolved.risk_thresholds.critical);
    println!();
    let w = &resolved.mapper.coverage_weights;
    println!("Coverage weights:");
    println!("  positive: {}", w.positive);
    println!("  negative: {}", w.negative);
    println!("  edge_case: {}", w.edge_case);
    println!("  invariant_or_fuzz: {}", w.invariant_or_fuzz);
    println!();
    println!("Filter:");
    println!("  sophistication_threshold: {}", resolved.filter.sophistication_threshold);
    println!("  security_suite_min_tests: {}", resolved.filter.security_suite_min_tests);
    println!("  min_line_coverage: {}", resolved.detectors.min_line_coverage);
    println!(
        "  include: {}",
        if resolved.include.is_some() {
            "custom patterns"
        } else {
            "all .sol files"
        }
    );
    println!();
    println!("Toolchain:");
    println!("  command: {}", resolved.toolchain_command.join(" "));
    println!("  timeout: {}s", resolved.toolchain_timeout.as_secs());
}

/// True if an active finding reaches `level`
fn exceeds(report: &Report, level: Severity) -> bool {
    report.active_findings().any(|f| f.severity >= level)
}

/// Write report to file with atomic write pattern
fn write_report(path: &Path, contents: &str) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temporary file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temporary file to: {}", path.display()))?;

    Ok(())
}

/// Find the Foundry project root by searching up the directory tree for
/// `foundry.toml`; falls back to the start directory
fn find_project_root(start_path: &Path) -> PathBuf {
    let start = if start_path.is_file() {
        start_path.parent().unwrap_or(start_path).to_path_buf()
    } else {
        start_path.to_path_buf()
    };

    let mut current = start.as_path();
    loop {
        if current.join("foundry.toml").exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return start,
        }
    }
}
