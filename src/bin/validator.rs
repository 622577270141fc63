//! CSDL Directory Validator CLI
//!
//! Validates every schema file under a directory and reports cross-file
//! conflicts and reference problems.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use csdl_conflicts::{DirectoryValidationResult, DirectoryValidator, ValidatorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "csdl-validate")]
#[command(about = "Detect cross-file conflicts in a directory of CSDL schemas")]
struct Cli {
    /// Directory to validate
    directory: PathBuf,

    /// Glob matched against file names (defaults to the configured pattern)
    #[arg(short, long)]
    pattern: Option<String>,

    /// Worker threads for per-file validation
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Config file (csdl-conflicts.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Write the dependency graph as GraphViz DOT
    #[arg(long)]
    dot: Option<PathBuf>,

    /// Print impact analysis for one element (FQN or Alias.Name)
    #[arg(long)]
    impact: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Ok(compliant)
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config_path = cli.config.as_ref().map(|p| p.display().to_string());
    let mut config = ValidatorConfig::load_from(config_path.as_deref())
        .context("Failed to load configuration")?;
    if let Some(concurrency) = cli.concurrency {
        config.validation.max_concurrency = concurrency.max(1);
    }
    let pattern = cli
        .pattern
        .clone()
        .unwrap_or_else(|| config.validation.file_pattern.clone());

    let validator = DirectoryValidator::with_config(&config).context("Failed to start validator")?;
    let result = validator.validate_directory_with_pattern(&cli.directory, &pattern);
    validator.shutdown();

    match cli.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text(&result),
    }

    if let Some(path) = &cli.dot {
        let graph = result
            .dependency_graph
            .as_ref()
            .context("No dependency graph was built")?;
        std::fs::write(path, graph.to_dot())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("✅ Dependency graph written to {}", path.display());
    }

    if let Some(element) = &cli.impact {
        let graph = result
            .dependency_graph
            .as_ref()
            .context("No dependency graph was built")?;
        let id = graph
            .resolve(element)
            .with_context(|| format!("Element '{}' is not in the dependency graph", element))?;
        let impact = graph.impact_analysis(id);
        println!();
        println!("🎯 {}", impact.summary());
        for dependent in &impact.direct_dependents {
            println!("   ├─ {}", dependent);
        }
        for (dependent, path) in &impact.impact_paths {
            println!("   └─ {} via {}", dependent, path.join(" -> "));
        }
    }

    Ok(result.compliant)
}

fn print_text(result: &DirectoryValidationResult) {
    println!("🔍 {}", result.directory_path.display());
    println!(
        "   {} file(s): {} valid, {} invalid ({} ms)",
        result.total_files, result.valid_files, result.invalid_files, result.validation_time_ms
    );

    let failed: Vec<_> = result.file_results.values().filter(|r| !r.compliant).collect();
    if !failed.is_empty() {
        println!();
        println!("❌ Files failing validation:");
        for file in failed {
            println!("  {}", file.file_name);
            for error in &file.errors {
                println!("    └─ {}", error);
            }
        }
    }

    if !result.namespace_to_files.is_empty() {
        println!();
        println!("📦 Namespaces:");
        for (namespace, files) in &result.namespace_to_files {
            let files: Vec<&str> = files.iter().map(String::as_str).collect();
            println!("  {} ({})", namespace, files.join(", "));
        }
    }

    if !result.global_errors.is_empty() {
        println!();
        println!("❌ {} error(s):", result.global_errors.len());
        for error in &result.global_errors {
            println!("  {}", error);
        }
    }

    if !result.global_warnings.is_empty() {
        println!();
        println!("⚠️  {} warning(s):", result.global_warnings.len());
        for warning in &result.global_warnings {
            println!("  {}", warning);
        }
    }

    if let Some(stats) = &result.dependency_statistics {
        println!();
        println!("📊 {}", stats);
    }

    println!();
    if result.compliant {
        println!("✅ Directory is compliant");
    } else {
        println!("❌ Directory is NOT compliant");
    }
}
