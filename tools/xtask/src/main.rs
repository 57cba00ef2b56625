//! Workspace automation tasks.
//!
//! Run with: `cargo run -p xtask -- <command>`

#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::Command;

const CRATE_PREFIX: &str = "twinrun-";

#[derive(Parser)]
#[command(name = "xtask", about = "Twinrun workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Generate coverage report
    Coverage,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Coverage => run_coverage(),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_lint()?;
    run_cmd("cargo", &["fmt", "--check"])?;
    run_cmd("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
    run_cmd("cargo", &["test", "--workspace"])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"])?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    let mut violations = Vec::new();
    for entry in std::fs::read_dir("crates").context("Failed to read crates/")? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        violations.extend(check_crate(&name, &entry.path())?);
    }

    if !violations.is_empty() {
        for violation in &violations {
            println!("  {violation}");
        }
        anyhow::bail!("{} convention violation(s)", violations.len());
    }

    println!("All conventions validated!");
    Ok(())
}

fn check_crate(name: &str, dir: &Path) -> Result<Vec<String>> {
    let mut violations = Vec::new();
    if !name.starts_with(CRATE_PREFIX) {
        violations.push(format!("crate '{name}' does not follow {CRATE_PREFIX}* naming"));
    }

    let manifest = read(&dir.join("Cargo.toml"))?;
    if !manifest.contains("[lints]\nworkspace = true") {
        violations.push(format!("crate '{name}' does not inherit workspace lints"));
    }

    let lib = dir.join("src/lib.rs");
    if lib.exists() && !read(&lib)?.contains("#![forbid(unsafe_code)]") {
        violations.push(format!("crate '{name}' does not forbid unsafe code"));
    }
    Ok(violations)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn run_coverage() -> Result<()> {
    run_cmd("cargo", &["llvm-cov", "--workspace", "--html"])?;
    println!("\nCoverage report: target/llvm-cov/html/index.html");
    Ok(())
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
