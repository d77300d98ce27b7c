use std::path::PathBuf;

use anyhow::{bail, Result};
use ascend_cli::{check, instantiate, open, system_stats};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "ascend")]
#[command(about = "Check, instantiate and inspect ASCEND model libraries", long_about = None)]
struct Cli {
    /// Compiler configuration file (TOML)
    #[arg(short, long, env = "ASCEND_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check type legality of one type or the whole library
    Check {
        /// Library files (JSON or YAML), loaded in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Type to check (defaults to every type)
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,
    },

    /// Instantiate a model type as a simulation
    Instantiate {
        /// Library files (JSON or YAML), loaded in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Model type to instantiate
        #[arg(short = 't', long = "type")]
        type_name: String,

        /// Simulation name (defaults to the type name)
        #[arg(short, long)]
        name: Option<String>,

        /// Method to run after instantiation
        #[arg(short, long)]
        method: Option<String>,

        /// Keep partially instantiated simulations instead of failing
        #[arg(long)]
        best_effort: bool,
    },

    /// Summarise the solver system of a model type
    System {
        /// Library files (JSON or YAML), loaded in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Model type to scan
        #[arg(short = 't', long = "type")]
        type_name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::TRACE
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(cli.debug)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { files, type_name } => {
            let ctx = open(cli.config.as_deref(), &files, false)?;
            let reporter = check(&ctx, type_name.as_deref())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(reporter.entries())?);
            } else {
                println!("{}", reporter.format_summary());
            }
            if reporter.has_errors() {
                bail!("Type check failed");
            }
            Ok(())
        }
        Commands::Instantiate {
            files,
            type_name,
            name,
            method,
            best_effort,
        } => {
            let mut ctx = open(cli.config.as_deref(), &files, best_effort)?;
            let name = name.unwrap_or_else(|| type_name.clone());
            let outcome = instantiate(&mut ctx, &type_name, &name, method.as_deref())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                for line in &outcome.tree {
                    println!("{}", line);
                }
                for diagnostic in &outcome.diagnostics {
                    println!("{}", diagnostic);
                }
                info!(
                    "Simulation '{}' ({}) fingerprint {}",
                    outcome.simulation,
                    if outcome.complete { "complete" } else { "incomplete" },
                    outcome.fingerprint
                );
            }
            ctx.destroy()?;
            Ok(())
        }
        Commands::System { files, type_name } => {
            let mut ctx = open(cli.config.as_deref(), &files, false)?;
            let stats = system_stats(&mut ctx, &type_name)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("models:            {}", stats.models);
                println!(
                    "variables:         {} ({} incident, {} fixed)",
                    stats.vars, stats.incident_vars, stats.fixed_vars
                );
                println!("relations:         {} ({} included)", stats.rels, stats.included_rels);
                println!("equalities:        {}", stats.equalities);
                println!("black box rows:    {}", stats.blackbox_rels);
                println!("differential rows: {}", stats.differential_rels);
                println!("nonzeros:          {}", stats.nonzeros);
            }
            ctx.destroy()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_instantiate_arguments() {
        let cli = Cli::try_parse_from([
            "ascend",
            "instantiate",
            "lib.json",
            "--type",
            "mixer",
            "--method",
            "on_load",
            "--best-effort",
        ])
        .unwrap();
        match cli.command {
            Commands::Instantiate {
                files,
                type_name,
                name,
                method,
                best_effort,
            } => {
                assert_eq!(files, vec![PathBuf::from("lib.json")]);
                assert_eq!(type_name, "mixer");
                assert_eq!(name, None);
                assert_eq!(method.as_deref(), Some("on_load"));
                assert!(best_effort);
            }
            _ => panic!("expected instantiate"),
        }
    }

    #[test]
    fn test_files_are_required() {
        assert!(Cli::try_parse_from(["ascend", "system", "--type", "tank"]).is_err());
    }
}
