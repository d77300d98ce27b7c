//! Library interface for the `ascend` command-line tool

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ascend_compiler::{CompilerConfig, CompilerContext, InstantiationPolicy, ProcStatus};
use ascend_core::Reporter;
use ascend_system::{SlvSystem, SystemStats};
use serde::Serialize;
use tracing::{info, warn};

/// Build a compiler from an optional TOML config and load `libraries` into
/// it, searching the configured library path for relative names.
pub fn open(
    config: Option<&Path>,
    libraries: &[PathBuf],
    best_effort: bool,
) -> Result<CompilerContext> {
    let mut config = match config {
        Some(path) => CompilerConfig::from_file(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?,
        None => CompilerConfig::default(),
    };
    if best_effort {
        config = config.with_policy(InstantiationPolicy::BestEffort);
    }

    let mut ctx = CompilerContext::with_config(config)?;
    if libraries.is_empty() {
        warn!("No library files given; only fundamental types are available");
    }
    for library in libraries {
        let count = ctx
            .load_library_file(library)
            .with_context(|| format!("Failed to load library: {:?}", library))?;
        info!("Loaded {} type(s) from {:?}", count, library);
    }
    Ok(ctx)
}

/// Lint one type, or the whole library.
pub fn check(ctx: &CompilerContext, type_name: Option<&str>) -> Result<Reporter> {
    Ok(ctx.lint(type_name)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct InstantiateOutcome {
    pub simulation: String,
    pub type_name: String,
    pub complete: bool,
    pub fingerprint: String,
    pub tree: Vec<String>,
    pub method: Option<ProcStatus>,
    pub diagnostics: Vec<String>,
}

/// Instantiate `type_name` as `name`, optionally running `method` on it.
pub fn instantiate(
    ctx: &mut CompilerContext,
    type_name: &str,
    name: &str,
    method: Option<&str>,
) -> Result<InstantiateOutcome> {
    let sim = ctx
        .create_simulation(name, type_name)
        .with_context(|| format!("Failed to instantiate '{}'", type_name))?;
    let complete = sim.complete;
    let mut diagnostics: Vec<String> = sim.diagnostics.iter().map(ToString::to_string).collect();

    let status = match method {
        Some(m) => {
            let report = ctx.run_method(name, m)?;
            diagnostics.extend(report.diagnostics.iter().map(ToString::to_string));
            if report.status != ProcStatus::AllOk {
                warn!("Method '{}' finished with {:?}", m, report.status);
            }
            Some(report.status)
        }
        None => None,
    };

    Ok(InstantiateOutcome {
        simulation: name.to_string(),
        type_name: type_name.to_string(),
        complete,
        fingerprint: ctx.fingerprint(name)?,
        tree: ctx.describe(name)?,
        method: status,
        diagnostics,
    })
}

/// Instantiate `type_name` and summarise the solver system scanned from it.
pub fn system_stats(ctx: &mut CompilerContext, type_name: &str) -> Result<SystemStats> {
    let name = format!("{}_system", type_name);
    let sim = ctx.create_simulation(&name, type_name)?;
    if !sim.complete {
        bail!("'{}' did not instantiate completely", type_name);
    }
    let mut system = SlvSystem::for_simulation(ctx, &name)?;
    system.analyse_derivatives(ctx.state()?)?;
    system.classify_differential();
    let stats = system.stats();
    system.destroy(ctx)?;
    Ok(stats)
}
