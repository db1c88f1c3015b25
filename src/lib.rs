//! trackdedup - content-addressed deduplication for large music catalogs
//!
//! Every audio file gets a durable BLAKE3 identity, carried in the catalog as
//! a `fingerprint:<hex>` tag and, where the container allows, inside the file
//! itself. Deduplication refuses to run until enough of the catalog carries
//! such an identity, groups exact matches first, falls back to name matching
//! only for items without one, keeps the highest-fidelity copy, and moves the
//! rest to the catalog's trash instead of deleting them.

pub mod actions;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod progress;
pub mod report;
pub mod signal;

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::catalog::{
    CatalogApi, CatalogEntry, HttpCatalog, HttpWorkspace, InMemoryCatalog, InMemoryWorkspace,
    MediaItem, Retrying, Snapshot, WorkspaceApi,
};
use crate::cli::{Cli, Commands, CoverageArgs, FingerprintArgs, OutputFormat, RunArgs};
use crate::config::Config;
use crate::engine::{DedupEngine, EngineConfig};
use crate::error::ExitCode;
use crate::fingerprint::{FingerprintPipeline, PipelineConfig};
use crate::progress::{Progress, ProgressCallback};
use crate::report::FileReport;
use crate::signal::ShutdownHandler;

/// Global options every subcommand needs after parsing.
struct Globals {
    output: OutputFormat,
    quiet: bool,
}

/// Run the application for parsed arguments.
///
/// # Errors
///
/// Returns an error for setup failures: invalid configuration, an
/// unreadable snapshot, or a catalog that cannot be listed at all. Per-item
/// failures are part of the report, not errors.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli)?;

    let globals = Globals {
        output: cli.output,
        quiet: cli.quiet,
    };
    let handler = signal::install_handler().context("Failed to install Ctrl+C handler")?;

    match cli.command {
        Commands::Config => {
            let text = config.to_toml().context("Failed to render configuration")?;
            print!("{}", text);
            Ok(ExitCode::Success)
        }
        Commands::Run(args) => run_dedup(&config, &globals, &handler, args),
        Commands::Coverage(args) => run_coverage(&config, &globals, &handler, args),
        Commands::Fingerprint(args) => run_fingerprint(&config, &globals, &handler, args),
    }
}

/// Apply CLI flags over the loaded configuration and re-validate.
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(url) = &cli.catalog_url {
        config.catalog.url = url.clone();
    }
    if let Some(url) = &cli.workspace_url {
        config.workspace.url = url.clone();
    }
    if let Some(threads) = cli.io_threads {
        config.io_threads = threads;
    }
    match &cli.command {
        Commands::Run(args) => {
            if let Some(threshold) = args.threshold {
                config.coverage_threshold = threshold;
            }
            if let Some(similarity) = args.similarity {
                config.similarity_threshold = similarity;
            }
            if args.no_gate {
                config.coverage_required = false;
            }
            if args.exact_only {
                config.fuzzy_fallback = false;
            }
        }
        Commands::Coverage(args) => {
            if let Some(threshold) = args.threshold {
                config.coverage_threshold = threshold;
            }
        }
        _ => {}
    }
    config.validate().context("Invalid configuration")?;
    Ok(())
}

/// Build both backends: live HTTP clients wrapped in retries, or in-memory
/// backends loaded from a snapshot file.
fn backends(
    config: &Config,
    snapshot: Option<&Path>,
) -> anyhow::Result<(Box<dyn CatalogApi>, Box<dyn WorkspaceApi>)> {
    if let Some(path) = snapshot {
        let snapshot = Snapshot::load(path).context("Failed to load catalog snapshot")?;
        log::info!(
            "Offline run from {} ({} item(s), {} record(s))",
            path.display(),
            snapshot.items.len(),
            snapshot.records.len()
        );
        return Ok((
            Box::new(InMemoryCatalog::new(snapshot.items)),
            Box::new(InMemoryWorkspace::new(snapshot.records)),
        ));
    }

    let policy = config.retry_policy();
    let catalog = HttpCatalog::new(config.catalog_url()?, config.timeout())
        .context("Failed to create catalog client")?;
    let workspace = HttpWorkspace::new(config.workspace_url()?, config.timeout())
        .context("Failed to create workspace client")?;
    Ok((
        Box::new(Retrying::new(catalog, policy)),
        Box::new(Retrying::new(workspace, policy)),
    ))
}

fn progress_bars(globals: &Globals) -> Arc<Progress> {
    Arc::new(Progress::new(
        globals.quiet || globals.output == OutputFormat::Json,
    ))
}

fn engine_config(config: &Config, globals: &Globals, handler: &ShutdownHandler) -> EngineConfig {
    let progress: Arc<dyn ProgressCallback> = progress_bars(globals);
    EngineConfig::default()
        .with_list_limit(config.catalog.list_limit)
        .with_coverage_gate(config.coverage_threshold, config.coverage_required)
        .with_grouping(config.grouping())
        .with_io_threads(config.io_threads)
        .with_shutdown_flag(handler.get_flag())
        .with_progress_callback(progress)
}

fn run_dedup(
    config: &Config,
    globals: &Globals,
    handler: &ShutdownHandler,
    args: RunArgs,
) -> anyhow::Result<ExitCode> {
    let mut execute = args.execute;
    if execute && args.snapshot.is_some() {
        log::warn!("--snapshot is read-only; running as a dry run");
        execute = false;
    }
    if !config.coverage_required {
        log::warn!("Coverage gate disabled: name matching may produce false duplicate groups");
    }

    let (catalog, workspace) = backends(config, args.snapshot.as_deref())?;
    let schema = config.record_schema()?;
    let settings = engine_config(config, globals, handler)
        .with_execute(execute)
        .with_fingerprint_limit(args.limit);
    let engine = DedupEngine::new(catalog.as_ref(), workspace.as_ref(), schema, settings);

    let report = engine.run().context("Deduplication run failed")?;

    let mut stdout = std::io::stdout().lock();
    match globals.output {
        OutputFormat::Json => report.write_json(&mut stdout)?,
        OutputFormat::Text => write!(stdout, "{}", report.render_text())?,
    }

    Ok(if report.interrupted {
        ExitCode::Interrupted
    } else {
        ExitCode::Success
    })
}

fn run_coverage(
    config: &Config,
    globals: &Globals,
    handler: &ShutdownHandler,
    args: CoverageArgs,
) -> anyhow::Result<ExitCode> {
    let (catalog, workspace) = backends(config, args.snapshot.as_deref())?;
    let engine = DedupEngine::new(
        catalog.as_ref(),
        workspace.as_ref(),
        config.record_schema()?,
        engine_config(config, globals, handler),
    );
    let report = engine.coverage().context("Coverage measurement failed")?;

    let mut stdout = std::io::stdout().lock();
    match globals.output {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
        }
        OutputFormat::Text => write!(stdout, "{}", report.render_text())?,
    }

    Ok(if report.interrupted {
        ExitCode::Interrupted
    } else {
        ExitCode::Success
    })
}

fn run_fingerprint(
    config: &Config,
    globals: &Globals,
    handler: &ShutdownHandler,
    args: FingerprintArgs,
) -> anyhow::Result<ExitCode> {
    let mut slots: Vec<Result<String, FileReport>> = Vec::with_capacity(args.files.len());
    let mut items = Vec::new();
    for path in &args.files {
        let id = path.to_string_lossy().into_owned();
        let entry = CatalogEntry {
            id: id.clone(),
            name: String::new(),
            path: path.clone(),
            tags: Default::default(),
            trashed: false,
        };
        match MediaItem::from_entry(entry) {
            Some(item) => {
                items.push(item);
                slots.push(Ok(id));
            }
            None => slots.push(Err(FileReport {
                path: path.clone(),
                fingerprint: None,
                source: None,
                status: "unknown format, skipped".to_string(),
            })),
        }
    }

    let progress: Arc<dyn ProgressCallback> = progress_bars(globals);
    let pipeline = FingerprintPipeline::new(
        PipelineConfig::default()
            .with_io_threads(config.io_threads)
            .with_embed(args.execute)
            .with_shutdown_flag(handler.get_flag())
            .with_progress_callback(progress),
    );
    let refs: Vec<&MediaItem> = items.iter().collect();
    let (results, stats) = pipeline.fingerprint(&refs);

    let by_id: HashMap<String, FileReport> = results
        .into_iter()
        .map(|work| {
            let report = match work.result {
                Ok(fp) => FileReport {
                    path: work.path,
                    fingerprint: Some(fp.fingerprint.to_hex()),
                    source: Some(fp.source),
                    status: FileReport::embed_status(&fp.embed),
                },
                Err(e) => FileReport {
                    path: work.path,
                    fingerprint: None,
                    source: None,
                    status: e.to_string(),
                },
            };
            (work.item_id, report)
        })
        .collect();
    let reports: Vec<FileReport> = slots
        .into_iter()
        .map(|slot| match slot {
            Err(skipped) => skipped,
            Ok(id) => by_id.get(&id).cloned().unwrap_or_else(|| FileReport {
                path: id.into(),
                fingerprint: None,
                source: None,
                status: "not processed (interrupted)".to_string(),
            }),
        })
        .collect();

    let mut stdout = std::io::stdout().lock();
    match globals.output {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut stdout, &reports)?;
            writeln!(stdout)?;
        }
        OutputFormat::Text => {
            for report in &reports {
                writeln!(stdout, "{}", report.render_line())?;
            }
        }
    }

    Ok(if stats.interrupted {
        ExitCode::Interrupted
    } else {
        ExitCode::Success
    })
}
