//! Command line interface for the `mprep` binary.
//!
//! Thin argument handling over the library flows. Command output goes to
//! stdout; structured logs go to stderr so piped output stays clean.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;

use mprep_common::config::PipelineConfig;
use mprep_common::events::{EventBus, PipelineEvent};
use mprep_common::formula;
use mprep_common::manifest::{standard_column, AiMatchDecision, ManifestRow, MatchStatus};
use mprep_common::stage::{self, downstream_of, PipelineStage};

use mprep_pipeline::backend::{BackendApi, FormulaSet, HttpBackend};
use mprep_pipeline::checkpoint::{CheckpointStore, FileCheckpointStore};
use mprep_pipeline::cleanup::{CleanupParams, CleanupPool, RunOutcome};
use mprep_pipeline::pricing::{PriceAutosave, PriceTarget, PricingFlow};
use mprep_pipeline::review::{top_candidate, Decision, ReviewFlow, ReviewSession};
use mprep_pipeline::standardize::{template_hint, PreviewTable, StandardizeFlow};

#[derive(Parser)]
#[command(
    name = "mprep",
    version,
    about = "Manifest preprocessing pipeline for liquidation purchase orders"
)]
pub struct Cli {
    /// Config file path; the platform default location is tried when omitted
    #[arg(long, global = true, value_name = "FILE", env = "MPREP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend base URL override
    #[arg(long, global = true, value_name = "URL")]
    pub backend_url: Option<String>,

    /// Bearer token override for the backend API
    #[arg(long, global = true, value_name = "TOKEN")]
    pub api_token: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct OrderArg {
    /// Purchase order id
    #[arg(long = "order", value_name = "ID")]
    pub order: i64,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the derived pipeline stage and per-stage progress
    Status {
        #[command(flatten)]
        order: OrderArg,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// List the AI models the backend accepts for cleanup runs
    Models,
    /// Author and check standardization formulas
    Formulas {
        #[command(subcommand)]
        action: FormulasCommand,
    },
    /// Evaluate formulas into committed manifest rows
    Standardize {
        #[command(subcommand)]
        action: StandardizeCommand,
    },
    /// Run and control the AI cleanup pool
    Cleanup {
        #[command(subcommand)]
        action: CleanupCommand,
    },
    /// Product matching and match review
    Match {
        #[command(subcommand)]
        action: MatchCommand,
    },
    /// Draft pricing
    Price {
        #[command(subcommand)]
        action: PriceCommand,
    },
    /// Freeze priced rows for physical check-in
    Finalize {
        #[command(flatten)]
        order: OrderArg,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration as TOML
    Show,
    /// Write a config file holding the current resolved values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum FormulasCommand {
    /// Ask the backend AI to propose formulas for the order's headers
    Suggest {
        #[command(flatten)]
        order: OrderArg,
        /// Saved template name to seed the proposals
        #[arg(long)]
        template: Option<String>,
    },
    /// Parse and arity-check formulas locally, touching nothing
    Validate {
        #[arg(
            short = 'f',
            long = "formula",
            value_parser = parse_formula_arg,
            value_name = "TARGET=EXPR",
            required = true
        )]
        formulas: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
pub enum StandardizeCommand {
    /// Evaluate formulas locally against the stored raw sample
    Preview {
        #[command(flatten)]
        order: OrderArg,
        #[arg(
            short = 'f',
            long = "formula",
            value_parser = parse_formula_arg,
            value_name = "TARGET=EXPR",
            required = true
        )]
        formulas: Vec<(String, String)>,
        /// Only show sample rows containing this text
        #[arg(long)]
        search: Option<String>,
        /// Cap the number of rendered rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Evaluate formulas server-side over the full manifest
    Commit {
        #[command(flatten)]
        order: OrderArg,
        #[arg(
            short = 'f',
            long = "formula",
            value_parser = parse_formula_arg,
            value_name = "TARGET=EXPR",
            required = true
        )]
        formulas: Vec<(String, String)>,
        /// Store this formula set as a reusable template
        #[arg(long)]
        save_template: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete every committed row
    Clear {
        #[command(flatten)]
        order: OrderArg,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum CleanupCommand {
    /// Start or resume the cleanup worker pool (Ctrl-C pauses)
    Run {
        #[command(flatten)]
        order: OrderArg,
        /// Rows per batch
        #[arg(long, value_name = "B")]
        batch_size: Option<u64>,
        /// Worker count, clamped to 1..=16
        #[arg(long, value_name = "W")]
        concurrency: Option<usize>,
        /// AI model id; the backend default applies when omitted
        #[arg(long, value_name = "M")]
        model: Option<String>,
        /// Stop (paused, resumable) after this many batches
        #[arg(long, value_name = "K")]
        max_batches: Option<u64>,
    },
    /// Server-side cleanup progress plus the local checkpoint
    Status {
        #[command(flatten)]
        order: OrderArg,
    },
    /// Roll back every AI cleanup artifact
    Cancel {
        #[command(flatten)]
        order: OrderArg,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum MatchCommand {
    /// Kick off the server-side matching pass
    Run {
        #[command(flatten)]
        order: OrderArg,
        /// Skip the AI-assisted pass, exact matching only
        #[arg(long)]
        no_ai: bool,
    },
    /// Show match results and summary counts
    Show {
        #[command(flatten)]
        order: OrderArg,
    },
    /// Buffer decisions and submit the review
    Review {
        #[command(flatten)]
        order: OrderArg,
        /// Accept rows, ROW or ROW=PRODUCT (top candidate when no product given)
        #[arg(long, value_parser = parse_row_product, value_delimiter = ',', value_name = "ROW[=PRODUCT]")]
        accept: Vec<(i64, Option<i64>)>,
        /// Like --accept, also pushing AI content into the catalog record
        #[arg(long, value_parser = parse_row_product, value_delimiter = ',', value_name = "ROW[=PRODUCT]")]
        accept_update: Vec<(i64, Option<i64>)>,
        /// Reject rows into new products
        #[arg(long, value_delimiter = ',', value_name = "IDS")]
        reject: Vec<i64>,
        /// Default every undecided row with activity to its top candidate
        #[arg(long)]
        accept_all: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Clear matching results plus downstream pricing
    Undo {
        #[command(flatten)]
        order: OrderArg,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum PriceCommand {
    /// Propose retail × percent ÷ 100 on the targeted rows
    Percent {
        #[command(flatten)]
        order: OrderArg,
        /// Percentage of retail, e.g. 40
        #[arg(long, value_name = "P")]
        pct: Decimal,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Set one row's draft price
    Set {
        #[command(flatten)]
        order: OrderArg,
        /// Manifest row id
        #[arg(long, value_name = "ID")]
        row: i64,
        /// Draft price
        #[arg(long, value_name = "X")]
        price: Decimal,
    },
    /// Clear draft prices on the targeted rows
    Clear {
        #[command(flatten)]
        order: OrderArg,
        #[command(flatten)]
        target: TargetArgs,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
pub struct TargetArgs {
    /// Which rows to touch
    #[arg(long, value_enum, default_value_t = TargetKind::All)]
    target: TargetKind,
    /// Explicit row ids, overriding --target
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    rows: Vec<i64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetKind {
    All,
    Unpriced,
}

impl TargetArgs {
    fn resolve(&self) -> PriceTarget {
        if !self.rows.is_empty() {
            PriceTarget::Rows(self.rows.clone())
        } else {
            match self.target {
                TargetKind::All => PriceTarget::All,
                TargetKind::Unpriced => PriceTarget::Unpriced,
            }
        }
    }
}

fn parse_formula_arg(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((target, expr)) if !target.trim().is_empty() => {
            Ok((target.trim().to_string(), expr.to_string()))
        }
        _ => Err(format!("expected TARGET=EXPR, got '{}'", s)),
    }
}

fn parse_row_product(s: &str) -> Result<(i64, Option<i64>), String> {
    match s.split_once('=') {
        Some((row, product)) => {
            let row = row
                .trim()
                .parse()
                .map_err(|_| format!("bad row id '{}'", row))?;
            let product = product
                .trim()
                .parse()
                .map_err(|_| format!("bad product id '{}'", product))?;
            Ok((row, Some(product)))
        }
        None => s
            .trim()
            .parse()
            .map(|row| (row, None))
            .map_err(|_| format!("bad row id '{}'", s)),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "mprep_pipeline=info,mprep_common=info",
        1 => "mprep_pipeline=debug,mprep_common=debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn prompt_yes(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", question);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// The stage's own work plus everything downstream, for destructive
/// prompts.
fn cascade_line(stage: PipelineStage) -> String {
    let mut names = vec![stage.label()];
    names.extend(downstream_of(stage).iter().map(|s| s.label()));
    names.join(", ")
}

fn formula_set(pairs: &[(String, String)]) -> anyhow::Result<FormulaSet> {
    let mut set = FormulaSet::new();
    for (target, expr) in pairs {
        if set.insert(target.clone(), expr.clone()).is_some() {
            bail!("duplicate formula for target '{}'", target);
        }
    }
    Ok(set)
}

fn build_backend(config: &PipelineConfig) -> anyhow::Result<Arc<dyn BackendApi>> {
    let backend = HttpBackend::new(config).context("building the HTTP backend")?;
    Ok(Arc::new(backend))
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing(cli.verbose);

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(url) = &cli.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(token) = &cli.api_token {
        config.api_token = Some(token.clone());
    }

    match cli.command {
        Command::Status { order } => cmd_status(&config, order.order).await,
        Command::Config { action } => cmd_config(&config, cli.config.as_deref(), action),
        Command::Models => cmd_models(&config).await,
        Command::Formulas { action } => cmd_formulas(&config, action).await,
        Command::Standardize { action } => cmd_standardize(&config, action).await,
        Command::Cleanup { action } => cmd_cleanup(&config, action).await,
        Command::Match { action } => cmd_match(&config, action).await,
        Command::Price { action } => cmd_price(&config, action).await,
        Command::Finalize { order, yes } => cmd_finalize(&config, order.order, yes).await,
    }
}

async fn cmd_status(config: &PipelineConfig, order_id: i64) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let order = backend.fetch_order(order_id).await?;
    let rows = backend.fetch_rows(order_id).await?;

    println!(
        "Order {} (id {}): {} committed rows, {} inventory items",
        order.order_number,
        order.id,
        rows.len(),
        order.item_count
    );

    let completed = stage::derive_completed_step(&rows);
    let active = stage::initial_active_stage(&rows);
    for s in PipelineStage::ALL {
        let marker = if s.index() <= completed {
            "done"
        } else if s == active {
            "active"
        } else {
            "pending"
        };
        println!("  {:<16} {}", s.label(), marker);
    }

    let cleaned = rows.iter().filter(|r| r.has_cleanup()).count();
    let with_matches = rows.iter().filter(|r| r.has_match_activity()).count();
    let priced = rows.iter().filter(|r| r.effective_price().is_some()).count();
    let finalized = rows.iter().filter(|r| r.is_finalized()).count();
    println!(
        "  cleaned {} / matched {} / priced {} / finalized {} of {} rows",
        cleaned,
        with_matches,
        priced,
        finalized,
        rows.len()
    );
    Ok(())
}

fn cmd_config(
    config: &PipelineConfig,
    explicit_path: Option<&std::path::Path>,
    action: ConfigCommand,
) -> anyhow::Result<()> {
    match action {
        ConfigCommand::Show => {
            let text =
                toml::to_string_pretty(config).context("rendering the configuration")?;
            print!("{}", text);
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let path = match explicit_path {
                Some(p) => p.to_path_buf(),
                None => dirs::config_dir()
                    .map(|d| d.join("mprep").join("config.toml"))
                    .context("no user config directory on this platform; pass --config")?,
            };
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            config.save_to_path(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

async fn cmd_models(config: &PipelineConfig) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let catalog = backend.list_models().await?;
    if catalog.models.is_empty() {
        println!("The backend reports no cleanup models.");
        return Ok(());
    }
    for model in &catalog.models {
        let marker = if model.default { "*" } else { " " };
        println!("{} {:<32} {}", marker, model.id, model.label);
    }
    Ok(())
}

async fn cmd_formulas(config: &PipelineConfig, action: FormulasCommand) -> anyhow::Result<()> {
    match action {
        FormulasCommand::Suggest { order, template } => {
            let backend = build_backend(config)?;
            let summary = backend.fetch_order(order.order).await?;
            if let Some(preview) = &summary.manifest_preview {
                if let Some(hint) = template_hint(preview) {
                    println!(
                        "Saved template '{}' (id {}) matches these headers.",
                        hint.template_name, hint.template_id
                    );
                }
            }
            let flow = StandardizeFlow::new(backend, EventBus::default());
            let suggestions = flow.suggest(order.order, template.as_deref()).await?;
            if suggestions.is_empty() {
                println!("No suggestions returned.");
                return Ok(());
            }
            for s in &suggestions {
                println!("{} = {}", s.target, s.formula);
                if !s.reasoning.is_empty() {
                    println!("    {}", s.reasoning);
                }
            }
            Ok(())
        }
        FormulasCommand::Validate { formulas } => {
            let mut failures = 0usize;
            for (target, expr) in &formulas {
                if standard_column(target).is_none() {
                    println!("{}: unknown target", target);
                    failures += 1;
                    continue;
                }
                match formula::validate(expr) {
                    Ok(()) => println!("{}: ok", target),
                    Err(e) => {
                        println!("{}: {}", target, e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} formulas failed validation", failures, formulas.len());
            }
            Ok(())
        }
    }
}

async fn cmd_standardize(
    config: &PipelineConfig,
    action: StandardizeCommand,
) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let flow = StandardizeFlow::new(Arc::clone(&backend), EventBus::default());

    match action {
        StandardizeCommand::Preview {
            order,
            formulas,
            search,
            limit,
        } => {
            let set = formula_set(&formulas)?;
            let table = flow
                .preview(order.order, &set, search.as_deref(), limit)
                .await?;
            print_preview(&table);
            Ok(())
        }
        StandardizeCommand::Commit {
            order,
            formulas,
            save_template,
            yes,
        } => {
            let set = formula_set(&formulas)?;
            let summary = backend.fetch_order(order.order).await?;
            if summary.row_count > 0 && !yes {
                println!(
                    "Order {} already has {} committed rows.",
                    order.order, summary.row_count
                );
                println!(
                    "Re-committing replaces them and discards: {}",
                    cascade_line(PipelineStage::Standardize)
                );
                if !prompt_yes("Continue?")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let outcome = flow.commit(order.order, &set, save_template, true).await?;
            println!("Created {} rows.", outcome.rows_created);
            if let Some(template_id) = outcome.template_id {
                println!("Saved formula template {}.", template_id);
            }
            Ok(())
        }
        StandardizeCommand::Clear { order, yes } => {
            let summary = backend.fetch_order(order.order).await?;
            if summary.row_count == 0 {
                println!("Order {} has no committed rows.", order.order);
                return Ok(());
            }
            if !yes {
                println!(
                    "Clearing removes {} committed rows and discards: {}",
                    summary.row_count,
                    cascade_line(PipelineStage::Standardize)
                );
                if !prompt_yes("Continue?")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let removed = flow.clear(order.order, true).await?;
            println!("Removed {} rows.", removed);
            Ok(())
        }
    }
}

fn print_preview(table: &PreviewTable) {
    if table.headers.is_empty() {
        println!("No formulas to preview.");
        return;
    }
    println!("{:>5}  {}", "row", table.headers.join(" | "));
    for row in &table.rows {
        let cells: Vec<String> = table
            .headers
            .iter()
            .map(|target| match row.cells.get(target) {
                Some(Ok(value)) => value.clone(),
                Some(Err(message)) => {
                    format!("<error: {}>", message.lines().next().unwrap_or(""))
                }
                None => String::new(),
            })
            .collect();
        println!("{:>5}  {}", row.row_number, cells.join(" | "));
    }
    println!("{} sample rows", table.rows.len());
}

async fn cmd_cleanup(config: &PipelineConfig, action: CleanupCommand) -> anyhow::Result<()> {
    let backend = build_backend(config)?;

    match action {
        CleanupCommand::Run {
            order,
            batch_size,
            concurrency,
            model,
            max_batches,
        } => {
            let events = EventBus::default();
            let store = Arc::new(FileCheckpointStore::new(config.resolved_checkpoint_dir()));
            let params = CleanupParams {
                order_id: order.order,
                batch_size: batch_size.unwrap_or(config.batch_size),
                concurrency: concurrency.unwrap_or_else(|| config.clamped_concurrency()),
                model: model.or_else(|| config.model.clone()),
                max_batches,
            };
            let pool = CleanupPool::new(backend, store, events.clone(), params);
            let handle = pool.handle();

            let mut rx = events.subscribe();
            let printer = tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    match event {
                        PipelineEvent::CleanupStarted {
                            resumed_from,
                            workers,
                            ..
                        } => {
                            if resumed_from > 0 {
                                println!(
                                    "Resuming from row {} with {} workers.",
                                    resumed_from, workers
                                );
                            } else {
                                println!("Starting with {} workers.", workers);
                            }
                        }
                        PipelineEvent::CleanupBatchCompleted {
                            offset,
                            processed,
                            saved,
                            total_rows,
                            elapsed_ms,
                            eta_secs,
                            ..
                        } => {
                            let total = total_rows
                                .map(|t| t.to_string())
                                .unwrap_or_else(|| "?".to_string());
                            let eta = eta_secs
                                .map(|e| format!(", ~{}s left", e))
                                .unwrap_or_default();
                            println!(
                                "  rows {}..: {} processed, {} saved, {} ms ({} total{})",
                                offset, processed, saved, elapsed_ms, total, eta
                            );
                        }
                        _ => {}
                    }
                }
            });

            let pause_handle = handle.clone();
            let ctrlc = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Pausing; in-flight batches will finish...");
                    pause_handle.pause();
                }
            });

            let outcome = pool.run().await;
            ctrlc.abort();
            printer.abort();

            match outcome? {
                RunOutcome::Completed {
                    rows_processed,
                    rows_saved,
                } => {
                    println!(
                        "Cleanup complete: {} rows processed, {} saved.",
                        rows_processed, rows_saved
                    );
                    Ok(())
                }
                RunOutcome::Paused { next_offset, error } => match error {
                    Some(message) => {
                        println!("Paused at row {}; rerun to resume.", next_offset);
                        bail!("cleanup paused by a worker error: {}", message);
                    }
                    None => {
                        println!("Paused at row {}; rerun to resume.", next_offset);
                        Ok(())
                    }
                },
                RunOutcome::Cancelled { rows_cleared } => {
                    println!("Cancelled; {} rows rolled back.", rows_cleared);
                    Ok(())
                }
            }
        }
        CleanupCommand::Status { order } => {
            let status = backend.cleanup_status(order.order).await?;
            println!(
                "{} of {} rows cleaned ({:.1}%){}",
                status.rows_with_ai,
                status.total_rows,
                status.percent(),
                if status.in_progress {
                    ", a run is in progress"
                } else {
                    ""
                }
            );
            let store = FileCheckpointStore::new(config.resolved_checkpoint_dir());
            match store.load(order.order)? {
                Some(checkpoint) => println!(
                    "Local checkpoint: next row {} (saved {})",
                    checkpoint.offset, checkpoint.saved_at
                ),
                None => println!("No local checkpoint."),
            }
            Ok(())
        }
        CleanupCommand::Cancel { order, yes } => {
            if !yes {
                println!(
                    "Cancelling rolls back AI results and discards: {}",
                    cascade_line(PipelineStage::Cleanup)
                );
                if !prompt_yes("Continue?")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let store = Arc::new(FileCheckpointStore::new(config.resolved_checkpoint_dir()));
            let pool = CleanupPool::new(
                backend,
                store,
                EventBus::default(),
                CleanupParams::new(order.order),
            );
            let cleared = pool.cancel().await?;
            println!("Rolled back {} rows.", cleared);
            Ok(())
        }
    }
}

async fn cmd_match(config: &PipelineConfig, action: MatchCommand) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let flow = ReviewFlow::new(
        Arc::clone(&backend),
        EventBus::default(),
        config.confidence_floor(),
    );

    match action {
        MatchCommand::Run { order, no_ai } => {
            let outcome = flow.run_matching(order.order, !no_ai).await?;
            println!(
                "Matched {} / uncertain {} / new {} of {} rows.",
                outcome.matched, outcome.uncertain, outcome.new_product, outcome.rows_processed
            );
            Ok(())
        }
        MatchCommand::Show { order } => {
            let results = flow.results(order.order).await?;
            println!(
                "matched {} / uncertain {} / new {} / pending {}",
                results.summary.matched,
                results.summary.uncertain,
                results.summary.new_product,
                results.summary.pending
            );
            for row in &results.rows {
                println!(
                    "{:>5}  {:<40} {:<9} {:<14} {}",
                    row.row_number,
                    truncate(row.effective_title(), 40),
                    status_label(row.match_status),
                    decision_label(row.ai_match_decision),
                    describe_match(row)
                );
            }
            Ok(())
        }
        MatchCommand::Review {
            order,
            accept,
            accept_update,
            reject,
            accept_all,
            yes,
        } => {
            let results = flow.results(order.order).await?;
            let mut session = ReviewSession::new();

            for (row_id, product) in accept {
                let product_id = explicit_or_top(&results.rows, row_id, product)?;
                session.set(row_id, Decision::Accept { product_id });
            }
            for (row_id, product) in accept_update {
                let product_id = explicit_or_top(&results.rows, row_id, product)?;
                session.set(row_id, Decision::AcceptUpdate { product_id });
            }
            for row_id in reject {
                session.set(row_id, Decision::RejectNew);
            }
            if accept_all {
                let added = session.accept_all(&results.rows);
                println!("Defaulted {} rows to their top candidate.", added);
            }

            println!(
                "Submitting decisions for {} rows ({} explicit).",
                results.rows.len(),
                session.decided_count()
            );
            if !yes && !prompt_yes("Submit?")? {
                println!("Aborted.");
                return Ok(());
            }
            let outcome = flow.submit(order.order, &mut session).await?;
            println!(
                "Confirmed {}, rejected {}, updated {}.",
                outcome.confirmed, outcome.rejected, outcome.updated
            );
            Ok(())
        }
        MatchCommand::Undo { order, yes } => {
            if !yes {
                println!(
                    "Undoing matching discards: {}",
                    cascade_line(PipelineStage::Matching)
                );
                if !prompt_yes("Continue?")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let affected = flow.undo_matching(order.order, true).await?;
            println!("Cleared matching on {} rows.", affected);
            Ok(())
        }
    }
}

fn explicit_or_top(
    rows: &[ManifestRow],
    row_id: i64,
    product: Option<i64>,
) -> anyhow::Result<i64> {
    if let Some(product_id) = product {
        return Ok(product_id);
    }
    let row = rows
        .iter()
        .find(|r| r.id == row_id)
        .with_context(|| format!("row {} is not in this order's match results", row_id))?;
    let top = top_candidate(&row.match_candidates)
        .with_context(|| format!("row {} has no candidates; pass ROW=PRODUCT", row_id))?;
    Ok(top.product_id)
}

fn status_label(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Pending => "pending",
        MatchStatus::Matched => "matched",
        MatchStatus::New => "new",
    }
}

fn decision_label(decision: AiMatchDecision) -> &'static str {
    match decision {
        AiMatchDecision::PendingReview => "pending_review",
        AiMatchDecision::Confirmed => "confirmed",
        AiMatchDecision::Rejected => "rejected",
        AiMatchDecision::Uncertain => "uncertain",
        AiMatchDecision::NewProduct => "new_product",
    }
}

fn describe_match(row: &ManifestRow) -> String {
    if let Some(product_id) = row.matched_product_id {
        return format!("-> {} ({})", row.matched_product_title, product_id);
    }
    match top_candidate(&row.match_candidates) {
        Some(top) => format!(
            "top: {} ({}, {:.2})",
            top.product_title, top.product_id, top.score
        ),
        None => String::new(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

async fn cmd_price(config: &PipelineConfig, action: PriceCommand) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let events = EventBus::default();

    match action {
        PriceCommand::Percent { order, pct, target } => {
            let flow = PricingFlow::new(backend, events);
            let outcome = flow
                .percent_of_retail(order.order, &target.resolve(), pct)
                .await?;
            println!(
                "Updated {} rows; skipped {} without a parsable retail value.",
                outcome.updated, outcome.skipped
            );
            Ok(())
        }
        PriceCommand::Set { order, row, price } => {
            let autosave = PriceAutosave::new(backend, events, order.order);
            autosave.set_price(row, Some(price)).await;
            let updated = autosave.flush_now().await?;
            println!("Updated {} row.", updated);
            Ok(())
        }
        PriceCommand::Clear { order, target, yes } => {
            if !yes {
                println!("Clearing discards draft prices on the targeted rows.");
                if !prompt_yes("Continue?")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            let flow = PricingFlow::new(backend, events);
            let cleared = flow.clear(order.order, &target.resolve(), true).await?;
            println!("Cleared {} rows.", cleared);
            Ok(())
        }
    }
}

async fn cmd_finalize(config: &PipelineConfig, order_id: i64, yes: bool) -> anyhow::Result<()> {
    let backend = build_backend(config)?;
    let rows = backend.fetch_rows(order_id).await?;
    let remaining = rows.iter().filter(|r| !r.is_finalized()).count();
    if remaining == 0 {
        println!("Every row is already finalized.");
        return Ok(());
    }
    if !yes {
        println!(
            "Finalizing freezes content and price on {} rows; bulk pricing will skip them afterwards.",
            remaining
        );
        if !prompt_yes("Continue?")? {
            println!("Aborted.");
            return Ok(());
        }
    }
    let flow = PricingFlow::new(backend, EventBus::default());
    let outcome = flow.finalize(order_id, &PriceTarget::All, true).await?;
    println!("Finalized {} rows.", outcome.rows_finalized);
    Ok(())
}
