//! Fetch subcommand - download comments for every input post

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use pageline_comments::RunSummary;
use pageline_core::SharedProgress;
use pageline_core::progress::{fmt_duration, fmt_num};

use crate::config::{Config, secs};

#[derive(Args, Debug, Default)]
pub struct FetchArgs {
    /// Input JSON with {"posts": [{"post_id", "comment_count"}]}
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output directory (group files go to <dir>/batches)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Error log file
    #[arg(long)]
    pub error_log: Option<PathBuf>,

    /// Posts per group file
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Seconds between API requests
    #[arg(long)]
    pub delay: Option<f64>,

    /// Seconds between groups
    #[arg(long)]
    pub batch_delay: Option<f64>,

    /// Attempts per page
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base backoff in seconds
    #[arg(long)]
    pub backoff_base: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Clear checkpoint and start from scratch
    #[arg(long)]
    pub reset: bool,

    /// Replace existing group files
    #[arg(long)]
    pub overwrite: bool,
}

/// Merge config file values with flag overrides into the run configuration.
pub fn resolve(args: FetchArgs, config: &Config) -> Result<pageline_comments::Config> {
    let cfg = pageline_comments::Config {
        input: args.input.unwrap_or_else(|| config.paths.input.clone()),
        output_dir: args
            .output_dir
            .unwrap_or_else(|| config.paths.output_dir.clone()),
        checkpoint: args
            .checkpoint
            .unwrap_or_else(|| config.paths.checkpoint.clone()),
        error_log: args
            .error_log
            .unwrap_or_else(|| config.paths.error_log.clone()),
        batch_size: args.batch_size.unwrap_or(config.pacing.batch_size),
        delay: secs(args.delay.unwrap_or(config.pacing.delay_secs), "delay")?,
        batch_delay: secs(
            args.batch_delay.unwrap_or(config.pacing.batch_delay_secs),
            "batch delay",
        )?,
        max_retries: args.max_retries.unwrap_or(config.retry.max_retries),
        backoff_base: secs(
            args.backoff_base.unwrap_or(config.retry.backoff_base_secs),
            "backoff base",
        )?,
        timeout: secs(args.timeout.unwrap_or(config.api.timeout_secs), "timeout")?,
        base_url: args.base_url.unwrap_or_else(|| config.api.base_url.clone()),
        user_agent: config.api.user_agent.clone(),
        reset: args.reset,
        overwrite: args.overwrite,
    };
    cfg.validate()?;
    Ok(cfg)
}

pub fn run(args: FetchArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let cfg = resolve(args, config)?;

    if !cfg.input.exists() {
        log::error!("Input file not found: {}", cfg.input.display());
        return Ok(ExitCode::from(1));
    }

    pageline_core::install_signal_handlers().context("Failed to install signal handlers")?;

    log::info!(
        "Starting fetch: batch_size={}, delay={:.1}s, batch_delay={:.1}s, max_retries={}",
        cfg.batch_size,
        cfg.delay.as_secs_f64(),
        cfg.batch_delay.as_secs_f64(),
        cfg.max_retries
    );

    let summary = pageline_comments::run(&cfg, progress.clone())?;

    if progress.is_tty() {
        eprintln!("{}", format_summary(&summary, &cfg));
    } else {
        summary.log();
    }
    if summary.failed > 0 {
        log::warn!(
            "{} posts gave up; see {}",
            summary.failed,
            cfg.error_log.display()
        );
    }

    if summary.interrupted {
        log::warn!("Interrupted; rerun the same command to resume");
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn format_summary(summary: &RunSummary, cfg: &pageline_comments::Config) -> String {
    let title = if summary.interrupted {
        "Fetch interrupted"
    } else {
        "Fetch complete"
    };
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title)
                .fg(Color::Cyan)
                .add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        Cell::new("Posts processed"),
        Cell::new(fmt_num(summary.processed as u64)).fg(Color::Green),
    ]);
    table.add_row(vec!["ok", &fmt_num(summary.ok as u64)]);
    table.add_row(vec!["not found", &fmt_num(summary.not_found as u64)]);
    let failed = Cell::new(fmt_num(summary.failed as u64));
    table.add_row(vec![
        Cell::new("failed"),
        if summary.failed > 0 {
            failed.fg(Color::Red)
        } else {
            failed
        },
    ]);
    table.add_row(vec!["Comments (this run)", &fmt_num(summary.records_fetched)]);
    table.add_row(vec!["Comments (total)", &fmt_num(summary.total_records)]);
    table.add_row(vec![
        "Groups written",
        &format!("{} (next {})", summary.groups_written, summary.next_sequence),
    ]);
    table.add_row(vec!["Elapsed", &fmt_duration(summary.elapsed)]);
    table.add_row(vec!["Output", &cfg.batch_dir().display().to_string()]);
    table.add_row(vec!["Checkpoint", &cfg.checkpoint.display().to_string()]);

    format!("\n{table}")
}
