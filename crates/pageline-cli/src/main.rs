//! pageline - resumable comment fetcher for community posts
//!
//! Walks each post's paginated comment listing, checkpoints after every
//! post, and writes results in fixed-size group files.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "pageline")]
#[command(about = "Resumable bulk fetcher for community post comments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./pageline.toml or ~/.config/pageline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Download comments for every post in the input file
    Fetch(cmd::fetch::FetchArgs),
    /// Merge group files into a single document
    Merge(cmd::merge::MergeArgs),
    /// Show checkpoint and output state
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let progress = Arc::new(pageline_core::ProgressContext::new());

    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    pageline_core::init_logging(pageline_core::Verbosity::for_output(is_tty, cli.debug), multi)?;

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Fetch(args) => cmd::fetch::run(args, &config, &progress),
        Command::Merge(args) => cmd::merge::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["Input", &config.paths.input.display().to_string()]);
            table.add_row(vec![
                "Output directory",
                &config.paths.output_dir.display().to_string(),
            ]);
            table.add_row(vec![
                "Checkpoint",
                &config.paths.checkpoint.display().to_string(),
            ]);
            table.add_row(vec!["Error log", &config.paths.error_log.display().to_string()]);
            table.add_row(vec!["Base URL", &config.api.base_url]);
            table.add_row(vec!["User agent", &config.api.user_agent]);
            table.add_row(vec!["Timeout", &format!("{}s", config.api.timeout_secs)]);
            table.add_row(vec!["Batch size", &config.pacing.batch_size.to_string()]);
            table.add_row(vec!["Delay", &format!("{}s", config.pacing.delay_secs)]);
            table.add_row(vec![
                "Batch delay",
                &format!("{}s", config.pacing.batch_delay_secs),
            ]);
            table.add_row(vec!["Max retries", &config.retry.max_retries.to_string()]);
            table.add_row(vec![
                "Backoff base",
                &format!("{}s", config.retry.backoff_base_secs),
            ]);

            eprintln!("\n{table}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
