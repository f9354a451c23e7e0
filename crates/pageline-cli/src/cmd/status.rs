//! Status subcommand - report checkpoint and output state

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use pageline_comments::batch::{BatchWriter, PendingJournal, starting_sequence};
use pageline_comments::input::load_work_items;
use pageline_comments::runner::remaining_items;
use pageline_comments::CheckpointStore;
use pageline_core::progress::fmt_num;

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Input file to compare against the checkpoint
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output directory holding batches/
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Posts per group, for the next group number
    #[arg(short, long)]
    pub batch_size: Option<usize>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let input = args.input.unwrap_or_else(|| config.paths.input.clone());
    let layout = pageline_comments::Config {
        output_dir: args
            .output_dir
            .unwrap_or_else(|| config.paths.output_dir.clone()),
        ..pageline_comments::Config::default()
    };
    let checkpoint = args
        .checkpoint
        .unwrap_or_else(|| config.paths.checkpoint.clone());
    let batch_size = args.batch_size.unwrap_or(config.pacing.batch_size);

    let state = CheckpointStore::new(&checkpoint).load()?;
    let groups = BatchWriter::new(layout.batch_dir(), false).list()?;
    let pending = PendingJournal::new(layout.pending_path()).load()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Completed posts".to_string(),
        fmt_num(state.completed_count() as u64),
    ]);
    table.add_row(vec![
        "Comments downloaded".to_string(),
        fmt_num(state.total_records),
    ]);
    table.add_row(vec![
        "Last updated".to_string(),
        state
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
    ]);
    table.add_row(vec!["Group files".to_string(), groups.len().to_string()]);
    table.add_row(vec![
        "Next group".to_string(),
        starting_sequence(state.completed_count(), batch_size.max(1)).to_string(),
    ]);
    table.add_row(vec![
        "Pending journal".to_string(),
        match &pending {
            Some(p) => format!("group {} ({} posts)", p.sequence, p.outcomes.len()),
            None => "none".to_string(),
        },
    ]);

    if input.exists() {
        let items = load_work_items(&input)?;
        table.add_row(vec!["Input posts".to_string(), fmt_num(items.len() as u64)]);
        table.add_row(vec![
            "Remaining".to_string(),
            fmt_num(remaining_items(&items, &state).len() as u64),
        ]);
    } else {
        log::warn!("Input file not found: {}", input.display());
    }

    eprintln!("\n{table}");
    Ok(())
}
