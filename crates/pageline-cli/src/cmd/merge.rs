//! Merge subcommand - consolidate group files into one document

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use pageline_comments::merge::{merge_groups, write_merged};
use pageline_core::progress::fmt_num;

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct MergeArgs {
    /// Output directory holding batches/
    #[arg(short = 'd', long)]
    pub output_dir: Option<PathBuf>,

    /// Merged file path (default: <output-dir>/all_comments.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: MergeArgs, config: &Config) -> Result<()> {
    let layout = pageline_comments::Config {
        output_dir: args
            .output_dir
            .unwrap_or_else(|| config.paths.output_dir.clone()),
        ..pageline_comments::Config::default()
    };
    let batch_dir = layout.batch_dir();
    let output = args.output.unwrap_or_else(|| layout.merged_path());

    let Some((doc, files)) = merge_groups(&batch_dir)? else {
        log::warn!("No group files found in {}", batch_dir.display());
        return Ok(());
    };
    log::info!("Found {files} group files");

    write_merged(&output, &doc)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Posts").fg(Color::Cyan),
        ]);
    for (status, count) in &doc.status_summary {
        table.add_row(vec![status.clone(), fmt_num(*count as u64)]);
    }
    eprintln!("\n{table}");
    eprintln!(
        "Merged {} posts with {} comments -> {}",
        fmt_num(doc.total_posts as u64),
        fmt_num(doc.total_comments),
        output.display()
    );
    Ok(())
}
