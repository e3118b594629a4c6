//! History migration tool: backfill missing group names and re-sanitize
//! message text, writing in batches.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tg_forward::config::{resolve_config_path, Config};
use tg_forward::history::HistoryStore;
use tg_forward::models::sanitize_content;

/// Records per flush.
const BATCH_SIZE: u64 = 1000;

#[derive(Parser, Debug)]
#[command(name = "tg-forward-migrate")]
#[command(author, version, about = "Backfill and sanitize stored chat history")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = resolve_config_path(args.config.clone());
    let config = Config::load(&config_path)?;

    let history = HistoryStore::open(&config.queue.path.join("chat_history"))?;

    let group_names: HashMap<i64, String> = config
        .telegram
        .chat_ids
        .iter()
        .map(|id| (*id, format!("group({id})")))
        .collect();

    let mut total: u64 = 0;
    let mut updated: u64 = 0;

    for (key, mut record) in history.all_records()? {
        total += 1;

        let mut needs_update = false;

        if record.group_name.is_empty() {
            if let Some(name) = group_names.get(&record.chat_id) {
                record.group_name = name.clone();
                needs_update = true;
            }
        }

        let sanitized = sanitize_content(&record.text);
        if sanitized != record.text {
            record.text = sanitized;
            needs_update = true;
        }

        if needs_update {
            updated += 1;

            if !args.dry_run {
                history.rewrite(&key, &record)?;

                if updated % BATCH_SIZE == 0 {
                    history.flush()?;
                    info!(total, updated, "batch written");
                }
            }
        }
    }

    if args.dry_run {
        info!(total, updated, "dry run complete, no changes written");
    } else {
        history.flush()?;
        info!(total, updated, "migration complete");
    }

    history.close()?;
    Ok(())
}
