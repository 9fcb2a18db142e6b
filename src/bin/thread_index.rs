use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use threadline::config::ThreadingConfig;
use threadline::threading::overrides::OverrideKind;
use threadline::threading::{OverrideStore, ThreadIndexRegistry};

#[derive(Parser, Debug)]
#[command(name = "thread_index", about = "Inspect or reset an account's thread index")]
struct Args {
    /// Account whose index to open (case insensitive).
    #[arg(long)]
    account: String,

    /// Thread store directory; defaults to THREAD_STORE_BASE_PATH.
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print message, thread and folder counts.
    Stats,
    /// Print the thread id of a message and the other members of its thread.
    Lookup {
        /// Message-ID, with or without angle brackets.
        message_id: String,
    },
    /// List folder sweep watermarks.
    Folders,
    /// List recorded cut and copy overrides.
    Overrides,
    /// Drop every thread id and watermark. Overrides are kept.
    Reset {
        /// Required to actually reset.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let base_path = args
        .store
        .unwrap_or_else(|| ThreadingConfig::from_env().store_base_path);
    let registry = ThreadIndexRegistry::new(base_path);
    let mut out = io::stdout().lock();

    if let Command::Overrides = args.command {
        let ledger = OverrideStore::open(registry.overrides_path(&args.account)?)?;
        for record in ledger.records() {
            let kind = match record.kind {
                OverrideKind::Cut => "cut",
                OverrideKind::Copy => "copy",
            };
            writeln!(out, "{kind}\t{}\t{}", record.child, record.parent)?;
        }
        return Ok(());
    }

    let index = registry.get(&args.account).await?;

    match args.command {
        Command::Stats => {
            let stats = index.stats().await?;
            writeln!(out, "index:          {}", index.path().display())?;
            writeln!(out, "messages:       {}", stats.message_count)?;
            writeln!(out, "threads:        {}", stats.thread_count)?;
            writeln!(out, "last thread id: {}", stats.last_thread_id)?;
            writeln!(out, "folders:        {}", stats.folder_count)?;
        }
        Command::Lookup { message_id } => {
            let Some(normalized) = threadline::threading::references::normalize_message_id(&message_id)
            else {
                writeln!(io::stderr(), "error: '{message_id}' is not a usable message id")?;
                std::process::exit(1);
            };
            match index.thread_id_for(&normalized).await? {
                Some(thread_id) => {
                    writeln!(out, "thread {thread_id}")?;
                    for member in index.message_ids_for(thread_id).await? {
                        writeln!(out, "  {member}")?;
                    }
                }
                None => {
                    writeln!(io::stderr(), "error: '{normalized}' is not indexed")?;
                    std::process::exit(1);
                }
            }
        }
        Command::Folders => {
            for (uri, updated_at) in index.folder_timestamps().await? {
                writeln!(out, "{}\t{uri}", updated_at.to_rfc3339())?;
            }
        }
        Command::Reset { yes } => {
            if !yes {
                writeln!(
                    io::stderr(),
                    "error: refusing to reset {} without --yes",
                    args.account
                )?;
                std::process::exit(1);
            }
            index.reset().await?;
            writeln!(out, "reset thread index for {}", args.account)?;
        }
        Command::Overrides => {}
    }

    registry.close_all().await;
    Ok(())
}
