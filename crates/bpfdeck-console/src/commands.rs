use crate::config::Config;
use crate::state::{write_dump, DUMP_DIR};
use anyhow::{Context, Result};
use bpfdeck_client::{HttpControlApi, LifecycleController, LifecycleOutcome};
use bpfdeck_core::{AttachInput, StreamKind};
use bpfdeck_storage::{HistoryStore, StreamStore};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Interactive dashboard (default).
    Console,
    /// List available and loaded programs.
    Programs {
        /// Case-insensitive substring filter over available programs.
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Load {
        program: Option<String>,
        #[arg(long)]
        pin_path: Option<String>,
        #[arg(long = "type")]
        prog_type: Option<String>,
    },
    /// Unload by pin path, or by program name.
    Unload {
        program: Option<String>,
        #[arg(long)]
        pin_path: Option<String>,
    },
    /// Attach a pinned program; missing values are derived from --program.
    Attach {
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        pin_path: Option<String>,
        #[arg(long)]
        attach_type: Option<String>,
        #[arg(long)]
        target: Option<String>,
    },
    Detach {
        #[arg(long)]
        pin_path: Option<String>,
        #[arg(long)]
        attach_type: Option<String>,
        #[arg(long)]
        target: Option<String>,
    },
    /// Print the locally persisted history of a stream.
    History {
        stream: StreamKind,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Save the server-side dump of a stream.
    Dump {
        stream: StreamKind,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    #[command(subcommand)]
    Userspace(UserspaceCommand),
}

#[derive(Debug, Clone, Subcommand)]
pub enum UserspaceCommand {
    List,
    Status,
    Start {
        program: Option<String>,
        #[arg(long, default_value = "")]
        args: String,
    },
    Stop,
}

pub async fn run(command: Command, config: &Config) -> Result<()> {
    let api = Arc::new(
        HttpControlApi::new(config.server.clone(), config.request_timeout)
            .context("failed to build HTTP client")?,
    );
    let controller = LifecycleController::new(api.clone(), config.pin_root.clone());

    match command {
        Command::Console => unreachable_console(),
        Command::Programs { filter, json } => {
            let inventory = controller.refresh().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inventory)?);
                return Ok(());
            }
            println!("Available:");
            for name in inventory.filter_programs(filter.as_deref().unwrap_or_default()) {
                println!("  {name}");
            }
            println!("Loaded:");
            for program in &inventory.loaded {
                println!(
                    "  {:>6}  {:<24} {:<14} {}",
                    program.id,
                    program.name,
                    program.prog_type,
                    program.pinned_label()
                );
            }
            Ok(())
        }
        Command::Load {
            program,
            pin_path,
            prog_type,
        } => {
            let outcome = controller
                .load(
                    program.as_deref(),
                    pin_path.as_deref(),
                    prog_type.as_deref(),
                )
                .await?;
            report(outcome);
            Ok(())
        }
        Command::Unload { program, pin_path } => {
            let outcome = controller
                .unload(program.as_deref(), pin_path.as_deref())
                .await?;
            report(outcome);
            Ok(())
        }
        Command::Attach {
            program,
            pin_path,
            attach_type,
            target,
        } => {
            let outcome = controller
                .attach(AttachInput {
                    pin_path: pin_path.as_deref(),
                    attach_type: attach_type.as_deref(),
                    target: target.as_deref(),
                    program: program.as_deref(),
                })
                .await?;
            report(outcome);
            Ok(())
        }
        Command::Detach {
            pin_path,
            attach_type,
            target,
        } => {
            let outcome = controller
                .detach(
                    pin_path.as_deref(),
                    attach_type.as_deref(),
                    target.as_deref(),
                )
                .await?;
            report(outcome);
            Ok(())
        }
        Command::History { stream, limit } => {
            let path = config.history_db_path();
            let store = HistoryStore::open(&path, api.base_url())
                .with_context(|| format!("failed to open {}", path.display()))?;
            let mut entries = store.get(stream.storage_key());
            if stream.newest_first() {
                entries.reverse();
            }
            let limit = limit.unwrap_or(entries.len());
            for line in entries.iter().take(limit) {
                println!("{line}");
            }
            Ok(())
        }
        Command::Dump { stream, output_dir } => {
            let dir = output_dir.unwrap_or_else(|| config.state_dir.join(DUMP_DIR));
            let path = write_dump(&controller, stream, &dir)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Userspace(action) => run_userspace(action, &controller).await,
    }
}

async fn run_userspace(action: UserspaceCommand, controller: &LifecycleController) -> Result<()> {
    match action {
        UserspaceCommand::List => {
            for program in controller.userspace_programs().await? {
                println!("{program}");
            }
        }
        UserspaceCommand::Status => {
            let status = controller.userspace_status().await?;
            println!("{}", if status.running { "running" } else { "stopped" });
        }
        UserspaceCommand::Start { program, args } => {
            println!(
                "{}",
                controller.start_userspace(program.as_deref(), &args).await?
            );
        }
        UserspaceCommand::Stop => println!("{}", controller.stop_userspace().await?),
    }
    Ok(())
}

fn report(outcome: LifecycleOutcome) {
    println!("{}", outcome.message);
    if let Err(err) = outcome.inventory {
        warn!(action = %outcome.action, "inventory_refresh_failed: {err}");
        eprintln!("warning: could not refresh programs: {err}");
    }
}

fn unreachable_console() -> Result<()> {
    anyhow::bail!("the console runs in the terminal UI, not as a one-shot command")
}
