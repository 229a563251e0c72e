mod commands;
mod config;
mod state;
mod theme;
mod ui;

use crate::commands::Command;
use crate::config::{Config, GlobalArgs};
use crate::state::App;
use anyhow::{Context, Result};
use bpfdeck_client::HttpControlApi;
use bpfdeck_storage::HistoryStore;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::OpenOptions;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const TICK_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 64;
const REDRAW_INTERVAL_MS: u64 = 250;

#[derive(Debug, Parser)]
#[command(
    name = "bpfdeck",
    version,
    about = "Load, attach and watch eBPF programs through a control API"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogTarget {
    File,
    Stderr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_args(&cli.global);

    match cli.command.unwrap_or(Command::Console) {
        Command::Console => {
            init_logging(&config, LogTarget::File);
            run_console(config).await
        }
        command => {
            init_logging(&config, LogTarget::Stderr);
            commands::run(command, &config).await
        }
    }
}

/// The dashboard owns the terminal, so its logs go to a file under the state dir.
fn init_logging(config: &Config, target: LogTarget) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()));
    let writer = match target {
        LogTarget::Stderr => BoxMakeWriter::new(io::stderr),
        LogTarget::File => match open_log_file(config) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(err) => {
                eprintln!("log_file_error: {err}");
                BoxMakeWriter::new(io::sink)
            }
        },
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(target == LogTarget::Stderr)
        .with_writer(writer)
        .try_init();
}

fn open_log_file(config: &Config) -> io::Result<std::fs::File> {
    std::fs::create_dir_all(&config.state_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
}

async fn run_console(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;
    let api = Arc::new(
        HttpControlApi::new(config.server.clone(), config.request_timeout)
            .context("failed to build HTTP client")?,
    );
    let db_path = config.history_db_path();
    let store = Arc::new(
        HistoryStore::open(&db_path, api.base_url())
            .with_context(|| format!("failed to open {}", db_path.display()))?,
    );
    info!(server = %config.server, db = %db_path.display(), "console_starting");

    let (tick_tx, mut tick_rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut app = App::new(config, api, store, tick_tx, event_tx);
    app.bootstrap();

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &mut tick_rx, &mut event_rx).await;
    restore_terminal(&mut terminal)?;
    info!("console_stopped");
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    ticks: &mut mpsc::Receiver<bpfdeck_client::PollTick>,
    app_events: &mut mpsc::Receiver<state::AppEvent>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut redraw = tokio::time::interval(Duration::from_millis(REDRAW_INTERVAL_MS));

    loop {
        app.prune_toasts(Instant::now());
        terminal.draw(|frame| ui::render(frame, app))?;
        if app.should_quit {
            break;
        }

        tokio::select! {
            _ = redraw.tick() => {}
            Some(tick) = ticks.recv() => {
                app.apply_tick(tick);
            }
            Some(event) = app_events.recv() => {
                app.apply_event(event);
            }
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key)))
                    if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) =>
                {
                    app.handle_key(key);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
        }
    }

    app.collector.stop();
    app.userspace.stop();
    Ok(())
}
