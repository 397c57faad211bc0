//! Misso CLI
//!
//! Follows one operator's procedure sessions: history from the backend,
//! the in-progress session from the push stream.

mod logging;
mod paths;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use console::{style, Term};
use misso_protocol::SyncPhase;
use misso_sync::{HttpSnapshotFetcher, SessionStateStore, StoreOptions, SyncConfig, SyncView};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::paths::DataPaths;

#[derive(Parser, Debug)]
#[command(
    name = "misso",
    about = "Follow live and historical procedure sessions",
    version
)]
struct Cli {
    /// Data directory (default: ~/.misso)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Stream URL (default: derived from the base URL)
    #[arg(long, global = true)]
    stream_url: Option<String>,

    /// Operator to follow instead of the one reported by the backend
    #[arg(long, global = true)]
    operator: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow sessions and redraw whenever they change (Ctrl-C to stop)
    Watch {
        /// Print each view as a JSON line instead of redrawing
        #[arg(long)]
        json: bool,
    },
    /// Print the operator's recorded sessions
    History {
        #[arg(long)]
        json: bool,
    },
    /// Upload a procedure JSON file, then print the refreshed history
    Upload { file: PathBuf },
    /// Print the resolved configuration
    Config,
    /// Generate shell completions
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "misso", &mut std::io::stdout());
        return Ok(());
    }

    let paths = DataPaths::resolve(cli.data_dir.as_deref())?;
    let _logging = logging::init_logging(&paths)?;
    let config = resolve_config(&cli, &paths)?;

    match cli.command {
        Command::Watch { json } => watch(&config, json).await,
        Command::History { json } => history(&config, json).await,
        Command::Upload { file } => upload(&config, &file).await,
        Command::Config => print_config(&config, &paths),
        Command::Completions { .. } => Ok(()),
    }
}

/// Flags > `MISSO_*` env > config file > defaults.
fn resolve_config(cli: &Cli, paths: &DataPaths) -> Result<SyncConfig> {
    let config_path = paths.config_path();
    let mut config = SyncConfig::load(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    config.apply_env()?;

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(stream_url) = &cli.stream_url {
        config.stream_url = Some(stream_url.clone());
    }
    if let Some(operator) = &cli.operator {
        config.operator = Some(operator.clone());
    }
    Ok(config)
}

async fn resolve_operator(config: &SyncConfig, fetcher: &HttpSnapshotFetcher) -> Result<String> {
    if let Some(operator) = config.operator.as_deref().map(str::trim) {
        if !operator.is_empty() {
            return Ok(operator.to_string());
        }
    }

    let remote = fetcher
        .fetch_config()
        .await
        .context("asking the backend which operator to follow")?;
    let operator = remote.surgeon_name.trim().to_string();
    if operator.is_empty() {
        bail!("backend reported no operator; pass --operator");
    }
    info!(
        component = "cli",
        event = "cli.operator.resolved",
        operator = %operator,
        "Operator resolved from backend"
    );
    Ok(operator)
}

async fn watch(config: &SyncConfig, json: bool) -> Result<()> {
    let fetcher = HttpSnapshotFetcher::from_config(config)?;
    let operator = resolve_operator(config, &fetcher).await?;
    let store = SessionStateStore::spawn(fetcher, StoreOptions::from_config(config)?);

    let mut changes = store.subscribe();
    store.init(operator.as_str()).await?;
    let term = Term::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.recv() => match changed {
                Ok(view) => show(&term, &view, json)?,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        component = "cli",
                        event = "cli.watch.lagged",
                        skipped,
                        "Skipped intermediate views"
                    );
                    show(&term, &store.view(), json)?;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    store.dispose().await;
    Ok(())
}

fn show(term: &Term, view: &SyncView, json: bool) -> Result<()> {
    if json {
        term.write_line(&serde_json::to_string(view)?)?;
    } else {
        term.clear_screen()?;
        term.write_str(&render::view_block(view))?;
    }
    Ok(())
}

/// One settled snapshot through the store, without the stream.
async fn snapshot(config: &SyncConfig, fetcher: HttpSnapshotFetcher) -> Result<Arc<SyncView>> {
    let operator = resolve_operator(config, &fetcher).await?;
    let store = SessionStateStore::spawn(
        fetcher,
        StoreOptions {
            stream: None,
            reconnect_delay: config.reconnect_delay(),
        },
    );
    store.init(operator).await?;
    let view = store
        .wait_for(|v| matches!(v.phase, SyncPhase::Idle | SyncPhase::Live))
        .await;
    store.dispose().await;

    let view = view?;
    if let Some(error) = &view.last_error {
        bail!("fetching history failed: {error}");
    }
    Ok(view)
}

fn print_sessions(view: &SyncView, json: bool) -> Result<()> {
    let sessions: Vec<_> = view.working_set().cloned().collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
    } else if sessions.is_empty() {
        println!("{}", style("No sessions recorded").dim());
    } else {
        println!("{}", render::session_table(&sessions));
    }
    Ok(())
}

async fn history(config: &SyncConfig, json: bool) -> Result<()> {
    let fetcher = HttpSnapshotFetcher::from_config(config)?;
    let view = snapshot(config, fetcher).await?;
    print_sessions(&view, json)
}

async fn upload(config: &SyncConfig, file: &Path) -> Result<()> {
    let fetcher = HttpSnapshotFetcher::from_config(config)?;
    fetcher
        .upload_json(file)
        .await
        .with_context(|| format!("uploading {}", file.display()))?;
    println!("{} {}", style("Uploaded").green(), file.display());

    let view = snapshot(config, fetcher).await?;
    print_sessions(&view, false)
}

fn print_config(config: &SyncConfig, paths: &DataPaths) -> Result<()> {
    println!("{} {}", style("# data dir:").dim(), paths.root().display());
    println!(
        "{} {}",
        style("# stream:").dim(),
        config.resolved_stream_url()?
    );
    print!("{}", config.to_toml_string()?);
    Ok(())
}
