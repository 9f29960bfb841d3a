use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use geoworker::config::{Config, ParamMap};
use geoworker::error::Result;
use geoworker::history::ExpressionHistory;
use geoworker::params::chain_overrides;
use geoworker::worker::{TaskFamily, TaskManager};

/// Environment variable naming a directory for rolling log files.
const LOG_DIR_ENV: &str = "GEOWORKER_LOG_DIR";

/// Geoworker - background remote-sensing tasks
#[derive(Parser)]
#[command(name = "geoworker")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (default: $GEOWORKER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Band-math expression history file (default: $GEOWORKER_HISTORY)
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run task families in order, feeding each one's outputs to the next
    Run {
        /// Task families, e.g. `feature_extraction classification`
        #[arg(required = true)]
        families: Vec<String>,

        /// Parameter override `key=json` for the first family, or
        /// `family:key=json` for a specific one
        #[arg(long = "set", value_name = "KEY=JSON")]
        set: Vec<String>,
    },

    /// List task families and their default parameters
    Families,

    /// List the band-math expression history
    History {
        /// Append an expression before listing
        #[arg(long)]
        add: Option<String>,
    },
}

/// One `--set` argument.
struct Override {
    family: Option<TaskFamily>,
    key: String,
    value: Value,
}

impl Override {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        let (target, value) = raw
            .split_once('=')
            .with_context(|| format!("override '{raw}' must look like key=value"))?;
        let (family, key) = match target.split_once(':') {
            Some((family, key)) => (Some(family.parse::<TaskFamily>()?), key),
            None => (None, target),
        };
        // Anything that is not valid JSON is taken as a plain string.
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        Ok(Self {
            family,
            key: key.trim().to_string(),
            value,
        })
    }

    fn applies_to(&self, family: TaskFamily, first: bool) -> bool {
        match self.family {
            Some(target) => target == family,
            None => first,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries results; logs go to stderr and optionally a log directory.
    let (file_layer, _log_guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "geoworker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(path) = cli.history {
        config.set_history_path(path);
    }

    match cli.command {
        Commands::Run { families, set } => {
            let families = parse_families(&families)?;
            let overrides = set
                .iter()
                .map(|raw| Override::parse(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let manager = TaskManager::new(config);
            run_chain(&manager, &families, &overrides).await?;
        }
        Commands::Families => {
            for family in TaskFamily::ALL {
                let defaults = Value::Object(config.defaults(family));
                println!("{family} ({})", family.title());
                println!("  defaults: {defaults}");
            }
        }
        Commands::History { add } => show_history(config.history_path(), add.as_deref())?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    Ok(config)
}

fn parse_families(names: &[String]) -> Result<Vec<TaskFamily>> {
    let families = names
        .iter()
        .map(|name| name.parse::<TaskFamily>())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(families)
}

fn show_history(path: &Path, add: Option<&str>) -> Result<()> {
    let history = ExpressionHistory::new(path);
    if let Some(expression) = add {
        if !history.push(expression)? {
            tracing::info!("'{expression}' is already the latest history entry");
        }
    }
    tracing::debug!(path = %history.path().display(), "Reading expression history");
    for (i, expression) in history.load()?.iter().enumerate() {
        println!("{:>3}  {expression}", i + 1);
    }
    Ok(())
}

/// Run `families` one after another. Stops at the first task that does not
/// succeed; Ctrl+C cancels the running task.
async fn run_chain(
    manager: &TaskManager,
    families: &[TaskFamily],
    overrides: &[Override],
) -> anyhow::Result<()> {
    let mut previous_outputs: Vec<PathBuf> = Vec::new();

    for (i, &family) in families.iter().enumerate() {
        let mut params = if i == 0 {
            ParamMap::new()
        } else {
            chain_overrides(family, &previous_outputs)
        };
        for o in overrides.iter().filter(|o| o.applies_to(family, i == 0)) {
            params.insert(o.key.clone(), o.value.clone());
        }

        let mut handle = manager.dispatch(family, params).await?;
        tracing::info!(worker_id = %handle.id(), "{} started", family.title());

        loop {
            tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, cancelling {}", family);
                    manager.cancel().await;
                }
                message = handle.next_progress() => match message {
                    Some(message) => eprintln!("[{family}] {message}"),
                    None => break,
                },
            }
        }

        let (result, lifecycle) = handle.wait_with_lifecycle().await;
        let elapsed_ms = lifecycle.elapsed().map(|d| d.as_millis());
        tracing::info!(state = ?lifecycle.state, ?elapsed_ms, "{} finished", family.title());
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.is_success() {
            bail!("{family} {}: {}", result.status(), result.message());
        }
        previous_outputs = result.outputs().to_vec();
    }
    Ok(())
}
