//! deep-copy CLI - inspect and maintain the key maps and bridge stores of
//! resumable copies.

use clap::{Parser, Subcommand};
use deep_copy::bridge::{self, BridgeStore};
use deep_copy::{Config, CopyError, KeyMap, OpaqueKey};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Configuration written by `deep-copy init`.
const CONFIG_TEMPLATE: &str = r#"# deep-copy configuration

# Where (step, source key) -> destination key mappings are kept.
# backend: memory | file | postgres
key_map:
  backend: file
  path: state/key-map.jsonl
  # backend: postgres
  # postgres:
  #   host: localhost
  #   port: 5432
  #   database: copy_state
  #   user: copier
  #   password: secret
  #   schema: _deep_copy
  #   ssl_mode: disable      # disable | require | verify-ca | verify-full
  #   max_connections: 4

# Staging area for two-phase copies.
# backend: memory | file
bridge:
  backend: file
  path: state/bridge

copy:
  # Row failures (create + insert) after which a step stops
  max_errors: 10
  # Rows per staged chunk
  chunk_size: 30
"#;

#[derive(Parser)]
#[command(name = "deep-copy")]
#[command(about = "Inspect and maintain deep-copy key maps and bridge stores")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "deep-copy.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "warn")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration and open every configured store
    Check,

    /// Inspect the key map
    #[command(subcommand)]
    KeyMap(KeyMapCommand),

    /// Inspect or clear staged chunks
    #[command(subcommand)]
    Bridge(BridgeCommand),
}

#[derive(Subcommand)]
enum KeyMapCommand {
    /// Entry counts per step
    Stats,

    /// Destination key recorded for a source key
    Lookup {
        /// Step name
        #[arg(long)]
        step: String,

        /// Source key as JSON (bare strings are accepted)
        #[arg(long)]
        key: String,
    },
}

#[derive(Subcommand)]
enum BridgeCommand {
    /// Steps with staged chunks
    List,

    /// Print one staged row
    Show {
        /// Step name
        #[arg(long)]
        step: String,

        /// Source key as JSON (bare strings are accepted)
        #[arg(long)]
        key: String,
    },

    /// Remove every chunk staged for a step
    Clear {
        /// Step name
        #[arg(long)]
        step: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CopyError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(CopyError::Config)?;

    // Handle init separately (doesn't need an existing config)
    if let Commands::Init { force } = cli.command {
        write_template(&cli.config, force)?;
        if cli.output_json {
            println!("{}", json!({ "written": cli.config }));
        } else {
            println!("Wrote {}", cli.config.display());
        }
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above
        Commands::Check => check(&config, cli.output_json).await,
        Commands::KeyMap(KeyMapCommand::Stats) => key_map_stats(&config, cli.output_json).await,
        Commands::KeyMap(KeyMapCommand::Lookup { step, key }) => {
            key_map_lookup(&config, &step, &key, cli.output_json).await
        }
        Commands::Bridge(BridgeCommand::List) => bridge_list(&config, cli.output_json).await,
        Commands::Bridge(BridgeCommand::Show { step, key }) => {
            bridge_show(&config, &step, &key).await
        }
        Commands::Bridge(BridgeCommand::Clear { step }) => {
            bridge_clear(&config, &step, cli.output_json).await
        }
    }
}

fn write_template(path: &Path, force: bool) -> Result<(), CopyError> {
    if path.exists() && !force {
        return Err(CopyError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

/// Read-only: a copy may still be appending to the same key map.
async fn open_key_map(config: &Config) -> Result<KeyMap<OpaqueKey>, CopyError> {
    let mut key_map = KeyMap::new(config.key_map.open_read_only::<OpaqueKey>().await?);
    key_map.initialize().await?;
    Ok(key_map)
}

async fn staged_steps(store: &dyn BridgeStore) -> Result<Vec<(String, usize, usize)>, CopyError> {
    let mut steps = Vec::new();
    for step in store.steps().await? {
        let chunks = store.chunk_count(&step).await?;
        let rows = bridge::staged_rows(store, &step).await?;
        steps.push((step, chunks, rows));
    }
    Ok(steps)
}

async fn check(config: &Config, output_json: bool) -> Result<(), CopyError> {
    let key_map = open_key_map(config).await?;
    let store: Arc<dyn BridgeStore> = config.bridge.open()?;
    let staged = staged_steps(store.as_ref()).await?;

    if output_json {
        let result = json!({
            "config_hash": config.hash(),
            "key_map": {
                "backend": key_map.backend_type(),
                "durable": key_map.is_durable(),
                "entries": key_map.len(),
            },
            "bridge": {
                "backend": store.backend_type(),
                "staged_steps": staged.len(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Configuration OK");
        println!(
            "  Key map: {} ({} entries{})",
            key_map.backend_type(),
            key_map.len(),
            if key_map.is_durable() { "" } else { ", not durable" }
        );
        println!(
            "  Bridge: {} ({} staged steps)",
            store.backend_type(),
            staged.len()
        );
    }
    Ok(())
}

async fn key_map_stats(config: &Config, output_json: bool) -> Result<(), CopyError> {
    let key_map = open_key_map(config).await?;
    let steps = key_map.steps();

    if output_json {
        let steps: Vec<_> = steps
            .iter()
            .map(|(step, entries)| json!({ "step": step, "entries": entries }))
            .collect();
        let result = json!({ "total": key_map.len(), "steps": steps });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for (step, entries) in &steps {
            println!("{:<32} {:>10}", step, entries);
        }
        println!("{:<32} {:>10}", "total", key_map.len());
    }
    Ok(())
}

async fn key_map_lookup(
    config: &Config,
    step: &str,
    key: &str,
    output_json: bool,
) -> Result<(), CopyError> {
    let key_map = open_key_map(config).await?;
    let source = OpaqueKey::parse(key);
    let dest = key_map.resolve(step, &source)?;

    if output_json {
        let result = json!({ "step": step, "source": source, "dest": dest });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", dest);
    }
    Ok(())
}

async fn bridge_list(config: &Config, output_json: bool) -> Result<(), CopyError> {
    let store = config.bridge.open()?;
    let staged = staged_steps(store.as_ref()).await?;

    if output_json {
        let steps: Vec<_> = staged
            .iter()
            .map(|(step, chunks, rows)| json!({ "step": step, "chunks": chunks, "rows": rows }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&steps)?);
    } else if staged.is_empty() {
        println!("Nothing staged");
    } else {
        for (step, chunks, rows) in &staged {
            println!("{:<32} {:>6} chunks {:>10} rows", step, chunks, rows);
        }
    }
    Ok(())
}

async fn bridge_show(config: &Config, step: &str, key: &str) -> Result<(), CopyError> {
    let store = config.bridge.open()?;
    let key = OpaqueKey::parse(key);
    let row: Option<serde_json::Value> = bridge::fetch(store.as_ref(), step, &key).await?;

    match row {
        Some(row) => {
            println!("{}", serde_json::to_string_pretty(&row)?);
            Ok(())
        }
        None => Err(CopyError::Store(format!(
            "no row staged for step {} with key {}",
            step, key
        ))),
    }
}

async fn bridge_clear(config: &Config, step: &str, output_json: bool) -> Result<(), CopyError> {
    let store = config.bridge.open()?;
    let chunks = store.chunk_count(step).await?;
    store.clear(step).await?;
    info!("Cleared {} chunks staged for {}", chunks, step);

    if output_json {
        println!("{}", json!({ "step": step, "cleared_chunks": chunks }));
    } else {
        println!("Cleared {} chunks for {}", chunks, step);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}
