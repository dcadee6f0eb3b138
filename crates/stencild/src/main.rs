//! stencild: the Stencil daemon.
//!
//! Single binary that assembles the broker:
//! - State store (redb)
//! - Authorization gate from `[authz]`
//! - Template instance controller
//! - Open Service Broker API
//!
//! # Usage
//!
//! ```text
//! stencild serve --config /etc/stencil/stencil.toml --port 8080
//! stencild import --config /etc/stencil/stencil.toml ./templates
//! ```

mod import;
mod serve;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use stencil_core::BrokerConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stencild", about = "Stencil template service broker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the OSB API and run the instance controller.
    Serve {
        /// Path to stencil.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `broker.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `broker.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Create or update templates from JSON files.
    Import {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// A template file, or a directory searched recursively for `*.json`.
        path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stencild=debug,stencil=debug"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

/// Load the config file (or defaults) and apply command-line overrides.
fn load_config(
    path: Option<&Path>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<BrokerConfig> {
    let mut config = match path {
        Some(path) => BrokerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BrokerConfig::default(),
    };
    if let Some(port) = port {
        config.broker.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.broker.data_dir = data_dir;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_json,
        } => {
            init_tracing(log_json);
            let config = load_config(config.as_deref(), port, data_dir)?;
            serve::run_serve(config).await
        }
        Command::Import {
            config,
            data_dir,
            path,
        } => {
            init_tracing(false);
            let config = load_config(config.as_deref(), None, data_dir)?;
            let store = serve::open_store(&config)?;
            let default_namespace = config
                .broker
                .template_namespaces
                .first()
                .map(String::as_str)
                .unwrap_or_default();
            let summary = import::import_templates(&store, &path, default_namespace)?;
            tracing::info!(
                created = summary.created,
                updated = summary.updated,
                "template import finished"
            );
            Ok(())
        }
    }
}
