//! inpage-sim CLI entry point.
//!
//! Serves the inpage agent over the driver bridge, backed by a simulated
//! notebook host.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use inpage::{AgentConfig, CellType, InPageAgent};
use inpage_sim::{NotebookDoc, SimHost, SimNotebook, SimPlugin};
use log::info;

/// Plugins present at startup. The theme manager is activated lazily.
const BUILTIN_PLUGINS: &[(&str, bool)] = &[
    ("@jupyterlab/application-extension:shell", true),
    ("@jupyterlab/notebook-extension:tracker", true),
    ("@jupyterlab/docmanager-extension:manager", true),
    ("@jupyterlab/apputils-extension:themes", false),
];

#[derive(Parser, Debug)]
#[command(name = "inpage-sim")]
#[command(about = "Simulated notebook host serving the inpage agent bridge")]
struct Cli {
    /// Port for the driver bridge
    #[arg(long, default_value = "4444")]
    port: u16,

    /// Notebook (.ipynb) to open; an empty notebook is opened otherwise
    #[arg(long)]
    notebook: Option<PathBuf>,

    /// Agent configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where docmanager:save writes the notebook document; reopened on start
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Lay out only this many cells at a time
    #[arg(long)]
    window: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    let mut host = SimHost::new();
    if let Some(path) = &cli.save_path {
        host = host.with_save_path(path.clone());
    }
    for (id, activated) in BUILTIN_PLUGINS {
        let service: inpage::host::Service = Arc::new(id.to_string());
        let plugin = if *activated {
            SimPlugin::activated(Some(service))
        } else {
            SimPlugin::deferred(Some(service))
        };
        host.sim_plugins().register(id, plugin);
    }

    // an earlier save is picked up again unless a notebook is given
    let doc = match (&cli.notebook, &cli.save_path) {
        (Some(path), _) => {
            info!("Opening {:?}", path);
            NotebookDoc::load_ipynb(path)?
        }
        (None, Some(saved)) if saved.exists() => NotebookDoc::open(saved)?,
        (None, _) => empty_document(),
    };
    let notebook = match cli.window {
        Some(size) => SimNotebook::windowed(doc, size),
        None => SimNotebook::new(doc),
    };
    host.set_active_notebook(Some(notebook));

    info!("Configuration:");
    info!("  Cell run timeout: {:?}", config.cell_run_timeout());
    info!("  Output selector: {}", config.output_selector);

    let agent = InPageAgent::new(Arc::new(host), config);
    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    inpage::bridge::serve(agent, addr).await
}

fn empty_document() -> NotebookDoc {
    let mut doc = NotebookDoc::new("untitled");
    if let Err(e) = doc.insert_cell(0, &uuid::Uuid::new_v4().to_string(), CellType::Code, "") {
        log::warn!("Failed to create the first cell: {}", e);
    }
    doc
}
