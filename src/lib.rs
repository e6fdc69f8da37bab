pub mod detection;
pub mod overlay;
pub mod probes;
pub mod settings;
pub mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;

use detection::{DetectionAggregate, DetectionConfig, DetectionController, ProbeSet};
use overlay::{OverlayState, PageHost};
use probes::HttpResourceLoader;
use settings::{ChoiceStore, JsonFileStore, UserChoice};
use utils::{Clock, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "adwatch", version, about = "Detect ad blocking from the network probes")]
struct Cli {
    /// JSON file holding the persisted overlay choice
    #[arg(long, env = "ADWATCH_STATE_FILE", default_value = "adwatch-state.json")]
    state_file: PathBuf,

    /// JSON detection config; unset keys use defaults
    #[arg(long, env = "ADWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the network probes and report whether the overlay would show
    Scan {
        /// Also run the image-load probe
        #[arg(long)]
        production: bool,
    },
    /// Dismiss the overlay for the configured TTL
    Continue,
    /// Print the stored choice
    Status,
    /// Forget the stored choice
    Clear,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanReport {
    session_id: String,
    aggregate: DetectionAggregate,
    overlay: OverlayState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChoiceStatus {
    choice: Option<UserChoice>,
    suppresses_overlay: bool,
}

/// No page to lock or reload in a terminal; the transitions are only logged.
struct TerminalHost;

impl PageHost for TerminalHost {
    fn set_scroll_locked(&self, locked: bool) {
        if locked {
            log::info!("overlay would block the page");
        } else {
            log::info!("overlay released the page");
        }
    }

    fn reload(&self) {
        log::info!("page reload requested");
    }
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DetectionConfig::load(path)?,
        None => DetectionConfig::default(),
    }
    .with_env_overrides();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(JsonFileStore::new(cli.state_file.clone())?);
    let choices = ChoiceStore::new(store.clone());

    match cli.command {
        Command::Scan { production } => {
            let config = DetectionConfig {
                production: config.production || production,
                ..config
            };
            let report = scan(config, store, clock).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Continue => {
            let choice = UserChoice::continue_for(clock.now(), config.choice_ttl());
            choices.save(&choice)?;
            println!("{}", serde_json::to_string_pretty(&choice)?);
        }
        Command::Status => {
            let choice = choices.load();
            let status = ChoiceStatus {
                suppresses_overlay: choice
                    .as_ref()
                    .map_or(false, |choice| choice.suppresses_overlay(clock.now())),
                choice,
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Clear => {
            choices.clear()?;
            log::info!("stored choice cleared");
        }
    }

    Ok(())
}

async fn scan(
    config: DetectionConfig,
    store: Arc<JsonFileStore>,
    clock: Arc<dyn Clock>,
) -> Result<ScanReport> {
    let loader = Arc::new(HttpResourceLoader::new(config.probe_timeout())?);
    let probes = ProbeSet::network(loader, &config);
    let window = config.observation_window();

    let mut controller = DetectionController::new(config, Arc::new(TerminalHost), store, clock);
    controller.mount(probes)?;

    log::info!(
        "observing for {}ms (session {})",
        window.as_millis(),
        controller.session_id()
    );
    tokio::time::sleep(window).await;

    let session_id = controller.session_id().to_string();
    let overlay = controller.overlay_state().await;
    let aggregate = controller.unmount().await;

    Ok(ScanReport {
        session_id,
        aggregate,
        overlay,
    })
}
