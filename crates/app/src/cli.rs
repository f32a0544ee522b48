//! Command-line surface of the console.
//!
//! `run` starts the live console; every other subcommand is a one-shot
//! request against the configured vessel service.

use std::{future::Future, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rawcat_core::{
    compass::{OrientationHub, Permission},
    passthrough::DeviceConsole,
    poller::PollSource,
    route::RouteSync,
    settings::{FileStore, ServiceSettings, SettingsStore},
    steering::SteeringController,
    transport::{HttpTransport, Transport},
};
use reqwest::Url;
use tracing::info;

use crate::console::{self, ConsoleCliArgs, ConsoleConfig};

pub const DEFAULT_STATE_FILE: &str = "rawcat-console.json";

#[derive(Debug, Parser)]
#[command(name = "rawcat-console", version, about = "Pilot console for RawCat vessels")]
pub struct Cli {
    /// Preference file holding the service URL and API key.
    #[arg(
        long = "state-file",
        env = "RAWCAT_STATE_PATH",
        value_name = "PATH",
        default_value = DEFAULT_STATE_FILE,
        global = true
    )]
    pub state_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll the vessel, serve the preview API and process operator intents.
    Run(ConsoleCliArgs),
    /// Show or change the stored service URL and API key.
    Settings {
        #[arg(long = "service-url", value_name = "URL")]
        service_url: Option<String>,
        #[arg(long = "api-key", value_name = "KEY")]
        api_key: Option<String>,
        /// Launch URL carrying `serviceUrl`/`apiKey` query parameters.
        #[arg(long = "launch-url", value_name = "URL", conflicts_with_all = ["service_url", "api_key"])]
        launch_url: Option<String>,
    },
    /// Store the UI theme preference on the device.
    DarkMode {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Make waypoint INDEX the navigation target.
    Goal { index: usize },
    /// Latch hold-line steering on the device.
    HoldLine,
    /// Return the device to route following.
    RouteMode,
    /// Print a raw device document.
    Dump {
        #[arg(value_enum)]
        document: Document,
    },
    /// Replace the device settings document with the contents of FILE.
    UploadSettings { file: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Document {
    Settings,
    Data,
    Route,
}

pub fn handle_command(cli: Cli) -> Result<()> {
    let settings = Arc::new(SettingsStore::open(FileStore::new(&cli.state_file)));

    match cli.command {
        Command::Run(args) => {
            let config = ConsoleConfig::try_from(args)?;
            console::run(config, settings)
        }
        Command::Settings {
            service_url,
            api_key,
            launch_url,
        } => {
            let _ = tracing_subscriber::fmt::try_init();
            update_settings(&settings, service_url, api_key, launch_url)?;
            print_json(&serde_json::to_value(redacted(&settings))?)
        }
        other => {
            let _ = tracing_subscriber::fmt::try_init();
            block_on(one_shot(other, settings))
        }
    }
}

fn update_settings(
    settings: &SettingsStore,
    service_url: Option<String>,
    api_key: Option<String>,
    launch_url: Option<String>,
) -> Result<()> {
    if let Some(raw) = launch_url {
        let launch = Url::parse(&raw).with_context(|| format!("invalid launch URL {raw}"))?;
        let cleaned = settings
            .bootstrap(&launch)
            .context("failed to store launch parameters")?;
        info!("launch parameters consumed, continuing at {cleaned}");
    } else if service_url.is_some() || api_key.is_some() {
        settings
            .save(service_url, api_key)
            .context("failed to save settings")?;
    }
    Ok(())
}

/// Stored settings with the API key masked for display.
fn redacted(settings: &SettingsStore) -> ServiceSettings {
    let mut current = settings.get();
    if current.api_key().is_some() {
        current.api_key = Some("********".to_string());
    }
    current
}

async fn one_shot(command: Command, settings: Arc<SettingsStore>) -> Result<()> {
    if settings.get().base_url().is_err() {
        bail!("no service URL configured; run `rawcat-console settings --service-url <URL>` first");
    }
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::default());
    let device = DeviceConsole::new(transport.clone(), settings.clone());

    match command {
        Command::DarkMode { enabled } => {
            device.push_dark_mode(enabled).await?;
            info!("dark mode set to {enabled}");
        }
        Command::Goal { index } => {
            RouteSync::new(transport, settings).select_goal(index).await?;
            info!("goal set to waypoint {index}");
        }
        Command::HoldLine => {
            let hub = Arc::new(OrientationHub::new(Permission::Denied));
            SteeringController::new(transport, settings, hub)
                .enable_hold_line()
                .await?;
            info!("hold-line latched");
        }
        Command::RouteMode => device.follow_route().await?,
        Command::Dump { document } => {
            let value = match document {
                Document::Settings => device.fetch_settings().await?,
                Document::Data => device.fetch_data().await?,
                Document::Route => {
                    let base = settings.get().base_url()?;
                    let route = RouteSync::new(transport, settings);
                    route.poll(base).await?;
                    serde_json::to_value(route.route())?
                }
            };
            print_json(&value)?;
        }
        Command::UploadSettings { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let document: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON document", file.display()))?;
            let echoed = device.upload_settings(&document).await?;
            print_json(&echoed)?;
        }
        other => bail!("{other:?} is not a one-shot command"),
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(future)
}
