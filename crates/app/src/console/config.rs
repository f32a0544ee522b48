//! Configuration of the `run` subcommand.
//!
//! CLI arguments are translated once into a `ConsoleConfig`; nothing
//! downstream re-reads flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;
use rawcat_core::{
    ConsoleOptions,
    compass::Permission,
    edit::DragStrategy,
    ais::DEFAULT_AIS_URL,
    routing::{DEFAULT_AUTOROUTE_URL, RoutingOptions},
    vessel::DATA_PAGE_TRAIL_WINDOW,
};
use reqwest::Url;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Clone, Debug)]
/// Validated settings for a console run.
pub struct ConsoleConfig {
    /// Address the preview server binds to.
    pub listen: SocketAddr,
    /// Launch URL whose `serviceUrl`/`apiKey` parameters seed the store.
    pub launch_url: Option<Url>,
    pub service_url: Option<String>,
    pub api_key: Option<String>,
    /// Answer given to compass permission requests.
    pub orientation_permission: Permission,
    pub options: ConsoleOptions,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Default to `debug` output when `RUST_LOG` is unset.
    pub verbose: bool,
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Args)]
pub struct ConsoleCliArgs {
    /// Preview server address.
    #[arg(long = "listen", env = "RAWCAT_LISTEN", value_name = "ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,
    /// Launch URL carrying one-time `serviceUrl`/`apiKey` parameters.
    #[arg(long = "launch-url", value_name = "URL")]
    pub launch_url: Option<String>,
    /// Vessel service base URL (stored for later runs).
    #[arg(long = "service-url", value_name = "URL")]
    pub service_url: Option<String>,
    /// Routing API key (stored for later runs).
    #[arg(long = "api-key", env = "RAWCAT_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub api_key: Option<String>,
    /// Vessel telemetry poll period.
    #[arg(long = "vessel-interval-ms", value_name = "MS", default_value_t = 500)]
    pub vessel_interval_ms: u64,
    /// Route poll period.
    #[arg(long = "route-interval-ms", value_name = "MS", default_value_t = 5000)]
    pub route_interval_ms: u64,
    /// Keep only this many seconds of position trail (default keeps all).
    #[arg(long = "trail-window-secs", value_name = "SECS")]
    pub trail_window_secs: Option<u64>,
    /// Use the telemetry page's short trailing window.
    #[arg(long = "data-page", action = clap::ArgAction::SetTrue, conflicts_with = "trail_window_secs")]
    pub data_page: bool,
    /// Track edit gestures with pointer events and lock map panning.
    #[arg(long = "pointer-tracking", action = clap::ArgAction::SetTrue)]
    pub pointer_tracking: bool,
    /// Refuse orientation permission, as a browser without sensors would.
    #[arg(long = "deny-orientation", action = clap::ArgAction::SetTrue)]
    pub deny_orientation: bool,
    /// Auto-route service endpoint.
    #[arg(long = "autoroute-url", value_name = "URL", default_value = DEFAULT_AUTOROUTE_URL)]
    pub autoroute_url: String,
    /// AIS bounding-box search endpoint.
    #[arg(long = "ais-url", value_name = "URL", default_value = DEFAULT_AIS_URL)]
    pub ais_url: String,
    /// Skip hydrographic data in route lookups.
    #[arg(long = "no-hydrographica", action = clap::ArgAction::SetTrue)]
    pub no_hydrographica: bool,
    /// Required depth under the keel in metres.
    #[arg(long = "safety-depth", value_name = "M", default_value_t = 1.5)]
    pub safety_depth: f64,
    /// Required clearance under bridges in metres.
    #[arg(long = "safety-height", value_name = "M", default_value_t = 10.0)]
    pub safety_height: f64,
    /// Boat speed in knots for route time estimates.
    #[arg(long = "boat-speed", value_name = "KN", default_value_t = 10.0)]
    pub boat_speed: f64,
    /// Enable verbose logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ConsoleCliArgs> for ConsoleConfig {
    type Error = anyhow::Error;

    fn try_from(args: ConsoleCliArgs) -> Result<Self> {
        let listen: SocketAddr = args
            .listen
            .parse()
            .with_context(|| format!("--listen must be host:port, got {}", args.listen))?;

        if args.vessel_interval_ms == 0 || args.route_interval_ms == 0 {
            bail!("poll intervals must be at least 1 ms");
        }
        if args.trail_window_secs == Some(0) {
            bail!("--trail-window-secs must be at least 1");
        }

        let launch_url = args
            .launch_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("--launch-url is not a valid URL")?;
        Url::parse(&args.autoroute_url).context("--autoroute-url is not a valid URL")?;
        Url::parse(&args.ais_url).context("--ais-url is not a valid URL")?;

        for (flag, value) in [
            ("--safety-depth", args.safety_depth),
            ("--safety-height", args.safety_height),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{flag} must be a non-negative number");
            }
        }
        if !args.boat_speed.is_finite() || args.boat_speed <= 0.0 {
            bail!("--boat-speed must be positive");
        }

        let options = ConsoleOptions {
            vessel_interval: Duration::from_millis(args.vessel_interval_ms),
            route_interval: Duration::from_millis(args.route_interval_ms),
            trail_window: if args.data_page {
                Some(DATA_PAGE_TRAIL_WINDOW)
            } else {
                args.trail_window_secs.map(Duration::from_secs)
            },
            drag_strategy: if args.pointer_tracking {
                DragStrategy::PointerTracking
            } else {
                DragStrategy::Native
            },
            routing: RoutingOptions {
                endpoint: args.autoroute_url,
                use_hydrographica: !args.no_hydrographica,
                safety_depth: args.safety_depth,
                safety_height: args.safety_height,
                boat_speed: args.boat_speed,
            },
            ais_endpoint: args.ais_url,
        };

        Ok(Self {
            listen,
            launch_url,
            service_url: args.service_url,
            api_key: args.api_key,
            orientation_permission: if args.deny_orientation {
                Permission::Denied
            } else {
                Permission::Granted
            },
            options,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                verbose: args.verbose,
            },
        })
    }
}
