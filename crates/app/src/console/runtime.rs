//! Main loop of a console run.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rawcat_core::{
    Console,
    compass::OrientationHub,
    edit::DetachedMap,
    settings::SettingsStore,
    transport::{HttpTransport, Transport},
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::console::{
    commands::{self, CommandReceiver},
    config::ConsoleConfig,
    data::NoticeBoard,
    server::{ServerState, spawn_preview_server},
    telemetry,
};

/// Run the console until Ctrl+C.
pub fn run(config: ConsoleConfig, settings: Arc<SettingsStore>) -> Result<()> {
    let _telemetry = telemetry::enter_runtime(&config.telemetry);
    telemetry::init_metrics_recorder()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let span = info_span!("console", listen = %config.listen);
    runtime.block_on(run_console(config, settings).instrument(span))
}

fn apply_startup_settings(config: &ConsoleConfig, settings: &SettingsStore) -> Result<()> {
    if let Some(launch) = config.launch_url.as_ref() {
        let cleaned = settings
            .bootstrap(launch)
            .context("failed to store launch parameters")?;
        info!("launch parameters stored; shareable URL is {cleaned}");
    }
    settings
        .save(config.service_url.clone(), config.api_key.clone())
        .context("failed to save settings")?;
    if let Err(err) = settings.get().base_url() {
        warn!("{err}; polling stays idle until a service URL is saved");
    }
    Ok(())
}

async fn run_console(config: ConsoleConfig, settings: Arc<SettingsStore>) -> Result<()> {
    apply_startup_settings(&config, &settings)?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::default());
    let hub = Arc::new(OrientationHub::new(config.orientation_permission));
    let console = Arc::new(Console::new(
        transport,
        settings,
        hub.clone(),
        Arc::new(DetachedMap),
        config.options.clone(),
    ));
    let notices = Arc::new(NoticeBoard::default());
    let (commands, queue) = commands::channel();

    let pollers = console.start();
    let server = spawn_preview_server(
        config.listen,
        ServerState {
            console: console.clone(),
            hub,
            notices: notices.clone(),
            commands,
        },
    )?;
    info!("preview server on http://{}", config.listen);

    let mut worker =
        tokio::spawn(drain_commands(console.clone(), notices, queue).in_current_span());
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for Ctrl+C: {err}");
            }
            info!("shutting down");
        }
        _ = &mut worker => warn!("command queue closed"),
    }

    worker.abort();
    drop(pollers);
    console.shutdown();
    server.stop();
    Ok(())
}

/// Apply intents one at a time in arrival order. An intent that talks to the
/// vessel holds the queue until its request settles; polling keeps running
/// on its own timers meanwhile.
async fn drain_commands(
    console: Arc<Console>,
    notices: Arc<NoticeBoard>,
    mut queue: CommandReceiver,
) {
    while let Some(command) = queue.recv().await {
        debug!(?command, "operator intent");
        if let Err(err) = commands::apply(&console, command).await {
            notices.raise(format!("{err:#}"), Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use rawcat_core::{
        Coordinate, RouteState, SteeringMode,
        compass::{OrientationEvent, Permission},
        edit::{EditTarget, LegStart},
        settings::MemoryStore,
    };
    use reqwest::Method;
    use serde_json::json;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::console::{
        commands::{CommandSender, ConsoleCommand},
        config::TelemetryOptions,
        testing::{RecordingTransport, console_with, offline_console},
    };

    fn route() -> RouteState {
        RouteState::from_coordinates(vec![
            Coordinate::new(11.8, 57.6),
            Coordinate::new(11.9, 57.7),
        ])
    }

    fn hub() -> Arc<OrientationHub> {
        Arc::new(OrientationHub::new(Permission::Granted))
    }

    fn spawn_worker(console: &Arc<Console>) -> (CommandSender, Arc<NoticeBoard>, JoinHandle<()>) {
        let notices = Arc::new(NoticeBoard::default());
        let (tx, rx) = commands::channel();
        let worker = tokio::spawn(drain_commands(console.clone(), notices.clone(), rx));
        (tx, notices, worker)
    }

    async fn let_worker_run() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn notice(notices: &NoticeBoard) -> Option<String> {
        notices.current(Utc::now()).map(|n| n.message)
    }

    #[tokio::test]
    async fn queued_intents_reach_the_vessel_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let console = console_with(transport.clone(), hub());
        transport.hold("/setHoldLine");
        let (tx, notices, worker) = spawn_worker(&console);

        tx.send(ConsoleCommand::SetMode(SteeringMode::HoldLine)).unwrap();
        tx.send(ConsoleCommand::SetMode(SteeringMode::Route)).unwrap();
        let_worker_run().await;
        assert_eq!(transport.paths(), vec!["/setHoldLine"]);
        assert_eq!(console.steering.mode(), SteeringMode::HoldLine);

        transport.release("/setHoldLine");
        drop(tx);
        worker.await.unwrap();
        assert_eq!(transport.paths(), vec!["/setHoldLine", "/controller"]);
        assert_eq!(console.steering.mode(), SteeringMode::Route);
        assert_eq!(notice(&notices), None);
    }

    #[tokio::test]
    async fn update_after_commit_does_not_overtake_the_push() {
        let transport = Arc::new(RecordingTransport::default());
        let console = console_with(transport.clone(), hub());
        console.route.replace(route());
        transport.hold("/route");
        let (tx, notices, worker) = spawn_worker(&console);

        tx.send(ConsoleCommand::BeginEdit(EditTarget::Append)).unwrap();
        tx.send(ConsoleCommand::UpdateEdit(Coordinate::new(12.0, 57.8))).unwrap();
        tx.send(ConsoleCommand::CommitEdit).unwrap();
        tx.send(ConsoleCommand::UpdateEdit(Coordinate::new(12.5, 58.0))).unwrap();
        let_worker_run().await;

        let pushes = transport.requests();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].method, Method::POST);
        assert_eq!(
            pushes[0].body.as_ref().unwrap()["geometry"]["coordinates"],
            json!([[11.8, 57.6], [11.9, 57.7], [12.0, 57.8]])
        );
        assert!(console.route.is_fetch_paused());

        transport.release("/route");
        drop(tx);
        worker.await.unwrap();
        assert_eq!(notice(&notices).as_deref(), Some("no route edit is in progress"));
        assert_eq!(
            console.route.route().unwrap().coordinates().last(),
            Some(&Coordinate::new(12.0, 57.8))
        );
        assert!(!console.route.is_fetch_paused());
    }

    #[tokio::test]
    async fn gesture_failures_become_notices() {
        let console = offline_console(hub());
        console.route.replace(route());
        let (tx, notices, worker) = spawn_worker(&console);

        tx.send(ConsoleCommand::BeginEdit(EditTarget::Append)).unwrap();
        tx.send(ConsoleCommand::UpdateEdit(Coordinate::new(12.0, 57.8))).unwrap();
        tx.send(ConsoleCommand::BeginEdit(EditTarget::Move(0))).unwrap();
        let_worker_run().await;
        assert!(console.editor.is_editing());
        assert!(console.route.is_fetch_paused());
        assert_eq!(console.editor.preview().map(|p| p.len()), Some(3));
        assert_eq!(
            notice(&notices).as_deref(),
            Some("another route edit is already in progress")
        );

        tx.send(ConsoleCommand::CancelEdit).unwrap();
        drop(tx);
        worker.await.unwrap();
        assert!(!console.editor.is_editing());
        assert!(!console.route.is_fetch_paused());
    }

    #[tokio::test]
    async fn precondition_failures_become_notices() {
        let console = offline_console(hub());
        let err = commands::apply(
            &console,
            ConsoleCommand::ExtendRoute {
                destination: None,
                from: LegStart::RouteEnd,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "place a destination marker first");

        let (tx, notices, worker) = spawn_worker(&console);
        tx.send(ConsoleCommand::GoTo(None)).unwrap();
        drop(tx);
        worker.await.unwrap();
        assert_eq!(notice(&notices).as_deref(), Some("place a destination marker first"));
    }

    #[tokio::test]
    async fn traffic_refresh_needs_a_vessel_position() {
        let console = offline_console(hub());
        let err = commands::apply(&console, ConsoleCommand::RefreshAis(None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "vessel position is not known yet");
    }

    #[tokio::test]
    async fn compass_mode_follows_posted_orientation() {
        let hub = hub();
        let console = offline_console(hub.clone());
        commands::apply(&console, ConsoleCommand::SetMode(SteeringMode::Compass))
            .await
            .unwrap();
        assert_eq!(hub.dispatch(OrientationEvent::from_alpha(270.0)), 1);
        assert_eq!(console.steering.heading(), Some(90.0));

        commands::apply(&console, ConsoleCommand::SetMode(SteeringMode::Route))
            .await
            .unwrap();
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn denied_orientation_keeps_route_mode() {
        let hub = Arc::new(OrientationHub::new(Permission::Denied));
        let console = offline_console(hub);
        let err = commands::apply(&console, ConsoleCommand::SetMode(SteeringMode::Compass))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "orientation permission denied");
        assert_eq!(console.steering.mode(), SteeringMode::Route);
    }

    #[test]
    fn startup_flags_override_stored_settings() {
        let store = SettingsStore::open(MemoryStore::default());
        store
            .save(Some("http://old.local".into()), Some("old".into()))
            .unwrap();
        let config = ConsoleConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            launch_url: Some("http://console.local/?apiKey=fresh&zoom=12".parse().unwrap()),
            service_url: Some("http://boat.local:5000".into()),
            api_key: None,
            orientation_permission: Permission::Granted,
            options: Default::default(),
            telemetry: TelemetryOptions::default(),
        };
        apply_startup_settings(&config, &store).unwrap();
        let current = store.get();
        assert_eq!(current.service_url.as_deref(), Some("http://boat.local:5000"));
        assert_eq!(current.api_key.as_deref(), Some("fresh"));
    }
}
