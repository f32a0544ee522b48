//! Actix Web preview server exposing console state and operator intents.
//!
//! The server runs on a dedicated thread so the poll loop never shares a
//! runtime with HTTP handling. Reads go straight to the console's observable
//! state; anything that changes state is queued to the command worker.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use chrono::Utc;
use rawcat_core::{
    Console, Coordinate, SteeringMode,
    ais::BoundingBox,
    compass::{OrientationEvent, OrientationHub},
    edit::{EditTarget, LegStart},
};
use serde::Deserialize;
use serde_json::{json, to_string};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::console::{
    commands::{CommandSender, ConsoleCommand},
    data::{ConsoleView, NoticeBoard},
    telemetry,
};

/// Longest gap between two state events, so notice expiry still reaches
/// clients when nothing else changes.
const SSE_HEARTBEAT: Duration = Duration::from_secs(1);

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) console: Arc<Console>,
    pub(crate) hub: Arc<OrientationHub>,
    pub(crate) notices: Arc<NoticeBoard>,
    pub(crate) commands: CommandSender,
}

#[derive(Default)]
/// Handle for the preview server thread.
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the preview server thread and return a handle that can stop it.
pub(crate) fn spawn_preview_server(
    listen: SocketAddr,
    state: ServerState,
) -> Result<PreviewServer> {
    let state = web::Data::new(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("rawcat-preview-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
                .workers(1)
                .bind(listen)?
                .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/state", web::get().to(state_handler))
        .route("/stream_state", web::get().to(stream_state_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/orientation", web::post().to(orientation_handler))
        .route("/mode/{mode}", web::post().to(mode_handler))
        .route("/dark-mode/{enabled}", web::post().to(dark_mode_handler))
        .route("/route/edit/begin", web::post().to(edit_begin_handler))
        .route("/route/edit/update", web::post().to(edit_update_handler))
        .route("/route/edit/commit", web::post().to(edit_commit_handler))
        .route("/route/edit/cancel", web::post().to(edit_cancel_handler))
        .route("/route/goal/{index}", web::post().to(goal_handler))
        .route("/route/extend", web::post().to(extend_handler))
        .route("/route/goto", web::post().to(goto_handler))
        .route("/ais", web::post().to(ais_handler));
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct PointBody {
    longitude: f64,
    latitude: f64,
}

impl From<PointBody> for Coordinate {
    fn from(point: PointBody) -> Self {
        Coordinate::new(point.longitude, point.latitude)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TargetKind {
    Move,
    Insert,
    Append,
}

#[derive(Debug, Deserialize)]
struct BeginBody {
    target: TargetKind,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LegFrom {
    Vessel,
    #[default]
    RouteEnd,
}

#[derive(Debug, Deserialize)]
struct ExtendBody {
    #[serde(default)]
    destination: Option<PointBody>,
    #[serde(default)]
    from: LegFrom,
}

#[derive(Debug, Deserialize)]
struct GoToBody {
    #[serde(default)]
    destination: Option<PointBody>,
}

/// Hand an intent to the command worker.
fn enqueue(state: &ServerState, command: ConsoleCommand) -> HttpResponse {
    debug!(?command, "queueing operator intent");
    match state.commands.send(command) {
        Ok(()) => HttpResponse::Accepted().json(json!({ "queued": true })),
        Err(_) => HttpResponse::ServiceUnavailable().body("console is shutting down"),
    }
}

/// Return the current console snapshot as JSON.
async fn state_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(ConsoleView::capture(&state.console, &state.notices, Utc::now()))
}

/// Stream console snapshots as Server-Sent Events. A snapshot goes out
/// whenever any observable part of the console changes, and at least once
/// per heartbeat.
async fn stream_state_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let console = state.console.clone();
    let mut steering = console.steering.subscribe();
    let mut vessel = console.vessel.subscribe();
    let mut route = console.route.subscribe();
    let mut preview = console.editor.subscribe_preview();
    let mut settings = console.settings.subscribe();
    let mut ais = console.ais.subscribe();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 500\n\n"));
        let mut heartbeat = actix_web::rt::time::interval(SSE_HEARTBEAT);
        let mut sequence: u64 = 0;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {}
                Ok(()) = steering.changed() => {}
                Ok(()) = vessel.changed() => {}
                Ok(()) = route.changed() => {}
                Ok(()) = preview.changed() => {}
                Ok(()) = settings.changed() => {}
                Ok(()) = ais.changed() => {}
            }
            sequence += 1;
            let view = ConsoleView::capture(&state.console, &state.notices, Utc::now());
            match to_string(&view) {
                Ok(json) => {
                    let mut sse_chunk = String::with_capacity(json.len() + 32);
                    sse_chunk.push_str("id: ");
                    sse_chunk.push_str(&sequence.to_string());
                    sse_chunk.push('\n');
                    sse_chunk.push_str("data: ");
                    sse_chunk.push_str(&json);
                    sse_chunk.push_str("\n\n");
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(sse_chunk));
                }
                Err(err) => {
                    let error_chunk = format!("event: error\ndata: {}\n\n", err);
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(error_chunk));
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// Render the Prometheus exposition text.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// Feed a device orientation reading to whoever is listening.
async fn orientation_handler(
    state: web::Data<ServerState>,
    event: web::Json<OrientationEvent>,
) -> HttpResponse {
    let delivered = state.hub.dispatch(event.into_inner());
    HttpResponse::Ok().json(json!({ "listeners": delivered }))
}

async fn mode_handler(state: web::Data<ServerState>, mode: web::Path<String>) -> HttpResponse {
    match SteeringMode::parse(mode.as_str()) {
        Some(mode) => enqueue(&state, ConsoleCommand::SetMode(mode)),
        None => HttpResponse::BadRequest().body(format!(
            "unknown steering mode {:?}; expected route, compass or holdline",
            mode.as_str()
        )),
    }
}

async fn dark_mode_handler(state: web::Data<ServerState>, enabled: web::Path<bool>) -> HttpResponse {
    enqueue(&state, ConsoleCommand::DarkMode(enabled.into_inner()))
}

async fn edit_begin_handler(
    state: web::Data<ServerState>,
    body: web::Json<BeginBody>,
) -> HttpResponse {
    let target = match (body.target, body.index) {
        (TargetKind::Move, Some(index)) => EditTarget::Move(index),
        (TargetKind::Insert, Some(index)) => EditTarget::Insert(index),
        (TargetKind::Append, _) => EditTarget::Append,
        (_, None) => return HttpResponse::BadRequest().body("index is required for move and insert"),
    };
    enqueue(&state, ConsoleCommand::BeginEdit(target))
}

async fn edit_update_handler(
    state: web::Data<ServerState>,
    body: web::Json<PointBody>,
) -> HttpResponse {
    enqueue(&state, ConsoleCommand::UpdateEdit(body.into_inner().into()))
}

async fn edit_commit_handler(state: web::Data<ServerState>) -> HttpResponse {
    enqueue(&state, ConsoleCommand::CommitEdit)
}

async fn edit_cancel_handler(state: web::Data<ServerState>) -> HttpResponse {
    enqueue(&state, ConsoleCommand::CancelEdit)
}

async fn goal_handler(state: web::Data<ServerState>, index: web::Path<usize>) -> HttpResponse {
    enqueue(&state, ConsoleCommand::SelectGoal(index.into_inner()))
}

async fn extend_handler(
    state: web::Data<ServerState>,
    body: web::Json<ExtendBody>,
) -> HttpResponse {
    let body = body.into_inner();
    let from = match body.from {
        LegFrom::Vessel => LegStart::Vessel,
        LegFrom::RouteEnd => LegStart::RouteEnd,
    };
    enqueue(
        &state,
        ConsoleCommand::ExtendRoute {
            destination: body.destination.map(Coordinate::from),
            from,
        },
    )
}

/// Queue a traffic search. Without a body the box is centred on the vessel.
async fn ais_handler(
    state: web::Data<ServerState>,
    body: Option<web::Json<BoundingBox>>,
) -> HttpResponse {
    enqueue(
        &state,
        ConsoleCommand::RefreshAis(body.map(web::Json::into_inner)),
    )
}

async fn goto_handler(state: web::Data<ServerState>, body: web::Json<GoToBody>) -> HttpResponse {
    enqueue(
        &state,
        ConsoleCommand::GoTo(body.into_inner().destination.map(Coordinate::from)),
    )
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;

    use actix_web::{body::MessageBody, http::StatusCode, test};
    use rawcat_core::compass::Permission;

    use super::*;
    use crate::console::{commands, testing::offline_console};

    async fn next_chunk<B>(body: &mut B) -> Bytes
    where
        B: MessageBody + Unpin,
        B::Error: std::fmt::Debug,
    {
        std::future::poll_fn(|cx| Pin::new(&mut *body).poll_next(cx))
            .await
            .unwrap()
            .unwrap()
    }

    fn server_state() -> (web::Data<ServerState>, commands::CommandReceiver, Arc<OrientationHub>) {
        let hub = Arc::new(OrientationHub::new(Permission::Granted));
        let console = offline_console(hub.clone());
        let (tx, rx) = commands::channel();
        let state = ServerState {
            console,
            hub: hub.clone(),
            notices: Arc::new(NoticeBoard::default()),
            commands: tx,
        };
        (web::Data::new(state), rx, hub)
    }

    #[actix_web::test]
    async fn mode_switch_is_queued() {
        let (state, mut rx, _hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::post().uri("/mode/compass").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsoleCommand::SetMode(SteeringMode::Compass)
        );

        let req = test::TestRequest::post().uri("/mode/sideways").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn edit_gesture_maps_to_commands() {
        let (state, mut rx, _hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/route/edit/begin")
            .set_json(json!({"target": "insert", "index": 2}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        let req = test::TestRequest::post()
            .uri("/route/edit/update")
            .set_json(json!({"longitude": 11.9, "latitude": 57.7}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        let req = test::TestRequest::post().uri("/route/edit/commit").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        assert_eq!(rx.try_recv().unwrap(), ConsoleCommand::BeginEdit(EditTarget::Insert(2)));
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsoleCommand::UpdateEdit(Coordinate::new(11.9, 57.7))
        );
        assert_eq!(rx.try_recv().unwrap(), ConsoleCommand::CommitEdit);
    }

    #[actix_web::test]
    async fn move_without_index_is_rejected() {
        let (state, mut rx, _hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/route/edit/begin")
            .set_json(json!({"target": "move"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn extend_defaults_to_the_route_end() {
        let (state, mut rx, _hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/route/extend")
            .set_json(json!({"destination": {"longitude": 12.0, "latitude": 58.0}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsoleCommand::ExtendRoute {
                destination: Some(Coordinate::new(12.0, 58.0)),
                from: LegStart::RouteEnd,
            }
        );
    }

    #[actix_web::test]
    async fn orientation_reaches_registered_listeners() {
        let (state, _rx, hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/orientation")
            .set_json(json!({"alpha": 270.0}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["listeners"], 0);
        assert_eq!(hub.listener_count(), 0);
    }

    #[actix_web::test]
    async fn state_reports_the_initial_mode() {
        let (state, _rx, _hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;
        let req = test::TestRequest::get().uri("/state").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["mode"], "route");
        assert_eq!(body["edit"], serde_json::Value::Null);
        assert_eq!(body["route_fetch_paused"], false);
        assert_eq!(body["configured"], true);
        assert_eq!(body["ais"], json!([]));
    }

    #[actix_web::test]
    async fn traffic_refresh_accepts_an_optional_box() {
        let (state, mut rx, _hub) = server_state();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;

        let req = test::TestRequest::post().uri("/ais").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv().unwrap(), ConsoleCommand::RefreshAis(None));

        let req = test::TestRequest::post()
            .uri("/ais")
            .set_json(json!({"latTop": 57.75, "lonLeft": 11.75, "latBottom": 57.25, "lonRight": 12.25}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsoleCommand::RefreshAis(Some(BoundingBox {
                lat_top: 57.75,
                lon_left: 11.75,
                lat_bottom: 57.25,
                lon_right: 12.25,
            }))
        );
    }

    #[actix_web::test]
    async fn state_stream_emits_on_change() {
        let (state, _rx, _hub) = server_state();
        let console = state.console.clone();
        let app = test::init_service(App::new().app_data(state).configure(routes)).await;
        let req = test::TestRequest::get().uri("/stream_state").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let mut body = resp.into_body();
        assert_eq!(next_chunk(&mut body).await, Bytes::from_static(b"retry: 500\n\n"));
        // first heartbeat tick fires at once
        let first = next_chunk(&mut body).await;
        assert!(first.starts_with(b"id: 1\n"));

        console.editor.begin(EditTarget::Append).unwrap();
        let second = tokio::time::timeout(Duration::from_millis(500), next_chunk(&mut body))
            .await
            .unwrap();
        let text = String::from_utf8(second.to_vec()).unwrap();
        assert!(text.starts_with("id: 2\n"));
        assert!(text.contains("\"route_fetch_paused\":true"));
    }
}
