use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use device_gateway::{DeviceGatewayConfig, HttpDeviceGateway};
use server_api::{ApiContext, ControllerSettings};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{error, info};

mod api;
mod app_state;
mod callbacks;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let gateway = HttpDeviceGateway::new(&DeviceGatewayConfig {
        uri: settings.votecollector_uri.clone(),
        timeout: settings.device_timeout(),
    })?;
    let callback_base_url = settings.callback_base_url()?;
    info!(device = %gateway.base_url(), %callback_base_url, "vote collector configured");

    let api = ApiContext::new(
        storage,
        Arc::new(gateway),
        ControllerSettings {
            callback_base_url,
            stop_timeout: settings.device_timeout(),
        },
    );
    let (events, _) = broadcast::channel(256);

    let state = AppState { api, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/keypads", get(api::list_keypads))
        .route("/votecollector/device", get(api::device_status))
        .route("/votecollector/start/motion/:poll_id", post(api::start_motion))
        .route("/votecollector/start/election/:poll_id", post(api::start_election))
        .route("/votecollector/start/speaker_list/:item_id", post(api::start_speaker_list))
        .route("/votecollector/start/ping", post(api::start_ping))
        .route("/votecollector/stop", post(api::stop))
        .route("/votecollector/status", get(api::status))
        .route("/votecollector/result/motion/:poll_id", get(api::motion_result))
        .route("/votecollector/result/election/:poll_id", get(api::election_result))
        .route("/votecollector/anonymize/motion/:poll_id", post(api::anonymize_motion))
        .route("/votecollector/anonymize/election/:poll_id", post(api::anonymize_election))
        .route("/votecollector/votes/motion/:poll_id", get(api::motion_votes))
        .route("/votecollector/votes/election/:poll_id", get(api::election_votes))
        .route("/votecollector/session", get(api::session))
        .route("/votecollector/overlay", get(api::overlay))
        .route("/votecollector/vote/:poll_id/:keypad_id", post(callbacks::vote))
        .route("/votecollector/candidate/:poll_id/:keypad_id", post(callbacks::candidate))
        .route("/votecollector/speaker/:item_id/:keypad_id", post(callbacks::speaker))
        .route("/votecollector/keypad", post(callbacks::keepalive_server))
        .route("/votecollector/keypad/", post(callbacks::keepalive_server))
        .route("/votecollector/keypad/:keypad_id", post(callbacks::keepalive_keypad))
        .route("/votecollector/keypad/:poll_id/:keypad_id", post(callbacks::keepalive))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (axum::http::StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// Pushes session, overlay, vote and keypad events to a presentation client.
async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "websocket client lagging, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
