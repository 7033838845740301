/**
 * API REST DAM - Vue HTTP sur l'état des modules
 *
 * RÔLE :
 * Expose en lecture la table des états fusionnés et permet de demander
 * un rafraîchissement aux modules. Interface pour le dashboard et les scripts.
 *
 * FONCTIONNEMENT :
 * - Routes : /health, /system/health, /system/mqtt/reconnect, /devices, /devices/{id},
 *   /devices/.../refresh
 * - Sérialisation JSON automatique des réponses
 * - Clé API optionnelle : si configurée, header x-api-key requis sauf sur /health
 */

use crate::aggregator::StatusAggregator;
use crate::commands::{CommandOutcome, CommandPublisher, SharedSink};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{DeviceId, DeviceStatus};
use crate::mqtt::MqttHandle;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: StatusAggregator,
    pub commands: CommandPublisher<SharedSink>,
    pub health: HealthTracker,
    pub mqtt: Option<MqttHandle>,
    pub api_key: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    status: DeviceStatus,
    silent_for_seconds: Option<i64>, // âge du dernier heartbeat
}

fn to_view(status: DeviceStatus) -> DeviceView {
    let now = OffsetDateTime::now_utc();
    let silent_for_seconds = status
        .last_heartbeat
        .map(|hb| (now - hb).whole_seconds().max(0));
    DeviceView { status, silent_for_seconds }
}

#[derive(Debug, Serialize)]
struct CommandReply {
    sent: bool,
    outcome: CommandOutcome,
}

fn command_reply(outcome: CommandOutcome) -> (StatusCode, Json<CommandReply>) {
    let code = match outcome {
        CommandOutcome::Sent => StatusCode::ACCEPTED,
        CommandOutcome::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        CommandOutcome::Failed => StatusCode::BAD_GATEWAY,
    };
    (code, Json(CommandReply { sent: outcome == CommandOutcome::Sent, outcome }))
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("[http] rejected {} {}: bad or missing x-api-key", req.method(), req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/system/mqtt/reconnect", post(reconnect_mqtt))
        .route("/devices", get(list_devices))
        .route("/devices/refresh", post(refresh_all))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/refresh", post(refresh_device))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(app.aggregator.device_count()))
}

// POST /system/mqtt/reconnect
async fn reconnect_mqtt(State(app): State<AppState>) -> StatusCode {
    match &app.mqtt {
        Some(handle) => {
            info!("[http] manual MQTT reconnect requested");
            handle.reconnect();
            StatusCode::ACCEPTED
        }
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// GET /devices (liste triée par id)
async fn list_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    Json(app.aggregator.snapshot().into_values().map(to_view).collect())
}

// GET /devices/{id}
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<DeviceView>, StatusCode> {
    app.aggregator
        .get(id)
        .map(|s| Json(to_view(s)))
        .ok_or(StatusCode::NOT_FOUND)
}

// POST /devices/{id}/refresh (0 n'est jamais un module)
async fn refresh_device(
    State(app): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<(StatusCode, Json<CommandReply>), StatusCode> {
    if id == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(command_reply(app.commands.refresh_device(id)))
}

// POST /devices/refresh
async fn refresh_all(State(app): State<AppState>) -> (StatusCode, Json<CommandReply>) {
    command_reply(app.commands.refresh_all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConf;
    use crate::hub::StatusHub;
    use dam_devkit::{DeviceMessageBuilder, MockMqttClient};

    fn app(mock: &MockMqttClient) -> AppState {
        let aggregator = StatusAggregator::new(&RegistryConf::default(), "devices", StatusHub::new(8));
        let sink: SharedSink = Arc::new(mock.clone());
        AppState {
            commands: CommandPublisher::new(sink, "devices"),
            aggregator,
            health: HealthTracker::new(),
            mqtt: None,
            api_key: None,
        }
    }

    #[tokio::test]
    async fn test_get_device_found_and_missing() {
        let mock = MockMqttClient::new();
        let state = app(&mock);
        state
            .aggregator
            .handle_message("devices/7/heartbeat", &DeviceMessageBuilder::heartbeat("1.0.0", "10.0.0.7"))
            .unwrap();

        let Json(view) = get_device(State(state.clone()), Path(7)).await.unwrap();
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["device_id"], 7);
        assert_eq!(value["connection_state"], "ONLINE");
        assert!(value["silent_for_seconds"].as_i64().unwrap() >= 0);

        let missing = get_device(State(state), Path(8)).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_devices_sorted() {
        let mock = MockMqttClient::new();
        let state = app(&mock);
        for id in [30, 4, 12] {
            state
                .aggregator
                .handle_message(&format!("devices/{id}/state"), &DeviceMessageBuilder::state("OFFLINE"))
                .unwrap();
        }

        let Json(list) = list_devices(State(state)).await;
        let ids: Vec<DeviceId> = list.iter().map(|v| v.status.device_id).collect();
        assert_eq!(ids, vec![4, 12, 30]);
    }

    #[tokio::test]
    async fn test_refresh_endpoints() {
        let mock = MockMqttClient::new();
        let state = app(&mock);

        let (code, Json(reply)) = refresh_device(State(state.clone()), Path(5)).await.unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);
        assert!(reply.sent);
        assert_eq!(mock.find_messages_by_topic("devices/5/cmd/refresh").len(), 1);

        mock.set_connected(false);
        let (code, Json(reply)) = refresh_all(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply.outcome, CommandOutcome::NotConnected);
        assert!(mock.find_messages_by_topic("devices/all/cmd/refresh").is_empty());
    }

    #[tokio::test]
    async fn test_refresh_device_zero_rejected() {
        let mock = MockMqttClient::new();
        let state = app(&mock);

        let result = refresh_device(State(state), Path(0)).await;
        assert_eq!(result.unwrap_err(), StatusCode::BAD_REQUEST);
        assert!(mock.get_published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_system_health() {
        let mock = MockMqttClient::new();
        let state = app(&mock);
        state.health.record_processed();
        state
            .aggregator
            .handle_message("devices/1/heartbeat", &DeviceMessageBuilder::heartbeat("1.0.0", "10.0.0.1"))
            .unwrap();

        let Json(health) = get_system_health(State(state.clone())).await;
        assert_eq!(health.devices_tracked, 1);
        assert_eq!(health.messages_processed, 1);

        // pas de transport attaché
        assert_eq!(reconnect_mqtt(State(state)).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_api_key_guard() {
        let mock = MockMqttClient::new();
        let mut state = app(&mock);
        state.api_key = Some(Arc::from("s3cret"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });

        let health = raw_request(addr, "GET /health HTTP/1.1\r\nHost: kernel\r\nConnection: close\r\n\r\n").await;
        assert!(health.starts_with("HTTP/1.1 200"), "{health}");

        let denied = raw_request(addr, "GET /devices HTTP/1.1\r\nHost: kernel\r\nConnection: close\r\n\r\n").await;
        assert!(denied.starts_with("HTTP/1.1 401"), "{denied}");

        let allowed = raw_request(
            addr,
            "GET /devices HTTP/1.1\r\nHost: kernel\r\nx-api-key: s3cret\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(allowed.starts_with("HTTP/1.1 200"), "{allowed}");
        assert!(allowed.ends_with("[]"));

        server.abort();
    }
}
