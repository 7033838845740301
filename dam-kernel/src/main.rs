/**
 * DAM KERNEL - Point d'entrée du service de supervision des modules
 *
 * RÔLE : Orchestration de tous les modules : config, transport MQTT, agrégation,
 * fan-out, commandes, HTTP, health.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : MQTT → agrégateur → canaux broadcast + API REST en lecture.
 * UTILITÉ : Vue unique et à jour de l'état de chaque module du barrage.
 */

mod aggregator;
mod commands;
mod config;
mod error;
mod health;
mod http;
mod hub;
mod merge;
mod models;
mod monitor;
mod mqtt;
mod state;
mod topics;

use crate::aggregator::StatusAggregator;
use crate::commands::{CommandPublisher, SharedSink};
use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::hub::{spawn_status_logger, StatusHub};

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    // RUST_LOG prioritaire, sinon info puis niveau de la config
    let from_env = std::env::var_os("RUST_LOG").is_some();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .init();

    let cfg = load_config().await;
    if !from_env {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&cfg.logging.level)) {
            warn!("[kernel] cannot apply log level {}: {e}", cfg.logging.level);
        }
    }

    // agrégation + fan-out
    let hub = StatusHub::new(cfg.registry.channel_capacity);
    let aggregator = StatusAggregator::new(&cfg.registry, &cfg.mqtt.topic_root, hub.clone());
    let health = HealthTracker::new();

    // transport MQTT
    let (mqtt_handle, mqtt_task) = mqtt::spawn_mqtt_transport(cfg.mqtt.clone(), aggregator.clone(), health.clone());

    let status_logger = spawn_status_logger(&hub);
    let staleness = cfg
        .registry
        .heartbeat_timeout()
        .map(|timeout| monitor::spawn_staleness_monitor(aggregator.clone(), timeout));

    let sink: SharedSink = Arc::new(mqtt_handle.clone());
    let api_key = cfg.resolved_api_key().map(Arc::<str>::from);
    if api_key.is_none() {
        warn!("[http] no API key configured, API is open");
    }

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        aggregator,
        commands: CommandPublisher::new(sink, &cfg.mqtt.topic_root),
        health,
        mqtt: Some(mqtt_handle.clone()),
        api_key,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("cannot bind HTTP on {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("[kernel] ctrl-c handler failed: {e}");
            }
            info!("[kernel] shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    // arrêt propre : DISCONNECT MQTT puis fin des tâches
    mqtt_handle.shutdown();
    if let Err(e) = mqtt_task.await {
        warn!("[kernel] transport task ended abnormally: {e}");
    }
    if let Some(task) = staleness {
        task.abort();
    }
    status_logger.abort();

    info!("[kernel] stopped");
    Ok(())
}
