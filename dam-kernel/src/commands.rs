//! Commandes sortantes vers les modules (demandes de rafraîchissement).
//!
//! Fire-and-forget : pas d'accusé de réception, pas de retry. Déconnecté,
//! la commande est loggée puis abandonnée, jamais remontée comme erreur.

use crate::error::TransportError;
use crate::models::DeviceId;
use crate::topics::{broadcast_refresh_topic, device_refresh_topic};
use serde::Serialize;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

/// Ce dont l'éditeur de commandes a besoin côté transport.
pub trait CommandSink {
    fn is_connected(&self) -> bool;
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

impl<T: CommandSink + ?Sized> CommandSink for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        (**self).publish(topic, payload)
    }
}

pub type SharedSink = Arc<dyn CommandSink + Send + Sync>;

#[derive(Debug, Serialize)]
struct RefreshCommand {
    command: &'static str,
    timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Sent,
    NotConnected,
    Failed,
}

#[derive(Clone)]
pub struct CommandPublisher<S> {
    sink: S,
    topic_root: Arc<str>,
}

impl<S: CommandSink> CommandPublisher<S> {
    pub fn new(sink: S, topic_root: &str) -> Self {
        Self { sink, topic_root: Arc::from(topic_root) }
    }

    /// `{root}/{id}/cmd/refresh` ← `refresh_status`
    pub fn refresh_device(&self, device_id: DeviceId) -> CommandOutcome {
        self.send(device_refresh_topic(&self.topic_root, device_id), "refresh_status")
    }

    /// `{root}/all/cmd/refresh` ← `refresh_all_status`
    pub fn refresh_all(&self) -> CommandOutcome {
        self.send(broadcast_refresh_topic(&self.topic_root), "refresh_all_status")
    }

    fn send(&self, topic: String, command: &'static str) -> CommandOutcome {
        if !self.sink.is_connected() {
            warn!("[commands] MQTT not connected, dropping {command} for {topic}");
            return CommandOutcome::NotConnected;
        }

        let timestamp = match OffsetDateTime::now_utc().format(&Rfc3339) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("[commands] cannot format timestamp: {e}");
                return CommandOutcome::Failed;
            }
        };
        let payload = match serde_json::to_vec(&RefreshCommand { command, timestamp }) {
            Ok(p) => p,
            Err(e) => {
                warn!("[commands] cannot encode {command}: {e}");
                return CommandOutcome::Failed;
            }
        };

        match self.sink.publish(&topic, payload) {
            Ok(()) => {
                info!("[commands] sent {command} on {topic}");
                CommandOutcome::Sent
            }
            Err(TransportError::NotConnected) => {
                warn!("[commands] MQTT not connected, dropping {command} for {topic}");
                CommandOutcome::NotConnected
            }
            Err(e) => {
                warn!("[commands] publish {command} on {topic} failed: {e}");
                CommandOutcome::Failed
            }
        }
    }
}
