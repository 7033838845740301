/**
 * TRANSPORT MQTT - Connexion broker, abonnements, décodage, reconnexion
 *
 * RÔLE : Seul point de contact avec le broker. Décode chaque publish en JSON
 * et le confie à l'agrégateur ; expose publish / reconnect / shutdown.
 *
 * FONCTIONNEMENT :
 * - Une task unique pilote l'event loop rumqttc : chaque message est traité
 *   jusqu'au bout avant le suivant
 * - À chaque CONNACK : abonnement aux cinq filtres `{root}/+/{kind}`
 * - Erreur réseau : log, état déconnecté, pause courte puis nouveau poll
 *   (rumqttc se reconnecte au poll suivant)
 * - reconnect() : on jette le couple client/event loop et on en recrée un
 */

use crate::aggregator::{Applied, StatusAggregator};
use crate::commands::CommandSink;
use crate::config::MqttConf;
use crate::error::{MessageError, TransportError};
use crate::health::HealthTracker;
use crate::models::RawMessage;
use crate::state::{new_state, Shared};
use crate::topics::subscription_filters;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, NetworkOptions, QoS};
use serde_json::Value;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportControl {
    Reconnect,
    Shutdown,
}

enum LoopExit {
    Reconnect,
    Shutdown,
}

/// Poignée clonable vers le transport.
#[derive(Clone)]
pub struct MqttHandle {
    client: Shared<Option<AsyncClient>>,
    connected: watch::Receiver<bool>,
    control: mpsc::UnboundedSender<TransportControl>,
}

impl MqttHandle {
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Publication non bloquante, QoS 0.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let client = self.client.lock().clone().ok_or(TransportError::NotConnected)?;
        client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        debug!("[mqtt] published on {topic}");
        Ok(())
    }

    pub fn reconnect(&self) {
        if self.control.send(TransportControl::Reconnect).is_err() {
            warn!("[mqtt] reconnect requested but transport task is gone");
        }
    }

    pub fn shutdown(&self) {
        if self.control.send(TransportControl::Shutdown).is_err() {
            debug!("[mqtt] transport task already stopped");
        }
    }
}

impl CommandSink for MqttHandle {
    fn is_connected(&self) -> bool {
        MqttHandle::is_connected(self)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        MqttHandle::publish(self, topic, payload)
    }
}

pub fn create_mqtt_client(cfg: &MqttConf) -> (AsyncClient, EventLoop) {
    let suffix = Uuid::new_v4().simple().to_string();
    let client_id = format!("{}-{}", cfg.client_id_prefix, &suffix[..8]);

    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(cfg.keep_alive());
    opts.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(opts, cfg.request_capacity.max(1));
    let mut network = NetworkOptions::new();
    network.set_connection_timeout(cfg.connect_timeout_secs.max(1));
    eventloop.set_network_options(network);
    (client, eventloop)
}

/// Démarre la task transport. Le transport vit jusqu'à `shutdown()`.
pub fn spawn_mqtt_transport(
    cfg: MqttConf,
    aggregator: StatusAggregator,
    health: HealthTracker,
) -> (MqttHandle, JoinHandle<()>) {
    let slot: Shared<Option<AsyncClient>> = new_state(None);
    let (connected_tx, connected_rx) = watch::channel(false);
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();

    let handle = MqttHandle {
        client: slot.clone(),
        connected: connected_rx,
        control: control_tx,
    };

    let join = task::spawn(async move {
        info!("[mqtt] connecting to {}:{}", cfg.host, cfg.port);
        loop {
            let (client, mut eventloop) = create_mqtt_client(&cfg);
            *slot.lock() = Some(client.clone());

            let exit = drive_event_loop(&cfg, &client, &mut eventloop, &mut control_rx, &connected_tx, &aggregator, &health).await;

            connected_tx.send_replace(false);
            health.mark_mqtt_disconnected();
            if let Err(e) = client.try_disconnect() {
                debug!("[mqtt] disconnect request failed: {e}");
            }
            // laisse partir le DISCONNECT sans bloquer l'arrêt
            let _ = tokio::time::timeout(Duration::from_millis(500), eventloop.poll()).await;

            match exit {
                LoopExit::Reconnect => {
                    health.increment_reconnects();
                    info!("[mqtt] manual reconnect, rebuilding client");
                }
                LoopExit::Shutdown => {
                    slot.lock().take();
                    info!("[mqtt] transport stopped");
                    break;
                }
            }
        }
    });

    (handle, join)
}

async fn drive_event_loop(
    cfg: &MqttConf,
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    control: &mut mpsc::UnboundedReceiver<TransportControl>,
    connected: &watch::Sender<bool>,
    aggregator: &StatusAggregator,
    health: &HealthTracker,
) -> LoopExit {
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("[mqtt] connected to {}:{}", cfg.host, cfg.port);
                        connected.send_replace(true);
                        health.mark_mqtt_connected();
                        subscribe_device_topics(client, &cfg.topic_root);
                    } else {
                        warn!("[mqtt] connection refused by broker: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    dispatch_publish(aggregator, health, &publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    warn!("[mqtt] broker closed the session");
                    connected.send_replace(false);
                    health.mark_mqtt_disconnected();
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[mqtt] connection error: {e}");
                    connected.send_replace(false);
                    health.increment_reconnects();
                    tokio::time::sleep(cfg.reconnect_interval()).await;
                }
            },
            control_msg = control.recv() => {
                return match control_msg {
                    Some(TransportControl::Reconnect) => LoopExit::Reconnect,
                    Some(TransportControl::Shutdown) | None => LoopExit::Shutdown,
                };
            }
        }
    }
}

fn subscribe_device_topics(client: &AsyncClient, root: &str) {
    for filter in subscription_filters(root) {
        match client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
            Ok(()) => info!("[mqtt] subscribed to {filter}"),
            Err(e) => error!("[mqtt] subscribe {filter} failed: {e}"),
        }
    }
}

pub fn decode_payload(bytes: &[u8]) -> Result<Value, TransportError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Traite un publish entrant de bout en bout : décodage, message brut,
/// fusion. Aucune erreur ne sort d'ici.
pub fn dispatch_publish(aggregator: &StatusAggregator, health: &HealthTracker, topic: &str, bytes: &[u8]) {
    let payload = match decode_payload(bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!("[mqtt] dropping message on {topic}: {e}");
            health.record_dropped();
            return;
        }
    };

    aggregator.hub().publish_raw(RawMessage {
        topic: topic.to_string(),
        payload: payload.clone(),
        received_at: OffsetDateTime::now_utc(),
    });

    match aggregator.handle_message(topic, &payload) {
        Ok(Applied::Status(status)) => {
            health.record_processed();
            debug!("[mqtt] {topic} merged into device {}", status.device_id);
        }
        Ok(Applied::Measurement(update)) => {
            health.record_processed();
            debug!("[mqtt] {topic} measurement for device {}", update.device_id);
        }
        Err(e @ MessageError::Payload { .. }) => {
            warn!("[mqtt] dropping message on {topic}: {e}");
            health.record_dropped();
        }
        Err(e) => {
            debug!("[mqtt] ignoring message on {topic}: {e}");
            health.record_dropped();
        }
    }
}
