/**
 * STATUS HUB - Diffusion des événements vers les observateurs
 *
 * RÔLE : Découpler le producteur (transport + agrégateur) des consommateurs
 * (API REST, logger, futurs dashboards).
 *
 * FONCTIONNEMENT :
 * - Trois canaux broadcast indépendants : messages bruts, états fusionnés, mesures
 * - Un abonné reçoit uniquement ce qui est publié après son abonnement
 * - Un abonné lent perd les plus anciens événements (Lagged) sans bloquer les autres
 */

use crate::models::{DeviceStatus, MeasurementUpdate, RawMessage};
use tokio::sync::broadcast;
use tokio::task::{self, JoinHandle};
use tracing::{debug, trace, warn};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct StatusHub {
    raw: broadcast::Sender<RawMessage>,
    status: broadcast::Sender<DeviceStatus>,
    measurements: broadcast::Sender<MeasurementUpdate>,
}

impl StatusHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (raw, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        let (measurements, _) = broadcast::channel(capacity);
        Self { raw, status, measurements }
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawMessage> {
        self.raw.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<DeviceStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_measurements(&self) -> broadcast::Receiver<MeasurementUpdate> {
        self.measurements.subscribe()
    }

    // Sans abonné, `send` échoue : l'événement est simplement perdu.
    // Les trois publish renvoient le nombre d'abonnés atteints.

    pub fn publish_raw(&self, message: RawMessage) -> usize {
        self.raw.send(message).unwrap_or(0)
    }

    pub fn publish_status(&self, status: DeviceStatus) -> usize {
        self.status.send(status).unwrap_or(0)
    }

    pub fn publish_measurement(&self, update: MeasurementUpdate) -> usize {
        self.measurements.send(update).unwrap_or(0)
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Abonné de base : trace chaque message brut, état fusionné et mesure.
pub fn spawn_status_logger(hub: &StatusHub) -> JoinHandle<()> {
    let mut raw = hub.subscribe_raw();
    let mut statuses = hub.subscribe_status();
    let mut measurements = hub.subscribe_measurements();

    task::spawn(async move {
        loop {
            tokio::select! {
                message = raw.recv() => match message {
                    Ok(m) => trace!("[hub] raw {} {}", m.topic, m.payload),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!("[hub] raw logger lagged, {n} events skipped"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                status = statuses.recv() => match status {
                    Ok(s) => debug!(
                        "[hub] device {} -> {:?} (last heartbeat: {:?})",
                        s.device_id, s.connection_state, s.last_heartbeat
                    ),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!("[hub] status logger lagged, {n} events skipped"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                update = measurements.recv() => match update {
                    Ok(m) => debug!(
                        "[hub] device {} measurement: temperature={:?} pressure={:?} mismatch={:?}",
                        m.device_id, m.temperature, m.pressure, m.mismatch_detected
                    ),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!("[hub] measurement logger lagged, {n} events skipped"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
