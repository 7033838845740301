/**
 * AGRÉGATEUR D'ÉTATS - Fusion des fragments MQTT en un état par module
 *
 * RÔLE :
 * Possède la table des états modules et applique, message par message,
 * la règle de fusion correspondant au type de topic.
 *
 * FONCTIONNEMENT :
 * - Topic → (device_id, kind) ; topic invalide = message écarté, rien ne change
 * - state / heartbeat / technical-info / counters : fusion puis diffusion de l'état complet
 * - measurements : aucune écriture en table, une MeasurementUpdate diffusée
 * - Le verrou n'est tenu que le temps d'une fusion, jamais à travers un `.await`
 *
 * UTILITÉ :
 * 🎯 Vue cohérente par module malgré des messages fragmentés
 * 🎯 Lecture instantanée pour l'API REST (get / snapshot)
 */

use crate::config::RegistryConf;
use crate::error::MessageError;
use crate::hub::StatusHub;
use crate::merge;
use crate::models::{
    ConnectionState, Counters, DeviceId, DeviceStatus, MeasurementUpdate, MeasurementsMessage,
    StateMessage, TechnicalInfo,
};
use crate::state::{new_state, DeviceTable, Shared};
use crate::topics::{parse_device_topic, MessageKind};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Effet d'un message sur l'agrégateur.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Status(DeviceStatus),
    Measurement(MeasurementUpdate),
}

#[derive(Clone)]
pub struct StatusAggregator {
    table: Shared<DeviceTable>,
    hub: StatusHub,
    topic_root: Arc<str>,
}

impl StatusAggregator {
    pub fn new(registry: &RegistryConf, topic_root: &str, hub: StatusHub) -> Self {
        Self {
            table: new_state(DeviceTable::new(registry.max_devices)),
            hub,
            topic_root: Arc::from(topic_root),
        }
    }

    pub fn hub(&self) -> &StatusHub {
        &self.hub
    }

    pub fn handle_message(&self, topic: &str, payload: &Value) -> Result<Applied, MessageError> {
        self.handle_message_at(topic, payload, OffsetDateTime::now_utc())
    }

    /// Applique un message décodé. `now` sert de date de heartbeat
    /// et de date de mesure quand le payload n'en fournit pas.
    pub fn handle_message_at(
        &self,
        topic: &str,
        payload: &Value,
        now: OffsetDateTime,
    ) -> Result<Applied, MessageError> {
        let target = parse_device_topic(&self.topic_root, topic)?;
        let id = target.device_id;

        let status = match target.kind {
            MessageKind::Measurements => {
                let msg: MeasurementsMessage = decode(target.kind, payload)?;
                let update = merge::measurement_update(id, &msg, now);
                self.hub.publish_measurement(update.clone());
                return Ok(Applied::Measurement(update));
            }
            MessageKind::State => {
                let msg: StateMessage = decode(target.kind, payload)?;
                self.update(id, |current| merge::apply_state(current, &msg, now))
            }
            MessageKind::Heartbeat => {
                let info = heartbeat_info(payload);
                self.update(id, |current| merge::apply_heartbeat(current, &info, now))
            }
            MessageKind::TechnicalInfo => {
                let info: TechnicalInfo = decode(target.kind, payload)?;
                self.update(id, |current| merge::apply_technical_info(current, &info))
            }
            MessageKind::Counters => {
                let counters: Counters = decode(target.kind, payload)?;
                self.update(id, |current| merge::apply_counters(current, &counters))
            }
        };

        Ok(Applied::Status(status))
    }

    /// Lecture-fusion-écriture-diffusion sous un seul verrou : l'ordre des
    /// événements diffusés suit l'ordre des écritures en table.
    fn update<F>(&self, device_id: DeviceId, rule: F) -> DeviceStatus
    where
        F: FnOnce(DeviceStatus) -> DeviceStatus,
    {
        let mut table = self.table.lock();
        let updated = rule(table.current_or_new(device_id));
        if let Some(evicted) = table.upsert(updated.clone()) {
            info!("[aggregator] registry full, evicted device {evicted}");
        }
        self.hub.publish_status(updated.clone());
        updated
    }

    pub fn get(&self, device_id: DeviceId) -> Option<DeviceStatus> {
        self.table.lock().get(device_id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<DeviceId, DeviceStatus> {
        self.table.lock().snapshot()
    }

    pub fn device_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Passe en TIMEOUT les modules ONLINE dont le dernier heartbeat date
    /// de plus de `timeout`, et diffuse leur nouvel état.
    pub fn mark_stale(&self, timeout: Duration, now: OffsetDateTime) -> Vec<DeviceId> {
        // délai plus long que l'histoire : rien n'est périmé
        let Some(threshold) = now.checked_sub(timeout_as_time(timeout)) else {
            return Vec::new();
        };

        let mut table = self.table.lock();
        let mut expired = Vec::new();
        for status in table
            .values_mut()
            .filter(|s| s.connection_state == ConnectionState::Online)
            .filter(|s| s.last_heartbeat.map_or(true, |hb| hb < threshold))
        {
            status.connection_state = ConnectionState::Timeout;
            self.hub.publish_status(status.clone());
            expired.push(status.device_id);
        }
        expired
    }
}

fn timeout_as_time(timeout: Duration) -> time::Duration {
    time::Duration::try_from(timeout).unwrap_or(time::Duration::MAX)
}

/// Un heartbeat vaut preuve de vie quel que soit son contenu : un payload
/// qui n'est pas un objet n'apporte simplement aucune info technique.
fn heartbeat_info(payload: &Value) -> TechnicalInfo {
    if !payload.is_object() {
        debug!("[aggregator] heartbeat without object payload, liveness only");
        return TechnicalInfo::default();
    }
    TechnicalInfo::deserialize(payload).unwrap_or_else(|e| {
        debug!("[aggregator] heartbeat fields ignored: {e}");
        TechnicalInfo::default()
    })
}

fn decode<T: DeserializeOwned>(kind: MessageKind, payload: &Value) -> Result<T, MessageError> {
    T::deserialize(payload).map_err(|source| {
        debug!("[aggregator] {kind} payload rejected: {source}");
        MessageError::Payload { kind, source }
    })
}
