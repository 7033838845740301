/**
 * MODÈLES - États agrégés des modules et messages MQTT entrants
 *
 * RÔLE : Types partagés entre transport, agrégateur, fan-out et API REST.
 * Les noms de champs côté fil sont en snake_case anglais ; les anciens noms
 * émis par le firmware des modules restent acceptés via `alias`.
 * Une valeur illisible vaut absence : le reste du fragment est appliqué.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Identifiant d'un module capteur (entier positif, 0 refusé).
pub type DeviceId = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Online,
    Offline,
    Timeout,
    #[default]
    #[serde(alias = "DESCONOCIDO")]
    Unknown,
}

/// Résultat de la comparaison compteur attendu / compteur réel, par sens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterStatus {
    #[serde(alias = "correcto", alias = "match")]
    Match,
    #[serde(alias = "mismatch")]
    Mismatch,
    #[serde(alias = "desconectado", alias = "disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default, alias = "up_esperado", deserialize_with = "lenient::deserialize")]
    pub expected_up: Option<i64>,
    #[serde(default, alias = "down_esperado", deserialize_with = "lenient::deserialize")]
    pub expected_down: Option<i64>,
    #[serde(default, alias = "up_actual", deserialize_with = "lenient::deserialize")]
    pub actual_up: Option<i64>,
    #[serde(default, alias = "down_actual", deserialize_with = "lenient::deserialize")]
    pub actual_down: Option<i64>,
    #[serde(default, alias = "estado_up", deserialize_with = "lenient::deserialize")]
    pub up_status: Option<CounterStatus>,
    #[serde(default, alias = "estado_down", deserialize_with = "lenient::deserialize")]
    pub down_status: Option<CounterStatus>,
}

/// Infos techniques d'un module. `extra` récupère tout champ inconnu
/// apporté par les heartbeats (uptime, rssi...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalInfo {
    #[serde(default, alias = "version_firmware", deserialize_with = "lenient::deserialize")]
    pub firmware_version: Option<String>,
    #[serde(default, deserialize_with = "lenient::deserialize")]
    pub ip_address: Option<String>,
    #[serde(default, alias = "temperatura_interna", deserialize_with = "lenient::deserialize")]
    pub internal_temperature: Option<f64>,
    #[serde(default, alias = "voltaje_alimentacion", deserialize_with = "lenient::deserialize")]
    pub supply_voltage: Option<f64>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// État consolidé d'un module, un seul par identifiant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub connection_state: ConnectionState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_heartbeat: Option<OffsetDateTime>,
    pub counters: Option<Counters>,
    pub technical_info: Option<TechnicalInfo>,
    pub details: Option<String>,
}

impl DeviceStatus {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            connection_state: ConnectionState::Unknown,
            last_heartbeat: None,
            counters: None,
            technical_info: None,
            details: None,
        }
    }
}

/// Mesure instantanée, jamais stockée dans la table des états.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementUpdate {
    pub device_id: DeviceId,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub counters_verified: Option<bool>,
    pub mismatch_detected: Option<bool>,
}

/// Message brut tel que reçu du broker, après décodage JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

// ===== Payloads entrants (modules → kernel) =====

/// `devices/{id}/state`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateMessage {
    #[serde(default, deserialize_with = "lenient::deserialize")]
    pub connection_state: Option<ConnectionState>,
    /// ancien nom firmware, prioritaire sur `estado`
    #[serde(default, deserialize_with = "lenient::deserialize")]
    pub estado_conexion: Option<ConnectionState>,
    #[serde(default, deserialize_with = "lenient::deserialize")]
    pub estado: Option<ConnectionState>,
    #[serde(default, alias = "ultimo_heartbeat", deserialize_with = "wire_time::deserialize")]
    pub last_heartbeat: Option<OffsetDateTime>,
    #[serde(default, alias = "apuntes", deserialize_with = "lenient::deserialize")]
    pub counters: Option<Counters>,
    #[serde(default, alias = "info_tecnica", deserialize_with = "lenient::deserialize")]
    pub technical_info: Option<TechnicalInfo>,
    #[serde(default, alias = "detalles", deserialize_with = "lenient::deserialize")]
    pub details: Option<String>,
}

impl StateMessage {
    /// Champ principal puis les deux noms historiques.
    pub fn reported_state(&self) -> Option<ConnectionState> {
        self.connection_state.or(self.estado_conexion).or(self.estado)
    }
}

/// `devices/{id}/measurements`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementsMessage {
    #[serde(default, alias = "temperatura", deserialize_with = "lenient::deserialize")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "presion", deserialize_with = "lenient::deserialize")]
    pub pressure: Option<f64>,
    #[serde(default, deserialize_with = "wire_time::deserialize")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default, alias = "apuntes_verificados", deserialize_with = "lenient::deserialize")]
    pub counters_verified: Option<bool>,
    #[serde(default, alias = "mismatch_detectado", deserialize_with = "lenient::deserialize")]
    pub mismatch_detected: Option<bool>,
}

/// Champ optionnel tolérant : mauvais type ou valeur inconnue → `None`.
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(T::deserialize(value).ok())
    }
}

/// Les modules envoient leurs dates en RFC 3339 ou en millisecondes epoch.
/// Une date illisible vaut absence.
mod wire_time {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use time::{format_description::well_known::Rfc3339, OffsetDateTime};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parsed = match Value::deserialize(deserializer)? {
            Value::String(txt) => OffsetDateTime::parse(&txt, &Rfc3339).ok(),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()),
            _ => None,
        };
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_state_message_accepts_legacy_names() {
        let msg: StateMessage = serde_json::from_value(json!({
            "estado": "OFFLINE",
            "ultimo_heartbeat": "2025-03-01T10:00:00Z",
            "apuntes": { "up_esperado": 4, "estado_up": "correcto" },
            "info_tecnica": { "version_firmware": "1.2.0" },
            "detalles": "sensor reiniciado"
        }))
        .unwrap();

        assert_eq!(msg.reported_state(), Some(ConnectionState::Offline));
        assert_eq!(msg.last_heartbeat, Some(datetime!(2025-03-01 10:00:00 UTC)));
        let counters = msg.counters.unwrap();
        assert_eq!(counters.expected_up, Some(4));
        assert_eq!(counters.up_status, Some(CounterStatus::Match));
        assert_eq!(msg.technical_info.unwrap().firmware_version.as_deref(), Some("1.2.0"));
        assert_eq!(msg.details.as_deref(), Some("sensor reiniciado"));
    }

    #[test]
    fn test_reported_state_priority() {
        let msg: StateMessage = serde_json::from_value(json!({
            "connection_state": "ONLINE",
            "estado_conexion": "TIMEOUT",
            "estado": "OFFLINE"
        }))
        .unwrap();
        assert_eq!(msg.reported_state(), Some(ConnectionState::Online));

        let msg: StateMessage =
            serde_json::from_value(json!({ "estado_conexion": "TIMEOUT", "estado": "OFFLINE" })).unwrap();
        assert_eq!(msg.reported_state(), Some(ConnectionState::Timeout));

        let msg: StateMessage = serde_json::from_value(json!({})).unwrap();
        assert_eq!(msg.reported_state(), None);
    }

    #[test]
    fn test_measurement_timestamp_as_epoch_millis() {
        let msg: MeasurementsMessage = serde_json::from_value(json!({
            "temperatura": 21.5,
            "presion": 1013.2,
            "timestamp": 1_700_000_000_000i64,
            "mismatch_detectado": true
        }))
        .unwrap();

        assert_eq!(msg.temperature, Some(21.5));
        assert_eq!(msg.pressure, Some(1013.2));
        assert_eq!(msg.timestamp.unwrap().unix_timestamp(), 1_700_000_000);
        assert_eq!(msg.mismatch_detected, Some(true));
        assert_eq!(msg.counters_verified, None);
    }

    #[test]
    fn test_technical_info_keeps_unknown_fields() {
        let info: TechnicalInfo = serde_json::from_value(json!({
            "firmware_version": "2.0.1",
            "rssi": -67
        }))
        .unwrap();
        assert_eq!(info.firmware_version.as_deref(), Some("2.0.1"));
        assert_eq!(info.extra.get("rssi"), Some(&json!(-67)));
    }

    #[test]
    fn test_device_status_serialization() {
        let mut status = DeviceStatus::new(7);
        status.last_heartbeat = Some(datetime!(2025-03-01 10:00:00 UTC));
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["device_id"], 7);
        assert_eq!(value["connection_state"], "UNKNOWN");
        assert_eq!(value["last_heartbeat"], "2025-03-01T10:00:00Z");
        assert!(value["counters"].is_null());
    }

    #[test]
    fn test_unreadable_fields_count_as_absent() {
        let msg: StateMessage = serde_json::from_value(json!({
            "estado": "online",
            "last_heartbeat": "yesterday",
            "details": "x",
            "counters": { "expected_up": 3, "actual_up": "three", "up_status": "??" }
        }))
        .unwrap();

        assert_eq!(msg.reported_state(), None);
        assert_eq!(msg.last_heartbeat, None);
        assert_eq!(msg.details.as_deref(), Some("x"));
        let counters = msg.counters.unwrap();
        assert_eq!(counters.expected_up, Some(3));
        assert_eq!(counters.actual_up, None);
        assert_eq!(counters.up_status, None);

        let info: TechnicalInfo =
            serde_json::from_value(json!({ "firmware_version": 2, "ip_address": "10.0.0.2" })).unwrap();
        assert_eq!(info.firmware_version, None);
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.2"));
    }
}
