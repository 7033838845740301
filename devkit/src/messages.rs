/*!
Builders de payloads module

Produit les messages JSON tels que publiés par le firmware des modules
(`{root}/{id}/{kind}`), pour alimenter les tests sans matériel.
*/

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

pub struct DeviceMessageBuilder {
    root: String,
}

impl DeviceMessageBuilder {
    pub fn new<S: Into<String>>(root: S) -> Self {
        Self { root: root.into() }
    }

    /// `{root}/{id}/{kind}`
    pub fn topic(&self, device_id: u32, kind: &str) -> String {
        format!("{}/{}/{}", self.root, device_id, kind)
    }

    /// Message `state` minimal, déterministe
    pub fn state(connection_state: &str) -> Value {
        json!({ "connection_state": connection_state })
    }

    /// Message `state` d'un ancien firmware (noms de champs espagnols)
    pub fn state_legacy(estado: &str, firmware: &str) -> Value {
        json!({
            "estado_conexion": estado,
            "ultimo_heartbeat": now(),
            "info_tecnica": { "firmware_version": firmware }
        })
    }

    pub fn heartbeat(firmware: &str, ip: &str) -> Value {
        json!({
            "firmware_version": firmware,
            "ip_address": ip
        })
    }

    pub fn measurements(temperature: f64, pressure: f64, mismatch: bool) -> Value {
        json!({
            "temperature": temperature,
            "pressure": pressure,
            "mismatch_detected": mismatch,
            "timestamp": now()
        })
    }

    pub fn technical_info(firmware: &str, ip: &str, temperature: f64, voltage: f64) -> Value {
        json!({
            "firmware_version": firmware,
            "ip_address": ip,
            "internal_temperature": temperature,
            "supply_voltage": voltage
        })
    }

    /// Compteurs de passage ; statut MATCH/MISMATCH calculé comme le firmware
    pub fn counters(expected_up: i64, expected_down: i64, actual_up: i64, actual_down: i64) -> Value {
        json!({
            "expected_up": expected_up,
            "expected_down": expected_down,
            "actual_up": actual_up,
            "actual_down": actual_down,
            "up_status": counter_status(expected_up, actual_up),
            "down_status": counter_status(expected_down, actual_down)
        })
    }

    /// Commande telle qu'émise par le kernel
    pub fn refresh_command(command: &str) -> Value {
        json!({
            "command": command,
            "timestamp": now()
        })
    }
}

fn counter_status(expected: i64, actual: i64) -> &'static str {
    if expected == actual {
        "MATCH"
    } else {
        "MISMATCH"
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic() {
        let builder = DeviceMessageBuilder::new("plant");
        assert_eq!(builder.topic(12, "technical-info"), "plant/12/technical-info");
    }

    #[test]
    fn test_counters_status() {
        let counters = DeviceMessageBuilder::counters(5, 2, 5, 1);
        assert_eq!(counters["up_status"], "MATCH");
        assert_eq!(counters["down_status"], "MISMATCH");
        assert_eq!(counters["actual_down"], 1);
    }

    #[test]
    fn test_timestamps_are_rfc3339() {
        let m = DeviceMessageBuilder::measurements(20.0, 1000.0, false);
        let ts = m["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(ts.ends_with('Z'));

        let legacy = DeviceMessageBuilder::state_legacy("ONLINE", "0.9.1");
        assert_eq!(legacy["info_tecnica"]["firmware_version"], "0.9.1");
        assert!(legacy.get("connection_state").is_none());
    }
}
