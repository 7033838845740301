/**
 * RÈGLES DE FUSION - Une fonction pure par type de message
 *
 * RÔLE : Appliquer un fragment entrant sur l'état connu d'un module.
 * Chaque règle prend l'état courant par valeur et rend l'état mis à jour.
 *
 * FONCTIONNEMENT :
 * - Recouvrement champ par champ : un champ présent écrase, un champ absent
 *   laisse la valeur stockée intacte (last-write-wins par champ)
 * - `now` est injecté par l'appelant, aucune règle ne lit l'horloge
 */

use crate::models::{
    ConnectionState, Counters, DeviceId, DeviceStatus, MeasurementUpdate, MeasurementsMessage,
    StateMessage, TechnicalInfo,
};
use time::OffsetDateTime;

/// `state` : état de connexion (avec repli sur les anciens noms), heartbeat,
/// fusion profonde des compteurs et infos techniques, détails.
pub fn apply_state(mut status: DeviceStatus, msg: &StateMessage, now: OffsetDateTime) -> DeviceStatus {
    if let Some(state) = msg.reported_state() {
        status.connection_state = state;
    }
    status.last_heartbeat = Some(msg.last_heartbeat.unwrap_or(now));
    if let Some(counters) = &msg.counters {
        status.counters = Some(overlay_counters(status.counters.take(), counters));
    }
    if let Some(info) = &msg.technical_info {
        status.technical_info = Some(overlay_technical_info(status.technical_info.take(), info, true));
    }
    if let Some(details) = msg.details.as_deref().filter(|d| !d.is_empty()) {
        status.details = Some(details.to_string());
    }
    status
}

/// `heartbeat` : force ONLINE, rafraîchit le heartbeat et fusionne
/// tout le payload dans les infos techniques.
pub fn apply_heartbeat(mut status: DeviceStatus, info: &TechnicalInfo, now: OffsetDateTime) -> DeviceStatus {
    status.connection_state = ConnectionState::Online;
    status.last_heartbeat = Some(now);
    status.technical_info = Some(overlay_technical_info(status.technical_info.take(), info, true));
    status
}

/// `technical-info` : seulement les quatre champs connus.
pub fn apply_technical_info(mut status: DeviceStatus, info: &TechnicalInfo) -> DeviceStatus {
    status.technical_info = Some(overlay_technical_info(status.technical_info.take(), info, false));
    status
}

/// `counters` : seulement les champs compteurs / comparaison.
pub fn apply_counters(mut status: DeviceStatus, counters: &Counters) -> DeviceStatus {
    status.counters = Some(overlay_counters(status.counters.take(), counters));
    status
}

/// `measurements` : ne touche pas l'état, produit un événement éphémère.
pub fn measurement_update(device_id: DeviceId, msg: &MeasurementsMessage, now: OffsetDateTime) -> MeasurementUpdate {
    MeasurementUpdate {
        device_id,
        temperature: msg.temperature,
        pressure: msg.pressure,
        timestamp: msg.timestamp.unwrap_or(now),
        counters_verified: msg.counters_verified,
        mismatch_detected: msg.mismatch_detected,
    }
}

fn overlay_counters(existing: Option<Counters>, incoming: &Counters) -> Counters {
    let mut merged = existing.unwrap_or_default();
    overlay(&mut merged.expected_up, &incoming.expected_up);
    overlay(&mut merged.expected_down, &incoming.expected_down);
    overlay(&mut merged.actual_up, &incoming.actual_up);
    overlay(&mut merged.actual_down, &incoming.actual_down);
    overlay(&mut merged.up_status, &incoming.up_status);
    overlay(&mut merged.down_status, &incoming.down_status);
    merged
}

fn overlay_technical_info(existing: Option<TechnicalInfo>, incoming: &TechnicalInfo, with_extra: bool) -> TechnicalInfo {
    let mut merged = existing.unwrap_or_default();
    overlay(&mut merged.firmware_version, &incoming.firmware_version);
    overlay(&mut merged.ip_address, &incoming.ip_address);
    overlay(&mut merged.internal_temperature, &incoming.internal_temperature);
    overlay(&mut merged.supply_voltage, &incoming.supply_voltage);
    if with_extra {
        merged
            .extra
            .extend(incoming.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

fn overlay<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = Some(value.clone());
    }
}
