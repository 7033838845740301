//! Convention de nommage des topics MQTT des modules.
//!
//! Entrant : `{root}/{device_id}/{kind}`
//! Sortant : `{root}/{device_id}/cmd/refresh` et `{root}/all/cmd/refresh`

use crate::error::MessageError;
use crate::models::DeviceId;
use std::fmt;

pub const DEFAULT_TOPIC_ROOT: &str = "devices";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    State,
    Heartbeat,
    Measurements,
    TechnicalInfo,
    Counters,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::State,
        MessageKind::Heartbeat,
        MessageKind::Measurements,
        MessageKind::TechnicalInfo,
        MessageKind::Counters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::State => "state",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Measurements => "measurements",
            MessageKind::TechnicalInfo => "technical-info",
            MessageKind::Counters => "counters",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == segment)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTopic {
    pub device_id: DeviceId,
    pub kind: MessageKind,
}

/// Filtres d'abonnement, un par type de message.
pub fn subscription_filters(root: &str) -> Vec<String> {
    MessageKind::ALL
        .iter()
        .map(|kind| format!("{root}/+/{kind}"))
        .collect()
}

pub fn device_refresh_topic(root: &str, device_id: DeviceId) -> String {
    format!("{root}/{device_id}/cmd/refresh")
}

pub fn broadcast_refresh_topic(root: &str) -> String {
    format!("{root}/all/cmd/refresh")
}

/// Découpe un topic entrant en (device_id, kind).
/// Ex: "devices/12/heartbeat" -> DeviceTopic { device_id: 12, kind: Heartbeat }
pub fn parse_device_topic(root: &str, topic: &str) -> Result<DeviceTopic, MessageError> {
    let mut parts = topic.split('/');
    let (Some(prefix), Some(id), Some(kind), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(MessageError::InvalidTopic(topic.to_string()));
    };
    if prefix != root {
        return Err(MessageError::InvalidTopic(topic.to_string()));
    }

    let device_id = id
        .parse::<DeviceId>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| MessageError::InvalidDeviceId(topic.to_string()))?;

    let kind = MessageKind::from_segment(kind).ok_or_else(|| MessageError::UnknownKind {
        topic: topic.to_string(),
        kind: kind.to_string(),
    })?;

    Ok(DeviceTopic { device_id, kind })
}
