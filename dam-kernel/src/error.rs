use crate::topics::MessageKind;

/// Erreurs côté transport MQTT : jamais remontées aux consommateurs,
/// seulement loggées par l'appelant.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("MQTT client not connected")]
    NotConnected,
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Raisons pour lesquelles un message entrant est écarté.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("topic outside device namespace: {0}")]
    InvalidTopic(String),
    #[error("invalid device id in topic {0}")]
    InvalidDeviceId(String),
    #[error("unknown message kind '{kind}' on {topic}")]
    UnknownKind { topic: String, kind: String },
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
