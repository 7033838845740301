use crate::error::ConfigError;
use crate::hub::DEFAULT_CHANNEL_CAPACITY;
use crate::topics::DEFAULT_TOPIC_ROOT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub registry: RegistryConf,
    pub logging: LoggingConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_interval_ms: u64, // attente entre deux tentatives
    pub connect_timeout_secs: u64,
    pub topic_root: String,
    pub request_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConf {
    /// Borne optionnelle du nombre de modules suivis (éviction du moins récent).
    pub max_devices: Option<usize>,
    /// Passe en TIMEOUT un module ONLINE muet depuis ce délai.
    pub heartbeat_timeout_secs: Option<u64>,
    pub channel_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConf {
    pub level: String,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id_prefix: "dam-kernel".into(),
            keep_alive_secs: 10,
            reconnect_interval_ms: 100,
            connect_timeout_secs: 2,
            topic_root: DEFAULT_TOPIC_ROOT.into(),
            request_capacity: 10,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into(), api_key: None }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self {
            max_devices: None,
            heartbeat_timeout_secs: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for LoggingConf {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl MqttConf {
    pub fn keep_alive(&self) -> Duration {
        // rumqttc refuse un keep-alive < 1s
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl RegistryConf {
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

impl KernelConfig {
    /// La variable DAM_API_KEY prime sur le fichier.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("DAM_API_KEY")
            .ok()
            .or_else(|| self.http.api_key.clone())
            .filter(|k| !k.is_empty())
    }
}

// 30 jours
const MAX_HEARTBEAT_TIMEOUT_SECS: u64 = 30 * 24 * 3600;

pub fn parse_config(txt: &str) -> Result<KernelConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(txt)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &KernelConfig) -> Result<(), ConfigError> {
    let root = &cfg.mqtt.topic_root;
    if root.is_empty() || root.contains(['/', '+', '#']) {
        return Err(ConfigError::Invalid(format!("topic_root must be a single topic level, got '{root}'")));
    }
    if cfg.registry.heartbeat_timeout_secs.is_some_and(|s| s > MAX_HEARTBEAT_TIMEOUT_SECS) {
        return Err(ConfigError::Invalid(format!(
            "registry.heartbeat_timeout_secs must be at most {MAX_HEARTBEAT_TIMEOUT_SECS}"
        )));
    }
    if cfg.mqtt.host.is_empty() {
        return Err(ConfigError::Invalid("mqtt.host is empty".into()));
    }
    Ok(())
}

pub async fn read_config<P: AsRef<Path>>(path: P) -> Result<KernelConfig, ConfigError> {
    let txt = fs::read_to_string(path).await?;
    parse_config(&txt)
}

/// Charge kernel.yaml (ou DAM_KERNEL_CONFIG) ; config par défaut si absent ou invalide.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("DAM_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        warn!("[kernel] no {path}, using default config");
        return KernelConfig::default();
    }
    match read_config(&path).await {
        Ok(cfg) => {
            info!("[kernel] config loaded from {path}");
            cfg
        }
        Err(e) => {
            warn!("[kernel] invalid config {path}: {e}");
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let cfg = parse_config("   \n").unwrap();
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.topic_root, "devices");
        assert_eq!(cfg.mqtt.reconnect_interval(), Duration::from_millis(100));
        assert_eq!(cfg.registry.max_devices, None);
        assert_eq!(cfg.registry.heartbeat_timeout(), None);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg = parse_config(
            "mqtt:\n  host: broker.lan\n  port: 1884\nregistry:\n  max_devices: 200\n  heartbeat_timeout_secs: 90\n",
        )
        .unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1884);
        assert_eq!(cfg.mqtt.keep_alive(), Duration::from_secs(10));
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
        assert_eq!(cfg.registry.max_devices, Some(200));
        assert_eq!(cfg.registry.heartbeat_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_invalid_topic_root_rejected() {
        assert!(matches!(
            parse_config("mqtt:\n  topic_root: devices/+\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_oversized_heartbeat_timeout_rejected() {
        assert!(matches!(
            parse_config("registry:\n  heartbeat_timeout_secs: 18446744073709551615\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(parse_config("registry:\n  heartbeat_timeout_secs: 2592000\n").is_ok());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(matches!(parse_config("mqtt: [unclosed"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_shipped_config_parses() {
        let cfg = parse_config(include_str!("../kernel.yaml")).unwrap();
        assert_eq!(cfg.mqtt.client_id_prefix, "dam-kernel");
        assert_eq!(cfg.http.api_key, None);
        assert_eq!(cfg.registry.heartbeat_timeout(), Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_read_config_from_file() {
        let dir = std::env::temp_dir().join(format!("dam-kernel-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("kernel.yaml");
        std::fs::write(&path, "http:\n  bind: 127.0.0.1:9090\n").unwrap();

        let cfg = read_config(&path).await.unwrap();
        assert_eq!(cfg.http.bind, "127.0.0.1:9090");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
