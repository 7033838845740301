/*!
Mock MQTT Client pour développement sans broker

Permet de tester le kernel sans démarrer un broker MQTT réel.
Enregistre tous les messages publiés, simule la réception et l'état de connexion.
*/

use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
    connected: Arc<AtomicBool>,
}

impl MockMqttClient {
    /// Client connecté par défaut
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            message_sender: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simule une perte ou un retour de connexion broker
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        log::info!("[mock] connection {}", if connected { "up" } else { "down" });
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Publication non bloquante (compatible avec AsyncClient::try_publish)
    pub fn try_publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        if !self.is_connected() {
            bail!("not connected, cannot publish to {topic}");
        }

        let message = MockMessage {
            topic,
            payload: payload.into(),
            qos,
            retain,
        };
        log::info!("[mock] published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().unwrap().push(message);
        Ok(())
    }

    /// Simule la réception d'un message (pour tests)
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        };

        if let Some(sender) = self.message_sender.lock().unwrap().as_ref() {
            sender.send(message.clone()).map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }

        log::info!("[mock] simulated incoming: {}", message.topic);
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceMessageBuilder;

    #[test]
    fn test_disconnected_client_refuses_publish() {
        crate::init_test_logging();
        let client = MockMqttClient::new();
        client.set_connected(false);

        assert!(client.try_publish("devices/all/cmd/refresh", QoS::AtMostOnce, false, b"{}".to_vec()).is_err());
        assert!(client.get_published_messages().is_empty());

        client.set_connected(true);
        assert!(client.try_publish("devices/all/cmd/refresh", QoS::AtMostOnce, false, b"{}".to_vec()).is_ok());
        assert_eq!(client.find_messages_by_topic("devices/all/cmd/refresh").len(), 1);
    }

    #[tokio::test]
    async fn test_simulated_incoming_reaches_receiver() {
        let client = MockMqttClient::new();
        let mut rx = client.setup_receiver();
        let builder = DeviceMessageBuilder::new("devices");

        let body = serde_json::to_vec(&DeviceMessageBuilder::state("ONLINE")).unwrap();
        client.simulate_incoming(builder.topic(4, "state"), body).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "devices/4/state");
        let parsed: serde_json::Value = serde_json::from_slice(&received.payload).unwrap();
        assert_eq!(parsed["connection_state"], "ONLINE");
    }

    #[test]
    fn test_last_json_message() {
        let client = MockMqttClient::new();
        let payload = serde_json::to_vec(&DeviceMessageBuilder::refresh_command("refresh_status")).unwrap();
        client.try_publish("devices/9/cmd/refresh", QoS::AtMostOnce, false, payload).unwrap();

        let parsed: Option<serde_json::Value> = client.get_last_json_message("devices/9/cmd/refresh").unwrap();
        assert_eq!(parsed.unwrap()["command"], "refresh_status");
        let missing: Option<serde_json::Value> = client.get_last_json_message("devices/1/cmd/refresh").unwrap();
        assert!(missing.is_none());
    }
}
