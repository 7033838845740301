/*!
# DAM DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement et les tests du kernel DAM avec:
- Stub MQTT pour tests sans broker (publication enregistrée, connexion simulée)
- Builders de payloads JSON pour chaque type de message module
*/

pub mod messages;
pub mod mqtt_stub;

pub use messages::DeviceMessageBuilder;
pub use mqtt_stub::{MockMessage, MockMqttClient};

/// Active les logs `log` des stubs dans les tests (idempotent).
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
