/*!
# FleetWatch DevKit - Stubs et fixtures pour le développement du kernel

Bibliothèque de support pour les tests du kernel FleetWatch :
- Client MQTT simulé (publication, abonnements, injection d'échecs)
- Constructeur de messages snapshot au format du fil
- Construction de fichiers CSV d'import
*/

pub mod fixtures;
pub mod mqtt_stub;

pub use fixtures::{init_test_logging, CsvFixture};
pub use mqtt_stub::{FleetMessageBuilder, MockMessage, MockMqttClient};
