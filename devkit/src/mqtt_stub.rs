/*!
Mock MQTT Client pour développement sans broker

Permet de tester le kernel FleetWatch sans démarrer de broker MQTT réel.
Enregistre tous les messages publiés, simule la réception, et peut refuser
les publications sur certains topics pour reproduire des écritures en échec.
*/

use anyhow::Result;
use rumqttc::QoS;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

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
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
    rejected_payloads: Arc<Mutex<HashSet<String>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            message_sender: Arc::new(Mutex::new(None)),
            rejected_payloads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Toute publication dont le payload contient `marker` échouera
    /// (ex: un identifiant d'asset pour simuler un refus distant).
    pub fn reject_payloads_containing<S: Into<String>>(&self, marker: S) {
        self.rejected_payloads.lock().unwrap().insert(marker.into());
    }

    /// Simule la publication d'un message (compatible avec AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        let text = String::from_utf8_lossy(&message.payload).into_owned();
        let rejected = self
            .rejected_payloads
            .lock()
            .unwrap()
            .iter()
            .any(|marker| text.contains(marker.as_str()));
        if rejected {
            log::warn!("❌ [MOCK] Rejected publish to {}", message.topic);
            anyhow::bail!("publish to {} rejected", message.topic);
        }

        self.published_messages.lock().unwrap().push(message.clone());
        log::info!("📤 [MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        Ok(())
    }

    /// Simule l'abonnement à un topic (compatible avec AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        self.subscriptions.lock().unwrap().push(topic.clone());
        log::info!("📥 [MOCK] Subscribed to {}", topic);
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
            qos: QoS::AtLeastOnce,
            retain: false,
        };

        if let Some(sender) = self.message_sender.lock().unwrap().as_ref() {
            sender.send(message.clone()).map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }

        log::info!("📨 [MOCK] Simulated incoming: {}", message.topic);
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
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

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
        self.rejected_payloads.lock().unwrap().clear();
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper pour créer des messages au format du fil FleetWatch
pub struct FleetMessageBuilder {
    collection: String,
}

impl FleetMessageBuilder {
    pub fn new<S: Into<String>>(collection: S) -> Self {
        Self { collection: collection.into() }
    }

    pub fn snapshot_topic(&self) -> String {
        format!("fleetwatch/{}/snapshot@v1", self.collection)
    }

    pub fn write_topic(&self) -> String {
        format!("fleetwatch/{}/write@v1", self.collection)
    }

    pub fn delete_topic(&self) -> String {
        format!("fleetwatch/{}/delete@v1", self.collection)
    }

    pub fn alarm_topic(&self) -> String {
        format!("fleetwatch/{}/alarm@v1", self.collection)
    }

    /// Enregistrement d'asset tel que l'émet le store distant
    pub fn asset(id: &str, status: &str, updated_at: &str) -> Value {
        serde_json::json!({
            "id": id,
            "name": id,
            "status": status,
            "updatedAt": updated_at
        })
    }

    /// Enregistrement horodaté à l'instant présent
    pub fn asset_now(id: &str, status: &str) -> Value {
        Self::asset(id, status, &chrono::Utc::now().to_rfc3339())
    }

    /// Crée un message snapshot v1 (enveloppe `{assets: [...]}`)
    pub fn snapshot_v1(assets: Vec<Value>) -> Value {
        serde_json::json!({
            "assets": assets,
            "ts": chrono::Utc::now().to_rfc3339()
        })
    }

    /// Snapshot sérialisé, prêt pour `simulate_incoming`
    pub fn snapshot_payload(assets: Vec<Value>) -> Vec<u8> {
        serde_json::to_vec(&Self::snapshot_v1(assets)).unwrap_or_default()
    }
}
