/**
 * REMOTE STORE - Écritures sortantes vers le store distant
 *
 * RÔLE :
 * Abstraction des écritures "best effort" (upsert partiel, suppression) émises
 * après une mutation locale optimiste. Le kernel ne lit jamais ce canal :
 * le snapshot suivant reste la source de vérité.
 *
 * IMPLÉMENTATION :
 * MqttRemoteStore publie sur `fleetwatch/{collection}/write@v1` et
 * `fleetwatch/{collection}/delete@v1` en QoS at-least-once.
 * Une écriture sans identifiant est refusée avant publication.
 */

use crate::models::{AssetDeletion, AssetPatch};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("MQTT publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("remote store rejected {id}: {reason}")]
    Rejected { id: String, reason: String },
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn write(&self, collection: &str, patch: &AssetPatch) -> Result<(), RemoteError>;
    async fn delete(&self, collection: &str, deletion: &AssetDeletion) -> Result<(), RemoteError>;
}

pub fn write_topic(collection: &str) -> String {
    format!("fleetwatch/{collection}/write@v1")
}

pub fn delete_topic(collection: &str) -> String {
    format!("fleetwatch/{collection}/delete@v1")
}

/// Le store distant indexe par identifiant : un id vide ne part jamais.
fn require_id(id: &str, what: &str) -> Result<(), RemoteError> {
    if id.trim().is_empty() {
        return Err(RemoteError::Rejected { id: id.to_string(), reason: format!("{what} without identifier") });
    }
    Ok(())
}

pub struct MqttRemoteStore {
    client: AsyncClient,
}

impl MqttRemoteStore {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteStore for MqttRemoteStore {
    async fn write(&self, collection: &str, patch: &AssetPatch) -> Result<(), RemoteError> {
        require_id(&patch.id, "write")?;
        let payload = serde_json::to_vec(patch)?;
        self.client
            .publish(write_topic(collection), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, deletion: &AssetDeletion) -> Result<(), RemoteError> {
        require_id(&deletion.id, "delete")?;
        let payload = serde_json::to_vec(deletion)?;
        self.client
            .publish(delete_topic(collection), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}
