/**
 * SNAPSHOT RECONCILER - Application d'un snapshot complet de flotte sur le store
 *
 * RÔLE :
 * Compare chaque enregistrement d'un snapshot (remplacement complet, pas un delta)
 * avec l'état stocké et produit les événements de transition de statut.
 *
 * FONCTIONNEMENT :
 * - Identifiant inconnu → insertion (état de base, pas de transition)
 * - Même statut → mise à jour des champs mutables si l'horodatage entrant est
 *   strictement plus récent (égalité = on garde l'existant, pas d'oscillation)
 * - Statut différent → mise à jour + TransitionEvent (même si l'horodatage entrant est
 *   plus ancien ; `updatedAt` stocké garde alors la plus récente des deux valeurs)
 * - Enregistrement sans id ou sans statut → ignoré, le reste du lot continue
 *
 * POLITIQUE :
 * Un asset absent du snapshot n'est JAMAIS supprimé. Un snapshot partiel transitoire
 * ne doit pas passer pour une suppression massive ; seule la suppression explicite
 * retire un asset du store.
 */

use crate::models::{AssetRecord, AssetStatus, IncomingAsset, TransitionEvent, WireAssetRecord};
use crate::store::AssetStore;
use serde::Serialize;
use time::OffsetDateTime;

/// Valeurs appliquées aux champs absents lors de la création d'un asset.
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    pub client: String,
    pub location: String,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        Self { client: "T1".into(), location: "Unknown".into() }
    }
}

impl RecordDefaults {
    pub fn build(&self, incoming: &IncomingAsset) -> AssetRecord {
        let mut record = AssetRecord::new(incoming.id.clone(), incoming.status.clone(), incoming.updated_at)
            .with_name(incoming.name.clone().unwrap_or_else(|| incoming.id.clone()))
            .with_client(incoming.client.clone().unwrap_or_else(|| self.client.clone()))
            .with_location(incoming.location.clone().unwrap_or_else(|| self.location.clone()));
        record.updated_by = incoming.updated_by.clone();
        record
    }
}

/// Compteurs d'un passage de réconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotCounts {
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// Changement observé, dans l'ordre du snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// Nouvel asset, avec le statut sous lequel il a été vu en premier.
    Inserted { id: String, status: AssetStatus },
    Transition(TransitionEvent),
}

/// Résultat brut de la réconciliation, consommé par le moteur qui rejoue
/// `changes` dans l'ordre (amorçage puis transitions vers le tracker).
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub counts: SnapshotCounts,
    pub changes: Vec<StoreChange>,
}

impl Reconciliation {
    pub fn transitions(&self) -> Vec<&TransitionEvent> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                StoreChange::Transition(event) => Some(event),
                StoreChange::Inserted { .. } => None,
            })
            .collect()
    }
}

pub fn reconcile(
    store: &mut AssetStore,
    snapshot: Vec<WireAssetRecord>,
    defaults: &RecordDefaults,
    now: OffsetDateTime,
) -> Reconciliation {
    let mut out = Reconciliation::default();
    out.counts.received = snapshot.len();

    for wire in snapshot {
        let Some(incoming) = wire.validate(now) else {
            out.counts.skipped += 1;
            continue;
        };

        if !store.contains(&incoming.id) {
            store.insert(defaults.build(&incoming));
            out.counts.inserted += 1;
            out.changes.push(StoreChange::Inserted { id: incoming.id, status: incoming.status });
            continue;
        }
        let Some(existing) = store.get_mut(&incoming.id) else {
            continue;
        };

        if existing.status == incoming.status {
            if incoming.updated_at > existing.updated_at {
                apply_fields(existing, &incoming);
                out.counts.updated += 1;
            } else {
                out.counts.unchanged += 1;
            }
        } else {
            // un statut plus ancien s'applique, mais l'horodatage ne recule jamais
            let prior = existing.updated_at;
            let previous = std::mem::replace(&mut existing.status, incoming.status.clone());
            apply_fields(existing, &incoming);
            existing.updated_at = prior.max(incoming.updated_at);
            out.counts.updated += 1;
            out.changes.push(StoreChange::Transition(TransitionEvent {
                asset_id: incoming.id,
                previous,
                current: incoming.status,
                at: incoming.updated_at,
            }));
        }
    }

    out
}

fn apply_fields(record: &mut AssetRecord, incoming: &IncomingAsset) {
    if let Some(name) = &incoming.name {
        record.name = name.clone();
    }
    if let Some(client) = &incoming.client {
        record.client = client.clone();
    }
    if let Some(location) = &incoming.location {
        record.location = location.clone();
    }
    if incoming.updated_by.is_some() {
        record.updated_by = incoming.updated_by.clone();
    }
    record.updated_at = incoming.updated_at;
}
