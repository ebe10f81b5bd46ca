/**
 * FLEET ENGINE - État possédé d'une collection et point d'entrée unique des mutations
 *
 * RÔLE :
 * Regroupe store + tracker d'incidents + sélection d'une collection monitorée.
 * Chaque opération (snapshot, mutation groupée, import CSV, édition unitaire)
 * passe par `&mut self` : une seule section critique par passage, donc mise à jour
 * du store et ajout au journal toujours atomiques ensemble.
 *
 * FONCTIONNEMENT :
 * - Snapshot : réconciliation, puis amorçage des nouveaux assets et transitions
 *   rejoués vers le tracker dans l'ordre du snapshot
 * - Mutations locales : appliquées de façon optimiste, visibles immédiatement dans la vue ;
 *   les changements de statut locaux passent aussi par le tracker (horloge locale)
 * - Retourne les écritures distantes à émettre ; l'envoi est l'affaire du coordinateur
 */

use crate::csv_import::{self, CsvDefaults, CsvMergeReport, MergeOutcome};
use crate::incidents::IncidentTracker;
use crate::models::{
    AssetDeletion, AssetFields, AssetPatch, AssetRecord, AssetStatus, IncidentLogEntry,
    TransitionEvent, WireAssetRecord,
};
use crate::reconciler::{self, RecordDefaults, SnapshotCounts, StoreChange};
use crate::store::AssetStore;
use crate::view::{self, FleetView, StatusCounts, ViewFilter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use time::{Date, OffsetDateTime};
use tracing::debug;

/// Paramètres d'une collection, issus de la configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub label: String,
    pub down_set: Vec<AssetStatus>,
    pub incident_capacity: usize,
    pub defaults: RecordDefaults,
    pub alarm_on_offline_increase: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            label: "CCTV".into(),
            down_set: vec![AssetStatus::Offline],
            incident_capacity: crate::incidents::DEFAULT_LOG_CAPACITY,
            defaults: RecordDefaults::default(),
            alarm_on_offline_increase: true,
        }
    }
}

/// Hausse du nombre d'assets offline entre deux snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OfflineAlarm {
    pub previous: usize,
    pub current: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub counts: SnapshotCounts,
    pub transitions: usize,
    pub incidents: Vec<IncidentLogEntry>,
    pub alarm: Option<OfflineAlarm>,
}

/// Formulaire d'ajout manuel d'un asset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetForm {
    pub id: String,
    #[serde(flatten)]
    pub fields: AssetFields,
}

pub struct FleetEngine {
    collection: String,
    settings: EngineSettings,
    store: AssetStore,
    tracker: IncidentTracker,
    selection: BTreeSet<String>,
    last_offline: usize,
    snapshots_applied: u64,
}

impl FleetEngine {
    pub fn new(collection: impl Into<String>, settings: EngineSettings) -> Self {
        let tracker = IncidentTracker::new(settings.down_set.clone(), settings.incident_capacity);
        Self {
            collection: collection.into(),
            settings,
            store: AssetStore::new(),
            tracker,
            selection: BTreeSet::new(),
            last_offline: 0,
            snapshots_applied: 0,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn label(&self) -> &str {
        &self.settings.label
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub fn down_since(&self) -> &HashMap<String, OffsetDateTime> {
        self.tracker.down_since()
    }

    pub fn down_count(&self) -> usize {
        self.tracker.down_count()
    }

    pub fn incidents(&self) -> Vec<IncidentLogEntry> {
        self.tracker.log().cloned().collect()
    }

    pub fn incident_count(&self) -> usize {
        self.tracker.log_len()
    }

    pub fn snapshots_applied(&self) -> u64 {
        self.snapshots_applied
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(self.store.records())
    }

    pub fn view(&self, filter: &ViewFilter) -> FleetView {
        view::project(&self.store, filter, self.down_since())
    }

    /// Export CSV des lignes filtrées, dans l'ordre de la vue : (nom de fichier, contenu).
    pub fn export_csv(&self, filter: &ViewFilter, today: Date) -> (String, String) {
        let view = self.view(filter);
        let body = csv_import::export_csv(view.rows.iter().map(|row| &row.record));
        (csv_import::export_file_name(self.label(), today), body)
    }

    // ===== Snapshot =====

    pub fn apply_snapshot(&mut self, snapshot: Vec<WireAssetRecord>, now: OffsetDateTime) -> ReconcileReport {
        let outcome = reconciler::reconcile(&mut self.store, snapshot, &self.settings.defaults, now);

        // rejoué dans l'ordre : un asset vu working puis offline dans le même
        // snapshot est amorcé UP puis passe DOWN avec son entrée WENT_DOWN
        let transitions = outcome.transitions().len();
        let mut incidents = Vec::new();
        for change in &outcome.changes {
            match change {
                StoreChange::Inserted { id, status } => self.tracker.seed(id, status, now),
                StoreChange::Transition(event) => {
                    if let Some(entry) = self.observe(event) {
                        incidents.push(entry);
                    }
                }
            }
        }

        let store = &self.store;
        self.selection.retain(|id| store.contains(id));
        self.snapshots_applied += 1;

        let offline = self.counts().offline;
        let alarm = (self.settings.alarm_on_offline_increase && offline > self.last_offline)
            .then_some(OfflineAlarm { previous: self.last_offline, current: offline });
        self.last_offline = offline;

        ReconcileReport {
            counts: outcome.counts,
            transitions,
            incidents,
            alarm,
        }
    }

    fn observe(&mut self, event: &TransitionEvent) -> Option<IncidentLogEntry> {
        let name = self
            .store
            .get(&event.asset_id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| event.asset_id.clone());
        self.tracker.observe(event, &name)
    }

    /// Change le statut d'un asset localement et transmet la transition au tracker.
    fn set_status_locally(&mut self, id: &str, status: &AssetStatus, now: OffsetDateTime) {
        let Some(record) = self.store.get_mut(id) else {
            return;
        };
        if record.status == *status {
            return;
        }
        let previous = std::mem::replace(&mut record.status, status.clone());
        let event = TransitionEvent {
            asset_id: id.to_string(),
            previous,
            current: status.clone(),
            at: now,
        };
        self.observe(&event);
    }

    // ===== Sélection =====

    /// Ajoute les identifiants connus à la sélection ; retourne le nombre ajouté.
    pub fn select<I: IntoIterator<Item = String>>(&mut self, ids: I) -> usize {
        let mut added = 0;
        for id in ids {
            if self.store.contains(&id) && self.selection.insert(id) {
                added += 1;
            }
        }
        added
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        self.selection.remove(id)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> Vec<String> {
        self.selection.iter().cloned().collect()
    }

    pub fn has_selection(&self) -> bool {
        !self.selection.is_empty()
    }

    // ===== Mutations locales optimistes =====

    /// Applique `status` à chaque asset sélectionné et retourne une écriture
    /// distante par asset. La sélection n'est pas vidée ici.
    pub fn apply_bulk_status(&mut self, status: &AssetStatus, actor: &str, now: OffsetDateTime) -> Vec<AssetPatch> {
        let targets: Vec<String> = self.selection.iter().cloned().collect();
        let mut patches = Vec::with_capacity(targets.len());

        for id in targets {
            if !self.store.contains(&id) {
                continue;
            }
            self.set_status_locally(&id, status, now);
            if let Some(record) = self.store.get_mut(&id) {
                record.updated_at = now;
                record.updated_by = Some(actor.to_string());
            }
            patches.push(AssetPatch::status_only(&id, status.clone(), now, actor));
        }
        patches
    }

    /// Mise à jour unitaire d'un asset (pas de capacité requise).
    pub fn update_asset(&mut self, id: &str, fields: &AssetFields, actor: &str, now: OffsetDateTime) -> Option<AssetPatch> {
        if !self.store.contains(id) {
            return None;
        }
        // statut vide = champ absent, jamais un statut inconnu ""
        let status = crate::models::non_blank(fields.status.clone()).map(|s| AssetStatus::parse(&s));
        if let Some(status) = &status {
            self.set_status_locally(id, status, now);
        }

        let record = self.store.get_mut(id)?;
        let trimmed = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string());
        let name = trimmed(&fields.name);
        let client = trimmed(&fields.client);
        let location = trimmed(&fields.location);
        if let Some(name) = &name {
            record.name = name.clone();
        }
        if let Some(client) = &client {
            record.client = client.clone();
        }
        if let Some(location) = &location {
            record.location = location.clone();
        }
        record.updated_at = now;
        record.updated_by = Some(actor.to_string());

        Some(AssetPatch {
            id: id.to_string(),
            status,
            name,
            client,
            location,
            updated_at: now,
            updated_by: actor.to_string(),
        })
    }

    /// Ajout manuel (upsert) : identifiant vide → rien ; identifiant existant →
    /// seuls les champs fournis et non vides sont écrasés.
    pub fn add_asset(&mut self, form: &AssetForm, actor: &str, now: OffsetDateTime) -> Option<AssetPatch> {
        let id = form.id.trim();
        if id.is_empty() {
            return None;
        }
        let non_blank = |v: &Option<String>| crate::models::non_blank(v.clone());

        if self.store.contains(id) {
            let fields = AssetFields {
                name: non_blank(&form.fields.name),
                client: non_blank(&form.fields.client),
                location: non_blank(&form.fields.location),
                status: non_blank(&form.fields.status),
            };
            return self.update_asset(id, &fields, actor, now);
        }

        let defaults = &self.settings.defaults;
        let status = non_blank(&form.fields.status)
            .map(|s| AssetStatus::parse(&s))
            .unwrap_or(AssetStatus::Working);
        let record = AssetRecord::new(id, status, now)
            .with_name(non_blank(&form.fields.name).unwrap_or_else(|| id.to_string()))
            .with_client(non_blank(&form.fields.client).unwrap_or_else(|| defaults.client.clone()))
            .with_location(non_blank(&form.fields.location).unwrap_or_else(|| defaults.location.clone()))
            .with_updated_by(actor);
        let patch = AssetPatch::full(&record, actor);
        self.tracker.seed(id, &record.status, now);
        self.store.insert(record);
        Some(patch)
    }

    /// Seule voie de suppression : retire l'asset, son entrée DownSince
    /// (sans RECOVERED) et son éventuelle sélection.
    pub fn delete_asset(&mut self, id: &str, actor: &str, now: OffsetDateTime) -> Option<AssetDeletion> {
        self.store.remove(id)?;
        self.tracker.forget(id);
        self.selection.remove(id);
        debug!(collection = %self.collection, asset = %id, "[fleet] asset deleted");
        Some(AssetDeletion {
            id: id.to_string(),
            deleted_at: now,
            deleted_by: actor.to_string(),
        })
    }

    /// Fusion d'un CSV. `None` si le fichier est inexploitable (no-op).
    pub fn import_csv(
        &mut self,
        text: &str,
        default_client: Option<&str>,
        actor: &str,
        now: OffsetDateTime,
    ) -> Option<(CsvMergeReport, Vec<AssetPatch>)> {
        let plan = csv_import::plan_import(text)?;
        let defaults = CsvDefaults {
            client: default_client
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .unwrap_or_else(|| self.settings.defaults.client.clone()),
            location: self.settings.defaults.location.clone(),
        };

        let mut report = CsvMergeReport {
            rows: plan.upserts.len() + plan.skipped_rows,
            skipped_rows: plan.skipped_rows,
            ..Default::default()
        };
        let mut patches = Vec::new();

        for row in &plan.upserts {
            match csv_import::merge_row(&mut self.store, row, &defaults, now, actor) {
                MergeOutcome::Created => {
                    report.created += 1;
                    if let Some(record) = self.store.get(&row.id) {
                        self.tracker.seed(&row.id, &record.status, now);
                    }
                }
                MergeOutcome::Updated(transition) => {
                    report.updated += 1;
                    if let Some(event) = transition {
                        self.observe(&event);
                    }
                }
                MergeOutcome::Unchanged => {
                    report.unchanged += 1;
                    continue;
                }
            }
            if let Some(record) = self.store.get(&row.id) {
                patches.push(AssetPatch::full(record, actor));
            }
        }

        Some((report, patches))
    }
}
