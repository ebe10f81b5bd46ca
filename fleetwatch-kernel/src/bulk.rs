/**
 * BULK MUTATION COORDINATOR - Mutations optimistes + écritures distantes "fire and forget"
 *
 * RÔLE :
 * Relie une mutation locale du FleetEngine aux écritures sortantes du RemoteStore.
 *
 * FONCTIONNEMENT :
 * 1. Contrôle de capacité (la politique de rôles est externe, on ne reçoit qu'un booléen)
 * 2. Application locale immédiate, visible par la vue avant tout accusé distant
 * 3. Une écriture par asset, toutes concurrentes, sans ordre garanti
 * 4. Sélection vidée dès l'émission des écritures, pas à leur complétion
 *
 * Les échecs distants sont loggés puis avalés : aucun rollback, le snapshot
 * suivant corrige les assets dont l'écriture n'a pas abouti.
 */

use crate::engine::{AssetForm, FleetEngine};
use crate::csv_import::CsvMergeReport;
use crate::models::{AssetDeletion, AssetFields, AssetPatch, AssetStatus};
use crate::remote::RemoteStore;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bilan agrégé d'un lot d'écritures distantes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub issued: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub enum BulkOutcome {
    Denied,
    NoOp,
    Applied { updated: usize, writes: JoinHandle<WriteSummary> },
}

#[derive(Debug)]
pub enum CsvUploadOutcome {
    Denied,
    /// Fichier inexploitable : rien n'a changé.
    Ignored,
    Merged { report: CsvMergeReport, writes: JoinHandle<WriteSummary> },
}

/// Lance les écritures en tâche de fond ; la tâche retourne le bilan.
pub fn dispatch_writes(remote: Arc<dyn RemoteStore>, collection: String, patches: Vec<AssetPatch>) -> JoinHandle<WriteSummary> {
    tokio::spawn(async move {
        let results = join_all(patches.iter().map(|patch| remote.write(&collection, patch))).await;

        let mut summary = WriteSummary { issued: results.len(), failed: 0 };
        for (patch, result) in patches.iter().zip(results) {
            if let Err(e) = result {
                summary.failed += 1;
                warn!(collection = %collection, asset = %patch.id, error = %e, "[bulk] remote write failed");
            }
        }
        if summary.issued > 0 {
            debug!(collection = %collection, issued = summary.issued, failed = summary.failed, "[bulk] writes settled");
        }
        summary
    })
}

pub fn dispatch_delete(remote: Arc<dyn RemoteStore>, collection: String, deletion: AssetDeletion) -> JoinHandle<bool> {
    tokio::spawn(async move {
        match remote.delete(&collection, &deletion).await {
            Ok(()) => true,
            Err(e) => {
                warn!(collection = %collection, asset = %deletion.id, error = %e, "[bulk] remote delete failed");
                false
            }
        }
    })
}

/// Applique `status` à toute la sélection, si l'appelant en a la capacité.
pub fn apply_bulk_status(
    engine: &mut FleetEngine,
    remote: Arc<dyn RemoteStore>,
    status: &AssetStatus,
    actor: &str,
    can_bulk: bool,
    now: OffsetDateTime,
) -> BulkOutcome {
    if !can_bulk {
        warn!(collection = %engine.collection(), actor = %actor, "[bulk] capability denied");
        return BulkOutcome::Denied;
    }
    if !engine.has_selection() {
        return BulkOutcome::NoOp;
    }

    let patches = engine.apply_bulk_status(status, actor, now);
    let updated = patches.len();
    let writes = dispatch_writes(remote, engine.collection().to_string(), patches);
    engine.clear_selection();

    info!(collection = %engine.collection(), status = %status, updated, actor = %actor, "[bulk] status applied");
    BulkOutcome::Applied { updated, writes }
}

/// Import CSV : même capacité que les mutations groupées.
pub fn upload_csv(
    engine: &mut FleetEngine,
    remote: Arc<dyn RemoteStore>,
    text: &str,
    default_client: Option<&str>,
    actor: &str,
    can_bulk: bool,
    now: OffsetDateTime,
) -> CsvUploadOutcome {
    if !can_bulk {
        warn!(collection = %engine.collection(), actor = %actor, "[csv] capability denied");
        return CsvUploadOutcome::Denied;
    }
    let Some((report, patches)) = engine.import_csv(text, default_client, actor, now) else {
        debug!(collection = %engine.collection(), "[csv] unusable file ignored");
        return CsvUploadOutcome::Ignored;
    };

    info!(
        collection = %engine.collection(),
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped_rows,
        "[csv] import merged"
    );
    let writes = dispatch_writes(remote, engine.collection().to_string(), patches);
    CsvUploadOutcome::Merged { report, writes }
}

/// Mise à jour unitaire + écriture distante. `None` si l'asset est inconnu.
pub fn update_one(
    engine: &mut FleetEngine,
    remote: Arc<dyn RemoteStore>,
    id: &str,
    fields: &AssetFields,
    actor: &str,
    now: OffsetDateTime,
) -> Option<JoinHandle<WriteSummary>> {
    let patch = engine.update_asset(id, fields, actor, now)?;
    Some(dispatch_writes(remote, engine.collection().to_string(), vec![patch]))
}

pub fn add_one(
    engine: &mut FleetEngine,
    remote: Arc<dyn RemoteStore>,
    form: &AssetForm,
    actor: &str,
    now: OffsetDateTime,
) -> Option<JoinHandle<WriteSummary>> {
    let patch = engine.add_asset(form, actor, now)?;
    Some(dispatch_writes(remote, engine.collection().to_string(), vec![patch]))
}

pub fn delete_one(
    engine: &mut FleetEngine,
    remote: Arc<dyn RemoteStore>,
    id: &str,
    actor: &str,
    now: OffsetDateTime,
) -> Option<JoinHandle<bool>> {
    let deletion = engine.delete_asset(id, actor, now)?;
    Some(dispatch_delete(remote, engine.collection().to_string(), deletion))
}
