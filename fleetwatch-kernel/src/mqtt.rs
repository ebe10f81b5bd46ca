/**
 * MQTT FEED - Réception des snapshots de flotte et publication des alarmes
 *
 * RÔLE :
 * Abonné à `fleetwatch/+/snapshot@v1`, décode chaque snapshot complet et le passe
 * au FleetEngine de la collection désignée par le topic.
 *
 * FONCTIONNEMENT :
 * - Payload : tableau JSON d'enregistrements, ou objet `{ "assets": [...] }`
 * - Chaque enregistrement est décodé isolément, champ par champ : un champ mal typé
 *   est ignoré seul ; un élément qui n'est pas un objet devient un enregistrement vide,
 *   ignoré et compté par la réconciliation
 * - Payload illisible ou collection inconnue → log, snapshot ignoré
 * - Hausse du nombre d'offline → alarme sur `fleetwatch/{collection}/alarm@v1`
 * - Réabonnement à chaque ConnAck (session propre après reconnexion)
 */

use crate::config::KernelConfig;
use crate::engine::{OfflineAlarm, ReconcileReport};
use crate::health::HealthTracker;
use crate::models::WireAssetRecord;
use crate::state::SharedFleets;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task;
use tracing::{debug, error, info, warn};

pub const SNAPSHOT_FILTER: &str = "fleetwatch/+/snapshot@v1";

pub fn create_mqtt_client(cfg: &KernelConfig) -> (AsyncClient, EventLoop) {
    let client_id = format!("fleetwatch-kernel-{}", uuid::Uuid::new_v4().simple());
    let mut opts = MqttOptions::new(client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(15));
    // les snapshots d'une grosse flotte dépassent la limite par défaut
    opts.set_max_packet_size(4 * 1024 * 1024, 4 * 1024 * 1024);
    AsyncClient::new(opts, 64)
}

pub fn alarm_topic(collection: &str) -> String {
    format!("fleetwatch/{collection}/alarm@v1")
}

/// `fleetwatch/{collection}/snapshot@v1` → `collection`.
pub fn collection_from_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("fleetwatch/")?;
    let collection = rest.strip_suffix("/snapshot@v1")?;
    (!collection.is_empty() && !collection.contains('/')).then_some(collection)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotPayload {
    Bare(Vec<Value>),
    Wrapped { assets: Vec<Value> },
}

pub fn decode_snapshot(payload: &[u8]) -> Result<Vec<WireAssetRecord>, serde_json::Error> {
    let values = match serde_json::from_slice::<SnapshotPayload>(payload)? {
        SnapshotPayload::Bare(values) | SnapshotPayload::Wrapped { assets: values } => values,
    };
    Ok(values
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .collect())
}

#[derive(Debug, serde::Serialize)]
struct AlarmMessage<'a> {
    collection: &'a str,
    previous: usize,
    current: usize,
    #[serde(with = "time::serde::rfc3339")]
    at: OffsetDateTime,
}

fn alarm_payload(collection: &str, alarm: OfflineAlarm, at: OffsetDateTime) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&AlarmMessage {
        collection,
        previous: alarm.previous,
        current: alarm.current,
        at,
    })
}

/// Décode et applique un snapshot ; `None` si le message est ignoré.
pub fn handle_snapshot(fleets: &SharedFleets, topic: &str, payload: &[u8], now: OffsetDateTime) -> Option<(String, ReconcileReport)> {
    let Some(collection) = collection_from_topic(topic) else {
        debug!(topic, "[mqtt] topic hors schéma ignoré");
        return None;
    };
    let records = match decode_snapshot(payload) {
        Ok(records) => records,
        Err(e) => {
            warn!(collection, error = %e, "[mqtt] snapshot JSON invalide");
            return None;
        }
    };

    let mut guard = fleets.lock();
    let Some(engine) = guard.get_mut(collection) else {
        warn!(collection, "[mqtt] snapshot pour une collection inconnue");
        return None;
    };
    let report = engine.apply_snapshot(records, now);
    drop(guard);

    if report.counts.skipped > 0 {
        warn!(collection, skipped = report.counts.skipped, "[fleet] enregistrements sans id/statut ignorés");
    }
    for entry in &report.incidents {
        info!(collection, asset = %entry.asset_id, kind = ?entry.kind, duration = ?entry.duration_sec, "[fleet] incident");
    }
    debug!(
        collection,
        received = report.counts.received,
        inserted = report.counts.inserted,
        updated = report.counts.updated,
        transitions = report.transitions,
        "[fleet] snapshot reconciled"
    );
    Some((collection.to_string(), report))
}

pub fn spawn_mqtt_listener(fleets: SharedFleets, client: AsyncClient, mut eventloop: EventLoop, health: HealthTracker) {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    info!("[mqtt] connected, subscribing to {SNAPSHOT_FILTER}");
                    if let Err(e) = client.subscribe(SNAPSHOT_FILTER, QoS::AtLeastOnce).await {
                        error!("[mqtt] subscribe failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    let now = OffsetDateTime::now_utc();
                    let Some((collection, report)) = handle_snapshot(&fleets, &p.topic, &p.payload, now) else {
                        continue;
                    };
                    let Some(alarm) = report.alarm else {
                        continue;
                    };
                    warn!(collection = %collection, previous = alarm.previous, current = alarm.current, "[fleet] offline count increased");
                    match alarm_payload(&collection, alarm, now) {
                        Ok(payload) => {
                            if let Err(e) = client.publish(alarm_topic(&collection), QoS::AtLeastOnce, false, payload).await {
                                warn!("[mqtt] alarm publish failed: {e:?}");
                            }
                        }
                        Err(e) => warn!("[mqtt] alarm serialization failed: {e}"),
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => health.mark_mqtt_disconnected(),
                Ok(_) => {}
                Err(e) => {
                    error!("[mqtt] erreur: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
