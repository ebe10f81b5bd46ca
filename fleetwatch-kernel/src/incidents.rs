/**
 * INCIDENT TRACKER - Suivi des pannes et journal d'incidents borné
 *
 * RÔLE :
 * Machine à états UP/DOWN par asset, alimentée par les transitions de statut.
 * Maintient la map DownSince et un journal des N derniers incidents.
 *
 * FONCTIONNEMENT :
 * - UP → DOWN : DownSince[id] = instant de l'événement + entrée WENT_DOWN
 * - DOWN → UP : durée = max(1, floor(Δt / 1000)) secondes + entrée RECOVERED
 * - Autres transitions (working → maintenance...) : aucun effet
 * - Journal du plus récent au plus ancien, tronqué à `capacity` entrées
 *
 * INVARIANT :
 * Un identifiant est dans DownSince si et seulement si son statut courant est
 * un état "down". Le retrait et l'entrée RECOVERED se font dans le même appel.
 */

use crate::models::{AssetStatus, IncidentKind, IncidentLogEntry, TransitionEvent};
use std::collections::{HashMap, VecDeque};
use time::OffsetDateTime;

pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct IncidentTracker {
    down_set: Vec<AssetStatus>,
    down_since: HashMap<String, OffsetDateTime>,
    log: VecDeque<IncidentLogEntry>,
    capacity: usize,
}

impl IncidentTracker {
    pub fn new(down_set: Vec<AssetStatus>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            down_set,
            down_since: HashMap::new(),
            log: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_down_status(&self, status: &AssetStatus) -> bool {
        status.is_down(&self.down_set)
    }

    /// Première observation d'un asset : s'il est déjà down, il démarre
    /// en DOWN depuis `first_seen`, sans entrée de journal.
    pub fn seed(&mut self, asset_id: &str, status: &AssetStatus, first_seen: OffsetDateTime) {
        if self.is_down_status(status) {
            self.down_since.insert(asset_id.to_string(), first_seen);
        }
    }

    /// Applique une transition observée et retourne l'entrée ajoutée au journal, s'il y en a une.
    pub fn observe(&mut self, event: &TransitionEvent, asset_name: &str) -> Option<IncidentLogEntry> {
        let was_down = self.down_since.contains_key(&event.asset_id);
        let now_down = self.is_down_status(&event.current);

        let entry = match (was_down, now_down) {
            (false, true) => {
                self.down_since.insert(event.asset_id.clone(), event.at);
                incident_entry(IncidentKind::WentDown, event, asset_name, None)
            }
            (true, false) => {
                let since = self.down_since.remove(&event.asset_id)?;
                let duration = outage_seconds(since, event.at);
                incident_entry(IncidentKind::Recovered, event, asset_name, Some(duration))
            }
            _ => return None,
        };

        self.push(entry.clone());
        Some(entry)
    }

    /// Oubli d'un asset supprimé explicitement : pas d'entrée RECOVERED.
    pub fn forget(&mut self, asset_id: &str) -> Option<OffsetDateTime> {
        self.down_since.remove(asset_id)
    }

    pub fn down_since(&self) -> &HashMap<String, OffsetDateTime> {
        &self.down_since
    }

    pub fn down_count(&self) -> usize {
        self.down_since.len()
    }

    /// Journal du plus récent au plus ancien.
    pub fn log(&self) -> impl Iterator<Item = &IncidentLogEntry> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    fn push(&mut self, entry: IncidentLogEntry) {
        self.log.push_front(entry);
        self.log.truncate(self.capacity);
    }
}

/// Durée d'indisponibilité en secondes entières, jamais inférieure à 1
/// (un `at` antérieur à `since` est ramené à 1).
fn outage_seconds(since: OffsetDateTime, at: OffsetDateTime) -> u64 {
    let millis = (at - since).whole_milliseconds();
    millis.div_euclid(1000).max(1) as u64
}

fn incident_entry(
    kind: IncidentKind,
    event: &TransitionEvent,
    asset_name: &str,
    duration_sec: Option<u64>,
) -> IncidentLogEntry {
    let tag = match kind {
        IncidentKind::WentDown => "down",
        IncidentKind::Recovered => "up",
    };
    let millis = event.at.unix_timestamp_nanos() / 1_000_000;
    IncidentLogEntry {
        id: format!("{}-{}-{}", event.asset_id, millis, tag),
        kind,
        asset_id: event.asset_id.clone(),
        asset_name: asset_name.to_string(),
        at: event.at,
        duration_sec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    fn transition(id: &str, from: AssetStatus, to: AssetStatus, at: OffsetDateTime) -> TransitionEvent {
        TransitionEvent { asset_id: id.into(), previous: from, current: to, at }
    }

    fn tracker() -> IncidentTracker {
        IncidentTracker::new(vec![AssetStatus::Offline], DEFAULT_LOG_CAPACITY)
    }

    #[test]
    fn down_then_up_logs_one_pair_with_duration() {
        let mut t = tracker();
        let t0 = datetime!(2024-05-01 10:00 UTC);
        let t1 = t0 + Duration::milliseconds(30_999);

        let down = t.observe(&transition("CAM-1", AssetStatus::Working, AssetStatus::Offline, t0), "Gate");
        assert_eq!(down.unwrap().kind, IncidentKind::WentDown);
        assert_eq!(t.down_since().get("CAM-1"), Some(&t0));

        let up = t
            .observe(&transition("CAM-1", AssetStatus::Offline, AssetStatus::Working, t1), "Gate")
            .unwrap();
        assert_eq!(up.kind, IncidentKind::Recovered);
        assert_eq!(up.duration_sec, Some(30));
        assert!(t.down_since().is_empty());

        let kinds: Vec<IncidentKind> = t.log().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![IncidentKind::Recovered, IncidentKind::WentDown]);
    }

    #[test]
    fn non_down_transitions_are_ignored() {
        let mut t = tracker();
        let at = datetime!(2024-05-01 10:00 UTC);
        let ev = transition("CAM-1", AssetStatus::Working, AssetStatus::Maintenance, at);
        assert!(t.observe(&ev, "Gate").is_none());
        assert_eq!(t.log_len(), 0);
        assert_eq!(t.down_count(), 0);
    }

    #[test]
    fn out_of_order_recovery_is_clamped_to_one_second() {
        let mut t = tracker();
        let t0 = datetime!(2024-05-01 10:00 UTC);
        t.observe(&transition("CAM-1", AssetStatus::Working, AssetStatus::Offline, t0), "Gate");
        let earlier = t0 - Duration::minutes(5);
        let up = t
            .observe(&transition("CAM-1", AssetStatus::Offline, AssetStatus::Working, earlier), "Gate")
            .unwrap();
        assert_eq!(up.duration_sec, Some(1));
    }

    #[test]
    fn seeded_down_asset_recovers_without_initial_entry() {
        let mut t = tracker();
        let first_seen = datetime!(2024-05-01 10:00 UTC);
        t.seed("CAM-2", &AssetStatus::Offline, first_seen);
        t.seed("CAM-3", &AssetStatus::Maintenance, first_seen);
        assert_eq!(t.log_len(), 0);
        assert!(t.down_since().contains_key("CAM-2"));
        assert!(!t.down_since().contains_key("CAM-3"));

        let up = t
            .observe(
                &transition("CAM-2", AssetStatus::Offline, AssetStatus::Working, first_seen + Duration::seconds(90)),
                "Yard",
            )
            .unwrap();
        assert_eq!(up.duration_sec, Some(90));
        assert_eq!(t.log_len(), 1);
    }

    #[test]
    fn moves_inside_a_multi_status_down_set_keep_the_outage_open() {
        let mut t = IncidentTracker::new(vec![AssetStatus::Offline, AssetStatus::Removed], DEFAULT_LOG_CAPACITY);
        let t0 = datetime!(2024-05-01 10:00 UTC);

        t.observe(&transition("RT-1", AssetStatus::Working, AssetStatus::Offline, t0), "Handheld");
        let sideways = t.observe(
            &transition("RT-1", AssetStatus::Offline, AssetStatus::Removed, t0 + Duration::minutes(10)),
            "Handheld",
        );
        assert!(sideways.is_none());
        assert_eq!(t.down_since().get("RT-1"), Some(&t0));
        assert_eq!(t.log_len(), 1);

        let up = t
            .observe(
                &transition("RT-1", AssetStatus::Removed, AssetStatus::Working, t0 + Duration::minutes(25)),
                "Handheld",
            )
            .unwrap();
        assert_eq!(up.kind, IncidentKind::Recovered);
        assert_eq!(up.duration_sec, Some(25 * 60));
        assert_eq!(t.down_count(), 0);
    }

    #[test]
    fn log_is_bounded_and_newest_first() {
        let mut t = IncidentTracker::new(vec![AssetStatus::Offline], 200);
        let base = datetime!(2024-05-01 00:00 UTC);
        for i in 0..150i64 {
            let down_at = base + Duration::minutes(i * 2);
            let up_at = down_at + Duration::minutes(1);
            t.observe(&transition("CAM-1", AssetStatus::Working, AssetStatus::Offline, down_at), "Gate");
            t.observe(&transition("CAM-1", AssetStatus::Offline, AssetStatus::Working, up_at), "Gate");
        }
        assert_eq!(t.log_len(), 200);
        let times: Vec<OffsetDateTime> = t.log().map(|e| e.at).collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(times[0], base + Duration::minutes(149 * 2 + 1));
    }

    #[test]
    fn forget_drops_down_since_without_logging() {
        let mut t = tracker();
        let at = datetime!(2024-05-01 10:00 UTC);
        t.observe(&transition("CAM-1", AssetStatus::Working, AssetStatus::Offline, at), "Gate");
        assert_eq!(t.forget("CAM-1"), Some(at));
        assert_eq!(t.log_len(), 1);
        assert_eq!(t.down_count(), 0);
    }

    #[test]
    fn entry_identifiers_are_unique_per_event() {
        let mut t = tracker();
        let at = datetime!(2024-05-01 10:00 UTC);
        let down = t
            .observe(&transition("CAM-1", AssetStatus::Working, AssetStatus::Offline, at), "Gate")
            .unwrap();
        let up = t
            .observe(&transition("CAM-1", AssetStatus::Offline, AssetStatus::Working, at), "Gate")
            .unwrap();
        assert_ne!(down.id, up.id);
        assert_eq!(up.duration_sec, Some(1));
    }
}
