/**
 * VIEW PROJECTOR - Projection triée et filtrée de la flotte pour l'affichage
 *
 * RÔLE :
 * Fonction pure (store, filtres, DownSince) → (compteurs, lignes ordonnées).
 * Ne possède aucun état propre.
 *
 * TRI :
 * 1. Rang de criticité : offline=0, maintenance=1, removed=2, working=3, inconnu=4
 * 2. DownSince croissant (en panne depuis le plus longtemps d'abord) ;
 *    les assets non-down passent après tous les assets down du même rang
 * 3. Identifiant lexicographique
 */

use crate::models::{AssetRecord, AssetStatus};
use crate::store::AssetStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Critères de filtrage ; `None`, vide ou "all" = pas de filtre.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewFilter {
    pub q: Option<String>,
    pub status: Option<String>,
    pub client: Option<String>,
}

impl ViewFilter {
    fn matches(&self, record: &AssetRecord) -> bool {
        if let Some(status) = active(&self.status) {
            if AssetStatus::parse(status) != record.status {
                return false;
            }
        }
        if let Some(client) = active(&self.client) {
            if record.client != client.trim() {
                return false;
            }
        }
        match self.q.as_deref().map(|q| q.trim().to_lowercase()) {
            Some(q) if !q.is_empty() => [record.id(), record.name.as_str(), record.location.as_str()]
                .iter()
                .any(|field| field.to_lowercase().contains(&q)),
            _ => true,
        }
    }
}

fn active(criterion: &Option<String>) -> Option<&str> {
    criterion
        .as_deref()
        .filter(|c| !c.trim().is_empty() && !c.trim().eq_ignore_ascii_case("all"))
}

/// Compteurs sur l'ensemble du store. Un statut inconnu compte dans
/// `total` et `unknown`, jamais dans un compteur de statut connu.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub working: usize,
    pub offline: usize,
    pub maintenance: usize,
    pub removed: usize,
    pub unknown: usize,
}

impl StatusCounts {
    pub fn tally<'a>(records: impl Iterator<Item = &'a AssetRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.total += 1;
            match record.status {
                AssetStatus::Working => counts.working += 1,
                AssetStatus::Offline => counts.offline += 1,
                AssetStatus::Maintenance => counts.maintenance += 1,
                AssetStatus::Removed => counts.removed += 1,
                AssetStatus::Unknown(_) => counts.unknown += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRow {
    #[serde(flatten)]
    pub record: AssetRecord,
    #[serde(with = "time::serde::rfc3339::option")]
    pub down_since: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetView {
    pub counts: StatusCounts,
    pub rows: Vec<AssetRow>,
}

pub fn project(
    store: &AssetStore,
    filter: &ViewFilter,
    down_since: &HashMap<String, OffsetDateTime>,
) -> FleetView {
    let counts = StatusCounts::tally(store.records());

    let mut rows: Vec<AssetRow> = store
        .records()
        .filter(|r| filter.matches(r))
        .map(|r| AssetRow {
            record: r.clone(),
            down_since: down_since.get(r.id()).copied(),
        })
        .collect();

    // Option::None trie avant Some : on trie sur (absent, instant) pour que
    // les assets down passent devant les assets jamais tombés.
    rows.sort_by(|a, b| {
        let key_a = (a.record.status.criticality_rank(), a.down_since.is_none(), a.down_since);
        let key_b = (b.record.status.criticality_rank(), b.down_since.is_none(), b.down_since);
        key_a.cmp(&key_b).then_with(|| a.record.id().cmp(b.record.id()))
    });

    FleetView { counts, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    fn store_of(records: Vec<AssetRecord>) -> AssetStore {
        let mut store = AssetStore::new();
        for r in records {
            store.insert(r);
        }
        store
    }

    fn ids(view: &FleetView) -> Vec<&str> {
        view.rows.iter().map(|r| r.record.id()).collect()
    }

    #[test]
    fn orders_by_criticality_regardless_of_input_order() {
        let at = datetime!(2024-05-01 10:00 UTC);
        let mut down = HashMap::new();
        down.insert("A".to_string(), at);

        let inputs = [
            vec!["C", "B", "A"],
            vec!["A", "C", "B"],
            vec!["B", "A", "C"],
        ];
        for order in inputs {
            let records = order
                .iter()
                .map(|id| {
                    let status = match *id {
                        "A" => AssetStatus::Offline,
                        "B" => AssetStatus::Maintenance,
                        _ => AssetStatus::Working,
                    };
                    AssetRecord::new(*id, status, at)
                })
                .collect();
            let view = project(&store_of(records), &ViewFilter::default(), &down);
            assert_eq!(ids(&view), vec!["A", "B", "C"]);
        }
    }

    #[test]
    fn longest_down_first_and_never_down_after_down() {
        let t0 = datetime!(2024-05-01 10:00 UTC);
        let store = store_of(vec![
            AssetRecord::new("CAM-1", AssetStatus::Offline, t0),
            AssetRecord::new("CAM-2", AssetStatus::Offline, t0),
            AssetRecord::new("CAM-3", AssetStatus::Offline, t0),
            AssetRecord::new("CAM-0", AssetStatus::Offline, t0),
        ]);
        let mut down = HashMap::new();
        down.insert("CAM-2".to_string(), t0);
        down.insert("CAM-3".to_string(), t0 - Duration::hours(1));
        down.insert("CAM-1".to_string(), t0 + Duration::minutes(5));

        let view = project(&store, &ViewFilter::default(), &down);
        assert_eq!(ids(&view), vec!["CAM-3", "CAM-2", "CAM-1", "CAM-0"]);
    }

    #[test]
    fn counts_put_unknown_statuses_in_total_only() {
        let at = datetime!(2024-05-01 10:00 UTC);
        let store = store_of(vec![
            AssetRecord::new("A", AssetStatus::Working, at),
            AssetRecord::new("B", AssetStatus::Offline, at),
            AssetRecord::new("C", AssetStatus::Unknown("sparkling".into()), at),
        ]);
        let view = project(&store, &ViewFilter::default(), &HashMap::new());
        assert_eq!(view.counts.total, 3);
        assert_eq!(view.counts.working + view.counts.offline + view.counts.maintenance + view.counts.removed, 2);
        assert_eq!(view.counts.unknown, 1);
        assert_eq!(ids(&view).last(), Some(&"C"));
    }

    #[test]
    fn filters_combine_text_status_and_client() {
        let at = datetime!(2024-05-01 10:00 UTC);
        let store = store_of(vec![
            AssetRecord::new("CAM-1", AssetStatus::Working, at).with_name("North Gate").with_client("T1"),
            AssetRecord::new("CAM-2", AssetStatus::Working, at).with_location("Gate B").with_client("T2"),
            AssetRecord::new("CAM-3", AssetStatus::Offline, at).with_name("Gate South").with_client("T1"),
            AssetRecord::new("CAM-4", AssetStatus::Working, at).with_name("Lobby").with_client("T1"),
        ]);
        let none = HashMap::new();

        let text = ViewFilter { q: Some("  GATE ".into()), ..Default::default() };
        assert_eq!(ids(&project(&store, &text, &none)), vec!["CAM-3", "CAM-1", "CAM-2"]);

        let narrowed = ViewFilter {
            q: Some("gate".into()),
            status: Some("working".into()),
            client: Some("T1".into()),
        };
        assert_eq!(ids(&project(&store, &narrowed, &none)), vec!["CAM-1"]);

        let all = ViewFilter { status: Some("all".into()), client: Some("all".into()), q: None };
        let view = project(&store, &all, &none);
        assert_eq!(view.rows.len(), 4);
        assert_eq!(view.counts.total, 4);
    }

    #[test]
    fn rows_carry_down_since() {
        let at = datetime!(2024-05-01 10:00 UTC);
        let store = store_of(vec![AssetRecord::new("CAM-1", AssetStatus::Offline, at)]);
        let mut down = HashMap::new();
        down.insert("CAM-1".to_string(), at);
        let view = project(&store, &ViewFilter::default(), &down);
        let json = serde_json::to_value(&view.rows[0]).unwrap();
        assert_eq!(json["id"], "CAM-1");
        assert_eq!(json["downSince"], "2024-05-01T10:00:00Z");
    }
}
