/**
 * CSV UPSERT MERGER - Import/export CSV des assets d'une collection
 *
 * RÔLE :
 * Fusionne un fichier CSV (UTF-8, virgules, première ligne = en-tête) dans le store,
 * par identifiant, sans jamais effacer un champ absent du fichier.
 *
 * FONCTIONNEMENT :
 * - Champs entre guillemets : virgules, guillemets doublés et sauts de ligne conservés
 * - En-têtes comparés sans casse ; colonne identifiant `id` ou `camera_id`
 * - Fichier de moins de 2 lignes ou sans colonne identifiant → no-op silencieux
 * - Ligne à identifiant vide → ignorée
 * - Nouvel asset : valeurs du CSV, sinon défauts (statut working, localisation "Unknown")
 * - Asset existant : seules les cellules présentes et non vides écrasent le stocké
 * - Statut trim + lowercase ; valeur inconnue conservée telle quelle
 * - Doublon dans un même fichier : la dernière ligne gagne
 * - Idempotent : `updatedAt` ne bouge que si un champ a réellement changé
 *
 * EXPORT :
 * En-tête + une ligne par asset filtré, champs entre guillemets (guillemets doublés).
 */

use crate::models::{AssetRecord, AssetStatus, TransitionEvent};
use crate::store::AssetStore;
use serde::Serialize;
use std::collections::HashMap;
use time::{Date, OffsetDateTime};

const ID_HEADERS: [&str; 2] = ["id", "camera_id"];
const NAME_HEADERS: [&str; 2] = ["name", "camera_name"];
pub const EXPORT_HEADER: &str = "id,name,client,location,status";

/// Découpe le texte en enregistrements puis en champs. Un saut de ligne entre
/// guillemets reste dans le champ ; les enregistrements vides sont ignorés.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut blank = true;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) => {
                in_quotes = true;
                blank = false;
            }
            (',', false) => {
                fields.push(std::mem::take(&mut current));
                blank = false;
            }
            ('\r', false) => {}
            ('\n', false) => {
                fields.push(std::mem::take(&mut current));
                let record = std::mem::take(&mut fields);
                if !blank {
                    records.push(record);
                }
                blank = true;
            }
            (ch, _) => {
                blank &= ch.is_whitespace();
                current.push(ch);
            }
        }
    }
    if !blank {
        fields.push(current);
        records.push(fields);
    }
    records
}

/// Position de chaque colonne reconnue dans l'en-tête.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvColumns {
    pub id: usize,
    pub name: Option<usize>,
    pub client: Option<usize>,
    pub location: Option<usize>,
    pub status: Option<usize>,
}

impl CsvColumns {
    pub fn from_header(header: &[String]) -> Option<Self> {
        let normalized: Vec<String> = header
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        let find = |names: &[&str]| normalized.iter().position(|h| names.contains(&h.as_str()));

        Some(Self {
            id: find(&ID_HEADERS)?,
            name: find(&NAME_HEADERS),
            client: find(&["client"]),
            location: find(&["location"]),
            status: find(&["status"]),
        })
    }
}

/// Ligne CSV interprétée : `None` = colonne absente ou cellule vide.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvUpsert {
    pub id: String,
    pub name: Option<String>,
    pub client: Option<String>,
    pub location: Option<String>,
    pub status: Option<AssetStatus>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvPlan {
    pub upserts: Vec<CsvUpsert>,
    pub skipped_rows: usize,
}

/// Interprète le fichier. `None` si le fichier est inexploitable (moins de
/// 2 lignes, pas de colonne identifiant) : l'import est alors un no-op.
pub fn plan_import(text: &str) -> Option<CsvPlan> {
    let rows = parse_csv(text);
    if rows.len() < 2 {
        return None;
    }
    let columns = CsvColumns::from_header(&rows[0])?;

    let mut plan = CsvPlan::default();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in &rows[1..] {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let Some(id) = cell(Some(columns.id)) else {
            plan.skipped_rows += 1;
            continue;
        };
        let upsert = CsvUpsert {
            id: id.clone(),
            name: cell(columns.name),
            client: cell(columns.client),
            location: cell(columns.location),
            status: cell(columns.status).map(|s| AssetStatus::parse(&s)),
        };
        // doublon : la dernière ligne remplace la précédente, à sa place
        match positions.get(&id) {
            Some(&idx) => plan.upserts[idx] = upsert,
            None => {
                positions.insert(id, plan.upserts.len());
                plan.upserts.push(upsert);
            }
        }
    }
    Some(plan)
}

/// Défauts d'import appliqués aux nouveaux assets.
#[derive(Debug, Clone)]
pub struct CsvDefaults {
    pub client: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Created,
    Updated(Option<TransitionEvent>),
    Unchanged,
}

/// Fusionne une ligne dans le store. Une transition de statut est
/// retournée pour être transmise au tracker d'incidents.
pub fn merge_row(
    store: &mut AssetStore,
    row: &CsvUpsert,
    defaults: &CsvDefaults,
    now: OffsetDateTime,
    actor: &str,
) -> MergeOutcome {
    if !store.contains(&row.id) {
        let record = AssetRecord::new(row.id.clone(), row.status.clone().unwrap_or(AssetStatus::Working), now)
            .with_name(row.name.clone().unwrap_or_else(|| row.id.clone()))
            .with_client(row.client.clone().unwrap_or_else(|| defaults.client.clone()))
            .with_location(row.location.clone().unwrap_or_else(|| defaults.location.clone()))
            .with_updated_by(actor);
        store.insert(record);
        return MergeOutcome::Created;
    }
    let Some(existing) = store.get_mut(&row.id) else {
        return MergeOutcome::Unchanged;
    };

    let mut changed = false;
    for (slot, value) in [
        (&mut existing.name, &row.name),
        (&mut existing.client, &row.client),
        (&mut existing.location, &row.location),
    ] {
        if let Some(value) = value {
            if *slot != *value {
                *slot = value.clone();
                changed = true;
            }
        }
    }

    let mut transition = None;
    if let Some(status) = &row.status {
        if *status != existing.status {
            let previous = std::mem::replace(&mut existing.status, status.clone());
            transition = Some(TransitionEvent {
                asset_id: row.id.clone(),
                previous,
                current: status.clone(),
                at: now,
            });
            changed = true;
        }
    }

    if !changed {
        return MergeOutcome::Unchanged;
    }
    existing.updated_at = now;
    existing.updated_by = Some(actor.to_string());
    MergeOutcome::Updated(transition)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CsvMergeReport {
    pub rows: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_rows: usize,
}

// ===== Export =====

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

pub fn export_csv<'a>(records: impl Iterator<Item = &'a AssetRecord>) -> String {
    let mut lines = vec![EXPORT_HEADER.to_string()];
    lines.extend(records.map(|r| {
        [r.id(), r.name.as_str(), r.client.as_str(), r.location.as_str(), r.status.as_str()]
            .iter()
            .map(|f| quote(f))
            .collect::<Vec<_>>()
            .join(",")
    }));
    lines.join("\n")
}

/// Nom du fichier téléchargé : `{vue}_{AAAA-MM-JJ}.csv`. Le libellé passe dans
/// un en-tête Content-Disposition : guillemets, séparateurs et caractères de
/// contrôle y sont remplacés par `_`.
pub fn export_file_name(view_label: &str, date: Date) -> String {
    let label: String = view_label
        .chars()
        .map(|c| if c == '"' || c == '\\' || c == '/' || c.is_control() { '_' } else { c })
        .collect();
    format!(
        "{}_{:04}-{:02}-{:02}.csv",
        label,
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_devkit::CsvFixture;
    use time::macros::{date, datetime};

    fn defaults() -> CsvDefaults {
        CsvDefaults { client: "T1".into(), location: "Unknown".into() }
    }

    fn apply(store: &mut AssetStore, text: &str, now: OffsetDateTime) -> Vec<MergeOutcome> {
        let plan = plan_import(text).unwrap_or_default();
        plan.upserts
            .iter()
            .map(|row| merge_row(store, row, &defaults(), now, "csv"))
            .collect()
    }

    #[test]
    fn parse_handles_quotes_doubled_quotes_and_crlf() {
        let rows = parse_csv("a,\"b,c\",\"say \"\"hi\"\"\",,\r\n\r\n  \nx,y");
        assert_eq!(rows, vec![vec!["a", "b,c", r#"say "hi""#, "", ""], vec!["x", "y"]]);
    }

    #[test]
    fn quoted_cell_may_span_several_lines() {
        let csv = CsvFixture::new(&["id", "name"])
            .raw_line("CAM-1,\"Gate")
            .raw_line("North\"")
            .row(&["CAM-2", "Lobby"])
            .build();
        let plan = plan_import(&csv).unwrap();
        assert_eq!(plan.upserts.len(), 2);
        assert_eq!(plan.upserts[0].name.as_deref(), Some("Gate\nNorth"));
        assert_eq!(plan.upserts[1].id, "CAM-2");
    }

    #[test]
    fn header_accepts_both_identifier_spellings_case_insensitively() {
        let header: Vec<String> = vec!["Camera_ID".into(), " NAME ".into(), "Status".into()];
        let cols = CsvColumns::from_header(&header).unwrap();
        assert_eq!(cols.id, 0);
        assert_eq!(cols.name, Some(1));
        assert_eq!(cols.status, Some(2));
        assert_eq!(cols.location, None);

        let no_id: Vec<String> = vec!["name".into(), "status".into()];
        assert!(CsvColumns::from_header(&no_id).is_none());
    }

    #[test]
    fn files_with_fewer_than_two_lines_are_a_no_op() {
        assert!(plan_import("").is_none());
        assert!(plan_import("id,name,status\n\n").is_none());
    }

    #[test]
    fn new_rows_get_documented_defaults() {
        let mut store = AssetStore::new();
        let now = datetime!(2024-05-01 10:00 UTC);
        let csv = CsvFixture::new(&["id", "name", "status"]).row(&["CAM-7", "", ""]).build();
        assert_eq!(apply(&mut store, &csv, now), vec![MergeOutcome::Created]);

        let rec = store.get("CAM-7").unwrap();
        assert_eq!(rec.name, "CAM-7");
        assert_eq!(rec.status, AssetStatus::Working);
        assert_eq!(rec.location, "Unknown");
        assert_eq!(rec.client, "T1");
    }

    #[test]
    fn existing_record_keeps_fields_absent_from_the_file() {
        let mut store = AssetStore::new();
        let at = datetime!(2024-05-01 09:00 UTC);
        store.insert(
            AssetRecord::new("CAM-9", AssetStatus::Working, at)
                .with_name("Gate")
                .with_client("T1")
                .with_location("Terminal 2"),
        );

        let csv = CsvFixture::new(&["id", "name", "client"]).row(&["CAM-9", "", "T2"]).build();
        apply(&mut store, &csv, datetime!(2024-05-01 10:00 UTC));

        let rec = store.get("CAM-9").unwrap();
        assert_eq!(rec.name, "Gate");
        assert_eq!(rec.location, "Terminal 2");
        assert_eq!(rec.client, "T2");
    }

    #[test]
    fn blank_cells_in_present_columns_do_not_erase() {
        let mut store = AssetStore::new();
        let at = datetime!(2024-05-01 09:00 UTC);
        store.insert(AssetRecord::new("CAM-9", AssetStatus::Working, at).with_name("Gate").with_location("T2 Kerb"));

        apply(&mut store, "id,name,client,location\nCAM-9,,T2,\n", datetime!(2024-05-01 10:00 UTC));
        let rec = store.get("CAM-9").unwrap();
        assert_eq!(rec.name, "Gate");
        assert_eq!(rec.location, "T2 Kerb");
        assert_eq!(rec.client, "T2");
    }

    #[test]
    fn status_change_produces_transition_and_unknown_is_kept() {
        let mut store = AssetStore::new();
        let at = datetime!(2024-05-01 09:00 UTC);
        store.insert(AssetRecord::new("CAM-1", AssetStatus::Working, at));
        let now = datetime!(2024-05-01 10:00 UTC);

        let out = apply(&mut store, "id,status\nCAM-1, OFFLINE \nCAM-2,Blinking\n", now);
        match &out[0] {
            MergeOutcome::Updated(Some(ev)) => {
                assert_eq!(ev.current, AssetStatus::Offline);
                assert_eq!(ev.at, now);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.get("CAM-2").unwrap().status, AssetStatus::Unknown("blinking".into()));
    }

    #[test]
    fn reupload_is_idempotent_and_last_duplicate_wins() {
        let csv = CsvFixture::new(&["id", "name", "client", "location", "status"])
            .row(&["CAM-1", "Gate", "T1", "North", "working"])
            .row(&["CAM-2", "Lobby", "T2", "", "maintenance"])
            .row(&["CAM-1", "Gate East", "T1", "North", "offline"])
            .build();

        let mut once = AssetStore::new();
        apply(&mut once, &csv, datetime!(2024-05-01 10:00 UTC));
        let mut twice = once.clone();
        let second = apply(&mut twice, &csv, datetime!(2024-05-01 11:00 UTC));

        let a: Vec<&AssetRecord> = once.records().collect();
        let b: Vec<&AssetRecord> = twice.records().collect();
        assert_eq!(a, b);
        assert_eq!(once.get("CAM-1").unwrap().name, "Gate East");
        assert_eq!(once.get("CAM-1").unwrap().status, AssetStatus::Offline);
        assert_eq!(second, vec![MergeOutcome::Unchanged, MergeOutcome::Unchanged]);
    }

    #[test]
    fn duplicates_collapse_to_the_last_row_in_first_position() {
        let plan = plan_import("id,name\nCAM-2,Lobby\nCAM-1,Gate\nCAM-2,Lobby East\n").unwrap();
        let names: Vec<(&str, Option<&str>)> =
            plan.upserts.iter().map(|u| (u.id.as_str(), u.name.as_deref())).collect();
        assert_eq!(names, vec![("CAM-2", Some("Lobby East")), ("CAM-1", Some("Gate"))]);
    }

    #[test]
    fn rows_with_blank_identifier_are_skipped() {
        let plan = plan_import("id,name\n ,Ghost\nCAM-1,Gate\n").unwrap();
        assert_eq!(plan.skipped_rows, 1);
        assert_eq!(plan.upserts.len(), 1);
    }

    #[test]
    fn export_quotes_fields_and_round_trips_through_import() {
        let at = datetime!(2024-05-01 09:00 UTC);
        let rec = AssetRecord::new("CAM-1", AssetStatus::Offline, at)
            .with_name(r#"Gate "A", north"#)
            .with_client("T1")
            .with_location("Kerb");
        let csv = export_csv(std::iter::once(&rec));
        assert_eq!(
            csv,
            "id,name,client,location,status\n\"CAM-1\",\"Gate \"\"A\"\", north\",\"T1\",\"Kerb\",\"offline\""
        );

        let plan = plan_import(&csv).unwrap();
        assert_eq!(plan.upserts[0].name.as_deref(), Some(r#"Gate "A", north"#));
        assert_eq!(plan.upserts[0].status, Some(AssetStatus::Offline));
    }

    #[test]
    fn export_with_embedded_newline_survives_reimport() {
        let at = datetime!(2024-05-01 09:00 UTC);
        let records = [
            AssetRecord::new("CAM-1", AssetStatus::Working, at).with_name("Gate\nNorth").with_location("Kerb"),
            AssetRecord::new("CAM-2", AssetStatus::Offline, at).with_name("Lobby"),
        ];
        let csv = export_csv(records.iter());

        let mut store = AssetStore::new();
        for rec in &records {
            store.insert(rec.clone());
        }
        let outcomes = apply(&mut store, &csv, datetime!(2024-05-01 10:00 UTC));
        assert_eq!(outcomes, vec![MergeOutcome::Unchanged, MergeOutcome::Unchanged]);
        assert_eq!(store.get("CAM-1").unwrap().name, "Gate\nNorth");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn export_file_name_uses_view_and_date() {
        assert_eq!(export_file_name("CCTV", date!(2024 - 03 - 07)), "CCTV_2024-03-07.csv");
    }

    #[test]
    fn export_file_name_neutralizes_header_breaking_characters() {
        assert_eq!(
            export_file_name("RT \"A\"/B\\C\r\n", date!(2024 - 03 - 07)),
            "RT _A__B_C___2024-03-07.csv"
        );
    }
}
