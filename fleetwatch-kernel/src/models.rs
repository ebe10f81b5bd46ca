use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Statut opérationnel d'un asset.
///
/// Les valeurs hors énumération ne font jamais échouer l'ingestion :
/// elles sont conservées telles quelles (normalisées) dans `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetStatus {
    Working,
    Offline,
    Maintenance,
    Removed,
    Unknown(String),
}

impl AssetStatus {
    pub const KNOWN: [AssetStatus; 4] = [
        AssetStatus::Working,
        AssetStatus::Offline,
        AssetStatus::Maintenance,
        AssetStatus::Removed,
    ];

    /// Trim + lowercase, puis correspondance avec les valeurs connues.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "working" => AssetStatus::Working,
            "offline" => AssetStatus::Offline,
            "maintenance" => AssetStatus::Maintenance,
            "removed" => AssetStatus::Removed,
            _ => AssetStatus::Unknown(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AssetStatus::Working => "working",
            AssetStatus::Offline => "offline",
            AssetStatus::Maintenance => "maintenance",
            AssetStatus::Removed => "removed",
            AssetStatus::Unknown(raw) => raw,
        }
    }

    /// Rang de criticité pour le tri de la vue (plus petit = plus critique).
    pub fn criticality_rank(&self) -> u8 {
        match self {
            AssetStatus::Offline => 0,
            AssetStatus::Maintenance => 1,
            AssetStatus::Removed => 2,
            AssetStatus::Working => 3,
            AssetStatus::Unknown(_) => 4,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, AssetStatus::Unknown(_))
    }

    pub fn is_down(&self, down_set: &[AssetStatus]) -> bool {
        down_set.contains(self)
    }
}

impl From<String> for AssetStatus {
    fn from(raw: String) -> Self {
        AssetStatus::parse(&raw)
    }
}

impl From<AssetStatus> for String {
    fn from(status: AssetStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dernier état connu d'un asset (caméra, terminal RT...).
///
/// L'identifiant est fixé à la création et n'est exposé qu'en lecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    id: String,
    pub name: String,
    pub client: String,
    pub location: String,
    pub status: AssetStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub updated_by: Option<String>,
}

impl AssetRecord {
    /// Nom par défaut = identifiant, client et localisation vides.
    pub fn new(id: impl Into<String>, status: AssetStatus, updated_at: OffsetDateTime) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            client: String::new(),
            location: String::new(),
            status,
            updated_at,
            updated_by: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_updated_by(mut self, actor: impl Into<String>) -> Self {
        self.updated_by = Some(actor.into());
        self
    }
}

pub type AssetsMap = BTreeMap<String, AssetRecord>;

// ===== Flux entrant (snapshot) =====

/// Horodatage tel qu'il arrive sur le fil : millisecondes epoch,
/// texte RFC3339, ou objet `{seconds, nanoseconds}` (timestamp serveur).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    FractionalMillis(f64),
    Text(String),
    Parts {
        seconds: i64,
        #[serde(default)]
        nanoseconds: i64,
    },
}

impl WireTimestamp {
    pub fn resolve(&self) -> Option<OffsetDateTime> {
        match self {
            WireTimestamp::Millis(ms) => {
                OffsetDateTime::from_unix_timestamp_nanos(*ms as i128 * 1_000_000).ok()
            }
            WireTimestamp::FractionalMillis(ms) if ms.is_finite() => {
                OffsetDateTime::from_unix_timestamp_nanos((*ms * 1_000_000.0) as i128).ok()
            }
            WireTimestamp::FractionalMillis(_) => None,
            WireTimestamp::Text(txt) => OffsetDateTime::parse(txt.trim(), &Rfc3339).ok(),
            WireTimestamp::Parts { seconds, nanoseconds } => {
                let nanos = *seconds as i128 * 1_000_000_000 + *nanoseconds as i128;
                OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
            }
        }
    }
}

/// Enregistrement brut d'un snapshot, tous champs optionnels.
///
/// Chaque champ est décodé isolément : un champ de type inattendu devient
/// `None` sans invalider le reste de l'enregistrement.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireAssetRecord {
    #[serde(deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(alias = "cameraName", deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub client: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(deserialize_with = "strict_text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<WireTimestamp>,
    #[serde(deserialize_with = "lenient_text")]
    pub updated_by: Option<String>,
}

/// Texte, ou nombre converti en texte ; tout autre type → `None`.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Un statut n'est accepté que sous forme de texte.
fn strict_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<WireTimestamp>, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).ok())
}

/// Enregistrement entrant validé : identifiant et statut garantis.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingAsset {
    pub id: String,
    pub name: Option<String>,
    pub client: Option<String>,
    pub location: Option<String>,
    pub status: AssetStatus,
    pub updated_at: OffsetDateTime,
    pub updated_by: Option<String>,
}

impl WireAssetRecord {
    /// `None` si l'identifiant ou le statut manque ; l'horodatage absent
    /// (ou illisible) est remplacé par l'horloge locale.
    pub fn validate(self, now: OffsetDateTime) -> Option<IncomingAsset> {
        let id = self.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
        let status = self.status.filter(|s| !s.trim().is_empty())?;
        Some(IncomingAsset {
            id,
            name: non_blank(self.name),
            client: non_blank(self.client),
            location: non_blank(self.location),
            status: AssetStatus::parse(&status),
            updated_at: self.updated_at.and_then(|ts| ts.resolve()).unwrap_or(now),
            updated_by: non_blank(self.updated_by),
        })
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ===== Mutations locales et écritures sortantes =====

/// Modification partielle demandée par un utilisateur (formulaire, API).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssetFields {
    pub name: Option<String>,
    pub client: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
}

/// Écriture partielle envoyée au store distant, clé = identifiant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPatch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AssetStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub updated_by: String,
}

impl AssetPatch {
    pub fn status_only(id: &str, status: AssetStatus, at: OffsetDateTime, actor: &str) -> Self {
        Self {
            id: id.to_string(),
            status: Some(status),
            name: None,
            client: None,
            location: None,
            updated_at: at,
            updated_by: actor.to_string(),
        }
    }

    /// Upsert complet : tous les champs de l'enregistrement.
    pub fn full(record: &AssetRecord, actor: &str) -> Self {
        Self {
            id: record.id().to_string(),
            status: Some(record.status.clone()),
            name: Some(record.name.clone()),
            client: Some(record.client.clone()),
            location: Some(record.location.clone()),
            updated_at: record.updated_at,
            updated_by: actor.to_string(),
        }
    }
}

/// Suppression explicite envoyée au store distant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDeletion {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub deleted_at: OffsetDateTime,
    pub deleted_by: String,
}

// ===== Transitions et incidents =====

/// Changement de statut détecté entre deux observations d'un asset.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub asset_id: String,
    pub previous: AssetStatus,
    pub current: AssetStatus,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    WentDown,
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentLogEntry {
    pub id: String,
    pub kind: IncidentKind,
    pub asset_id: String,
    pub asset_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
}
