use crate::engine::EngineSettings;
use crate::models::AssetStatus;
use crate::reconciler::RecordDefaults;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid YAML in {path}: {source}")]
    Parse { path: String, source: serde_yaml::Error },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub collections: BTreeMap<String, CollectionConf>,
    pub default_view: String,
    pub incident_log_capacity: usize,
    pub unknown_location: String,
    pub default_client: String,
    pub bulk_roles: Vec<String>,
    pub alarm_on_offline_increase: bool,
    pub mqtt: MqttConf,
    pub http: HttpConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CollectionConf {
    pub label: String,
    #[serde(default = "default_down_statuses")]
    pub down_statuses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub port: u16,
}

fn default_down_statuses() -> Vec<String> {
    vec!["offline".into()]
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883 }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        let mut collections = BTreeMap::new();
        collections.insert(
            "cameras".to_string(),
            CollectionConf { label: "CCTV".into(), down_statuses: default_down_statuses() },
        );
        collections.insert(
            "rt_inventory".to_string(),
            CollectionConf { label: "RT".into(), down_statuses: default_down_statuses() },
        );
        Self {
            collections,
            default_view: "cameras".into(),
            incident_log_capacity: crate::incidents::DEFAULT_LOG_CAPACITY,
            unknown_location: "Unknown".into(),
            default_client: "T1".into(),
            bulk_roles: vec!["admin".into(), "supervisor".into()],
            alarm_on_offline_increase: true,
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
        }
    }
}

impl KernelConfig {
    pub fn parse(txt: &str, path: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
    }

    /// Rôle autorisé aux mutations groupées et à l'import CSV (comparaison sans casse).
    pub fn can_bulk(&self, role: &str) -> bool {
        let role = role.trim();
        !role.is_empty() && self.bulk_roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn engine_settings(&self, conf: &CollectionConf) -> EngineSettings {
        EngineSettings {
            label: conf.label.clone(),
            down_set: conf.down_statuses.iter().map(|s| AssetStatus::parse(s)).collect(),
            incident_capacity: self.incident_log_capacity,
            defaults: RecordDefaults {
                client: self.default_client.clone(),
                location: self.unknown_location.clone(),
            },
            alarm_on_offline_increase: self.alarm_on_offline_increase,
        }
    }
}

pub async fn read_config(path: &str) -> Result<KernelConfig, ConfigError> {
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
    KernelConfig::parse(&txt, path)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("FLEETWATCH_CONFIG").unwrap_or_else(|_| "fleetwatch.yaml".into());
    if !Path::new(&path).exists() {
        warn!("[config] pas de {path}, usage config par défaut");
        return KernelConfig::default();
    }
    match read_config(&path).await {
        Ok(cfg) => {
            info!(collections = cfg.collections.len(), "[config] loaded {path}");
            cfg
        }
        Err(e) => {
            warn!("[config] config invalide: {e}");
            KernelConfig::default()
        }
    }
}
