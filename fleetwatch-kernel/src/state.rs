use crate::config::KernelConfig;
use crate::engine::{EngineSettings, FleetEngine};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub type SharedFleets = Shared<Fleets>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub label: String,
    pub assets: usize,
    pub down: usize,
    pub active: bool,
}

/// Un moteur par collection monitorée + la vue active.
pub struct Fleets {
    engines: BTreeMap<String, FleetEngine>,
    active: String,
}

impl Fleets {
    pub fn new<I: IntoIterator<Item = (String, EngineSettings)>>(collections: I, default_view: &str) -> Self {
        let engines: BTreeMap<String, FleetEngine> = collections
            .into_iter()
            .map(|(name, settings)| (name.clone(), FleetEngine::new(name, settings)))
            .collect();
        let active = if engines.contains_key(default_view) {
            default_view.to_string()
        } else {
            engines.keys().next().cloned().unwrap_or_default()
        };
        Self { engines, active }
    }

    pub fn from_config(cfg: &KernelConfig) -> Self {
        let collections = cfg
            .collections
            .iter()
            .map(|(name, conf)| (name.clone(), cfg.engine_settings(conf)));
        Self::new(collections, &cfg.default_view)
    }

    pub fn get(&self, collection: &str) -> Option<&FleetEngine> {
        self.engines.get(collection)
    }

    pub fn get_mut(&mut self, collection: &str) -> Option<&mut FleetEngine> {
        self.engines.get_mut(collection)
    }

    pub fn engines(&self) -> impl Iterator<Item = &FleetEngine> {
        self.engines.values()
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    /// Change la vue active ; la sélection de la vue quittée est vidée.
    /// Collection inconnue → `false`, rien ne change.
    pub fn switch_view(&mut self, collection: &str) -> bool {
        if !self.engines.contains_key(collection) {
            return false;
        }
        if self.active != collection {
            if let Some(left) = self.engines.get_mut(&self.active) {
                left.clear_selection();
            }
            self.active = collection.to_string();
        }
        true
    }

    pub fn summaries(&self) -> Vec<CollectionSummary> {
        self.engines
            .values()
            .map(|engine| CollectionSummary {
                name: engine.collection().to_string(),
                label: engine.label().to_string(),
                assets: engine.store().len(),
                down: engine.down_count(),
                active: engine.collection() == self.active,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }
}
