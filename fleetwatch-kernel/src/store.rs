/**
 * ASSET STORE - Table en mémoire du dernier état connu de chaque asset
 *
 * RÔLE :
 * Source de vérité unique de l'état courant d'une collection (caméras, terminaux RT).
 * Le tracker d'incidents et la vue n'en sont que des dérivés.
 *
 * FONCTIONNEMENT :
 * - Clé = identifiant stable de l'asset (immuable une fois créé)
 * - BTreeMap : itération déterministe par identifiant
 * - Seule `remove` supprime un asset ; un snapshot incomplet ne supprime jamais rien
 */

use crate::models::{AssetRecord, AssetsMap};

#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    assets: AssetsMap,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&AssetRecord> {
        self.assets.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut AssetRecord> {
        self.assets.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    /// Insère un nouvel asset. Retourne `false` (sans rien écraser) si
    /// l'identifiant existe déjà : les mises à jour passent par `get_mut`.
    pub(crate) fn insert(&mut self, record: AssetRecord) -> bool {
        if self.assets.contains_key(record.id()) {
            return false;
        }
        self.assets.insert(record.id().to_string(), record);
        true
    }

    /// Suppression explicite, seule voie de suppression d'un asset.
    pub(crate) fn remove(&mut self, id: &str) -> Option<AssetRecord> {
        self.assets.remove(id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.assets.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetStatus;
    use time::macros::datetime;

    #[test]
    fn insert_never_overwrites_existing_identifier() {
        let mut store = AssetStore::new();
        let at = datetime!(2024-05-01 10:00 UTC);
        assert!(store.insert(AssetRecord::new("CAM-1", AssetStatus::Working, at).with_name("Gate")));
        assert!(!store.insert(AssetRecord::new("CAM-1", AssetStatus::Offline, at)));

        let rec = store.get("CAM-1").unwrap();
        assert_eq!(rec.name, "Gate");
        assert_eq!(rec.status, AssetStatus::Working);
    }

    #[test]
    fn records_iterate_in_identifier_order() {
        let mut store = AssetStore::new();
        let at = datetime!(2024-05-01 10:00 UTC);
        for id in ["CAM-3", "CAM-1", "CAM-2"] {
            store.insert(AssetRecord::new(id, AssetStatus::Working, at));
        }
        let ids: Vec<&str> = store.records().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["CAM-1", "CAM-2", "CAM-3"]);
    }

    #[test]
    fn remove_is_explicit() {
        let mut store = AssetStore::new();
        let at = datetime!(2024-05-01 10:00 UTC);
        store.insert(AssetRecord::new("CAM-1", AssetStatus::Working, at));
        assert!(store.remove("CAM-1").is_some());
        assert!(store.remove("CAM-1").is_none());
        assert_eq!(store.len(), 0);
    }
}
