use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::storage::Tables;

/// Manages the store snapshot on disk.
///
/// The whole table set is small enough to serialize in one piece, so
/// durability is a full snapshot: write to a temp file, sync, then rename
/// over the previous snapshot (atomic on most filesystems).
#[derive(Debug)]
pub struct Persistence {
    base_path: PathBuf,
}

impl Persistence {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Persistence { base_path })
    }

    /// Save a snapshot of every table.
    pub fn save(&self, tables: &Tables) -> Result<(), PersistenceError> {
        let snapshot_path = self.snapshot_path();
        let serialized = serde_json::to_vec(tables)?;

        // Write to a temporary file first
        let temp_path = snapshot_path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&serialized)?;
        file.sync_all()?;

        fs::rename(&temp_path, &snapshot_path)?;
        Ok(())
    }

    /// Load the snapshot, if one exists.
    pub fn load(&self) -> Result<Option<Tables>, PersistenceError> {
        let snapshot_path = self.snapshot_path();
        if !snapshot_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&snapshot_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let tables: Tables = serde_json::from_slice(&buffer)?;
        Ok(Some(tables))
    }

    fn snapshot_path(&self) -> PathBuf {
        self.base_path.join("partogram.snapshot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NuevoItem;
    use crate::storage::Store;

    #[test]
    fn snapshot_round_trips_the_tables() {
        let dir = std::env::temp_dir().join("partogram-persistence-test");
        let _ = fs::remove_dir_all(&dir);
        let persistence = Persistence::new(&dir).unwrap();

        let store = Store::new();
        store
            .create_item(NuevoItem {
                codigo: "CTRL_MAT".into(),
                nombre: "Controles Maternos".into(),
            })
            .unwrap();

        persistence.save(&store.export_tables()).unwrap();
        let recargado = persistence.load().unwrap().unwrap();

        let recargado = Store::from_tables(recargado);
        assert_eq!(recargado.list_items().len(), 1);
        assert_eq!(recargado.list_items()[0].codigo, "CTRL_MAT");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = std::env::temp_dir().join("partogram-persistence-empty");
        let _ = fs::remove_dir_all(&dir);
        let persistence = Persistence::new(&dir).unwrap();
        assert!(persistence.load().unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }
}
