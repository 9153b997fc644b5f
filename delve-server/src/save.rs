//! Player Save File
//!
//! Local, per-machine coin balance. Nothing here is replicated.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory created under the save root.
pub const SAVE_DIR: &str = "PlayerSaveFile";

/// File name inside [`SAVE_DIR`].
pub const SAVE_FILE: &str = "playerdata.json";

/// Save errors.
#[derive(Debug, Error)]
pub enum SaveError {
    /// No usable directory on this machine.
    #[error("no save directory available")]
    NoDirectory,

    /// Reading or writing failed.
    #[error("save file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid save data.
    #[error("corrupt save file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// On-disk format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveData {
    /// Collected coins.
    pub coins: u64,
}

/// Reads and writes the save file.
#[derive(Clone, Debug)]
pub struct SaveStore {
    root: PathBuf,
}

impl SaveStore {
    /// Store rooted at `root`; the file goes to `root/PlayerSaveFile/playerdata.json`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store on the desktop, or in the application data directory when
    /// there is no desktop.
    pub fn default_location() -> Result<Self, SaveError> {
        if let Some(desktop) = UserDirs::new().and_then(|dirs| dirs.desktop_dir().map(Path::to_path_buf)) {
            return Ok(Self::new(desktop));
        }
        ProjectDirs::from("", "", "delve")
            .map(|dirs| Self::new(dirs.data_dir()))
            .ok_or(SaveError::NoDirectory)
    }

    /// Full path of the save file.
    pub fn path(&self) -> PathBuf {
        self.root.join(SAVE_DIR).join(SAVE_FILE)
    }

    /// Saved coins; 0 when there is no save yet.
    pub fn load(&self) -> Result<u64, SaveError> {
        let path = self.path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "No save file, starting with 0 coins");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let data: SaveData = serde_json::from_str(&text)?;
        Ok(data.coins)
    }

    /// Overwrite the saved coins.
    pub fn save(&self, coins: u64) -> Result<(), SaveError> {
        let path = self.path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_string(&SaveData { coins })?)?;
        debug!(path = %path.display(), coins, "Saved");
        Ok(())
    }

    /// Add to the saved coins and return the new balance.
    pub fn add_coins(&self, amount: u64) -> Result<u64, SaveError> {
        let coins = self.load()?.saturating_add(amount);
        self.save(coins)?;
        Ok(coins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaveStore::new(dir.path());
        assert_eq!(store.load().unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaveStore::new(dir.path());

        store.save(42).unwrap();
        assert_eq!(store.load().unwrap(), 42);
        assert_eq!(store.add_coins(8).unwrap(), 50);

        let text = fs::read_to_string(dir.path().join("PlayerSaveFile").join("playerdata.json")).unwrap();
        assert_eq!(text, r#"{"coins":50}"#);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaveStore::new(dir.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not json").unwrap();

        assert!(matches!(store.load(), Err(SaveError::Corrupt(_))));
    }
}
