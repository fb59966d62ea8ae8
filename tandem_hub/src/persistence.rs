// Persistence service for saved games and per-player map data.
//
// The hub stores and returns opaque blobs: the world and unit data the
// host peer produces on autosave, and the maps a player hands back with
// `QuitMaps`. Alongside the blobs a saved game carries the two counters a
// restarted hub must resume from: the tick the world was saved at and the
// first id no block has covered yet. `FileStore` keeps them under a
// directory:
//
//   <dir>/game.bin               tick, id counter, world + unit blobs
//   <dir>/players/<name>.maps    one file per player
//
// Writes go to a `.tmp` sibling first and are renamed into place, so a crash
// mid-write leaves the previous save intact.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tandem_protocol::{ByteReader, ByteWriter, UnitId};

use crate::error::StoreError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SavedGame {
    /// Tick the host's world was saved at.
    pub tick: u32,
    /// Id allocator counter when the save landed.
    pub next_id: i32,
    pub world: Vec<u8>,
    pub units: Vec<(UnitId, Vec<u8>)>,
}

impl SavedGame {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32(self.tick)
            .write_i32(self.next_id)
            .write_bytes(&self.world).write_len(self.units.len());
        for (unit, data) in &self.units {
            w.write_i32(unit.0).write_bytes(data);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let mut r = ByteReader::new(bytes);
        let tick = r.read_u32()?;
        let next_id = r.read_i32()?;
        let world = r.read_bytes()?;
        let mut units = Vec::new();
        for _ in 0..r.read_len()? {
            units.push((UnitId(r.read_i32()?), r.read_bytes()?));
        }
        r.finish()?;
        Ok(Self {
            tick,
            next_id,
            world,
            units,
        })
    }
}

pub trait SnapshotStore: Send {
    fn load_game(&self) -> Result<Option<SavedGame>, StoreError>;
    fn save_game(&mut self, game: &SavedGame) -> Result<(), StoreError>;
    fn load_player_maps(&self, username: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn save_player_maps(&mut self, username: &str, data: &[u8]) -> Result<(), StoreError>;
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn game_path(&self) -> PathBuf {
        self.dir.join("game.bin")
    }

    fn maps_path(&self, username: &str) -> PathBuf {
        self.dir.join("players").join(format!("{username}.maps"))
    }
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

impl SnapshotStore for FileStore {
    fn load_game(&self) -> Result<Option<SavedGame>, StoreError> {
        match read_optional(&self.game_path())? {
            Some(bytes) => Ok(Some(SavedGame::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_game(&mut self, game: &SavedGame) -> Result<(), StoreError> {
        write_atomic(&self.game_path(), &game.encode())
    }

    fn load_player_maps(&self, username: &str) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.maps_path(username))
    }

    fn save_player_maps(&mut self, username: &str, data: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.maps_path(username), data)
    }
}

/// In-memory store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub game: Option<SavedGame>,
    pub player_maps: BTreeMap<String, Vec<u8>>,
}

impl SnapshotStore for MemoryStore {
    fn load_game(&self) -> Result<Option<SavedGame>, StoreError> {
        Ok(self.game.clone())
    }

    fn save_game(&mut self, game: &SavedGame) -> Result<(), StoreError> {
        self.game = Some(game.clone());
        Ok(())
    }

    fn load_player_maps(&self, username: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.player_maps.get(username).cloned())
    }

    fn save_player_maps(&mut self, username: &str, data: &[u8]) -> Result<(), StoreError> {
        self.player_maps.insert(username.into(), data.to_vec());
        Ok(())
    }
}
