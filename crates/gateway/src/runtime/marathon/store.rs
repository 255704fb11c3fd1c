//! Durable marathon state store (§3, §4.G).
//!
//! Every transition is persisted via write-temp-then-rename so a crash
//! mid-write never leaves a torn file on disk: the new state is written to
//! `{id}.json.tmp` and then atomically renamed over `{id}.json`. In-memory
//! state is held behind a `RwLock<HashMap>` for fast reads from the status
//! endpoints and the Watchdog's tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sa_domain::error::{Error, Result};
use sa_domain::marathon::MarathonState;

pub struct MarathonStore {
    dir: PathBuf,
    states: RwLock<HashMap<String, MarathonState>>,
}

impl MarathonStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("marathons");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let mut states = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(raw) => match serde_json::from_str::<MarathonState>(&raw) {
                        Ok(state) => {
                            states.insert(state.id.clone(), state);
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable marathon state");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to read marathon state file");
                    }
                }
            }
        }

        tracing::info!(count = states.len(), "loaded marathon states from disk");
        Ok(Self {
            dir,
            states: RwLock::new(states),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomically persist `state` to disk and update the in-memory map.
    pub fn save(&self, state: MarathonState) -> Result<()> {
        let path = self.path_for(&state.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| Error::Other(format!("serializing marathon state: {e}")))?;
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;
        self.states.write().insert(state.id.clone(), state);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<MarathonState> {
        self.states.read().get(id).cloned()
    }

    /// Apply `f` to the stored state and persist the result, holding the
    /// write lock for the whole read-modify-write so concurrent mutations
    /// of the same marathon never interleave.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut MarathonState)) -> Result<Option<MarathonState>> {
        let mut states = self.states.write();
        let Some(state) = states.get_mut(id) else {
            return Ok(None);
        };
        f(state);
        let snapshot = state.clone();
        drop(states);
        self.save(snapshot.clone())?;
        Ok(Some(snapshot))
    }

    /// Write a full-snapshot checkpoint to `{id}.checkpoint-{n}.json` via
    /// write-temp-and-rename, then remove any older checkpoint file for the
    /// same marathon so only the latest is ever retained on disk (§4.G).
    pub fn save_checkpoint(&self, state: &MarathonState, n: u32) -> Result<()> {
        let path = self.dir.join(format!("{}.checkpoint-{n}.json", state.id));
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Other(format!("serializing marathon checkpoint: {e}")))?;
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;

        let prefix = format!("{}.checkpoint-", state.id);
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(&prefix) && *name != *path.file_name().unwrap().to_string_lossy() {
                    std::fs::remove_file(entry.path()).ok();
                }
            }
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<MarathonState> {
        let mut v: Vec<_> = self.states.read().values().cloned().collect();
        v.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        v
    }

    /// Relocate a marathon's state file to `marathon/quarantine/{id}.json`
    /// and drop it from the active in-memory map, so a startup-invariant
    /// failure can never be mistaken for a resumable marathon again.
    pub fn quarantine(&self, id: &str) -> Result<()> {
        let quarantine_dir = self.dir.join("quarantine");
        std::fs::create_dir_all(&quarantine_dir).map_err(Error::Io)?;
        let src = self.path_for(id);
        let dst = quarantine_dir.join(format!("{id}.json"));
        if src.exists() {
            std::fs::rename(&src, &dst).map_err(Error::Io)?;
        }
        self.states.write().remove(id);
        Ok(())
    }

    pub fn list_active(&self) -> Vec<MarathonState> {
        self.list()
            .into_iter()
            .filter(|m| !m.status.is_terminal())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarathonStore::new(dir.path()).unwrap();
        let state = MarathonState::new("do the thing", None, None);
        let id = state.id.clone();
        store.save(state).unwrap();

        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.id, id);
    }

    #[test]
    fn reload_from_disk_recovers_state() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = MarathonStore::new(dir.path()).unwrap();
            let state = MarathonState::new("goal", None, None);
            let id = state.id.clone();
            store.save(state).unwrap();
            id
        };

        let reloaded = MarathonStore::new(dir.path()).unwrap();
        assert!(reloaded.get(&id).is_some());
    }

    #[test]
    fn update_persists_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarathonStore::new(dir.path()).unwrap();
        let state = MarathonState::new("goal", None, None);
        let id = state.id.clone();
        store.save(state).unwrap();

        store
            .update(&id, |s| s.push_log("hello"))
            .unwrap()
            .unwrap();

        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.logs.len(), 1);
    }
}
