use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::membership::NodeId;

/// `current_term voted_for leader_id last_log_index last_log_term`, the
/// single line that makes `rale.state` the authoritative cross-subsystem
/// channel for leader identity (spec.md §5, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistentState {
    pub current_term: u32,
    pub voted_for: NodeId,
    pub leader_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u32,
}

impl PersistentState {
    pub fn fresh() -> Self {
        Self {
            current_term: 0,
            voted_for: -1,
            leader_id: -1,
            last_log_index: 0,
            last_log_term: 0,
        }
    }

    fn to_line(self) -> String {
        format!(
            "{} {} {} {} {}\n",
            self.current_term, self.voted_for, self.leader_id, self.last_log_index, self.last_log_term
        )
    }

    fn parse_line(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let mut next_i64 = || -> Result<i64> {
            fields
                .next()
                .ok_or(Error::Corrupt)?
                .parse::<i64>()
                .map_err(|_| Error::Corrupt)
        };
        let current_term = next_i64()?;
        let voted_for = next_i64()?;
        let leader_id = next_i64()?;
        let last_log_index = next_i64()?;
        let last_log_term = next_i64()?;
        if current_term < 0 || last_log_index < 0 || last_log_term < 0 {
            return Err(Error::Corrupt);
        }
        Ok(Self {
            current_term: current_term as u32,
            voted_for: voted_for as NodeId,
            leader_id: leader_id as NodeId,
            last_log_index: last_log_index as u64,
            last_log_term: last_log_term as u32,
        })
    }
}

/// Guards concurrent writers to `rale.state`; a single writer per file at
/// any time (spec.md §4.2).
pub struct StateStore {
    state_path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            state_path: db_path.as_ref().join("rale.state"),
            write_lock: Mutex::new(()),
        }
    }

    /// Absent or short-parse files are treated as fresh state, never
    /// surfaced as an error to callers of the engine (spec.md §4.2, §7).
    pub fn load_state(&self) -> PersistentState {
        match self.load_state_checked() {
            Ok(state) => state,
            Err(_) => PersistentState::fresh(),
        }
    }

    /// Inner loader distinguishing `NotFound`/`Corrupt` for tests (P5).
    pub fn load_state_checked(&self) -> Result<PersistentState> {
        let contents = match fs::read_to_string(&self.state_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(Error::PersistError(e.to_string())),
        };
        let first_line = contents.lines().next().ok_or(Error::Corrupt)?;
        PersistentState::parse_line(first_line)
    }

    pub fn save_state(&self, state: PersistentState) -> Result<()> {
        let _guard = self.write_lock.lock();
        fs::write(&self.state_path, state.to_line()).map_err(|e| Error::PersistError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_fresh() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.load_state(), PersistentState::fresh());
        assert!(matches!(store.load_state_checked(), Err(Error::NotFound)));
    }

    #[test]
    fn round_trip_save_and_load_p5() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = PersistentState {
            current_term: 7,
            voted_for: 3,
            leader_id: 3,
            last_log_index: 42,
            last_log_term: 6,
        };
        store.save_state(state).unwrap();
        assert_eq!(store.load_state_checked().unwrap(), state);
    }

    #[test]
    fn truncated_file_is_corrupt_then_treated_as_fresh() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("rale.state"), "3 1\n").unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(store.load_state_checked(), Err(Error::Corrupt)));
        assert_eq!(store.load_state(), PersistentState::fresh());
    }

    #[test]
    fn bit_exact_line_format() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = PersistentState {
            current_term: 1,
            voted_for: -1,
            leader_id: 1,
            last_log_index: 0,
            last_log_term: 0,
        };
        store.save_state(state).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("rale.state")).unwrap();
        assert_eq!(raw, "1 -1 1 0 0\n");
    }
}
