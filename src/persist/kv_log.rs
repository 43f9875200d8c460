use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Append-only `key=value\n` log backing the replicated KV store.
pub struct KvLog {
    db_path: PathBuf,
    write_lock: Mutex<()>,
}

impl KvLog {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().join("rale.db"),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads the log into a map. Lines without `=` or with a zero-length key
    /// are skipped (spec.md §6); later duplicate keys overwrite earlier ones.
    pub fn load(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        let contents = match fs::read_to_string(&self.db_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
            Err(e) => return Err(Error::PersistError(e.to_string())),
        };
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            map.insert(key.to_string(), value.to_string());
        }
        Ok(map)
    }

    pub fn append(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.db_path)
            .map_err(|e| Error::PersistError(e.to_string()))?;
        writeln!(file, "{key}={value}").map_err(|e| Error::PersistError(e.to_string()))
    }

    /// Rewrites `rale.db` atomically via a sibling temp file and rename.
    pub fn snapshot(&self, map: &HashMap<String, String>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let tmp_path = self.db_path.with_extension("db.tmp");
        let mut tmp = fs::File::create(&tmp_path).map_err(|e| Error::PersistError(e.to_string()))?;
        for (key, value) in map {
            writeln!(tmp, "{key}={value}").map_err(|e| Error::PersistError(e.to_string()))?;
        }
        tmp.sync_all().ok();
        fs::rename(&tmp_path, &self.db_path).map_err(|e| Error::PersistError(e.to_string()))
    }
}
