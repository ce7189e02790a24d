//! Append-only cache of resolved profiles, one JSON object per line.
//!
//! Lookups go by canonical id or (case-insensitive) handle. Entries are
//! never invalidated; when a profile was appended twice the later line wins.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tgharvest_common::{EntityRef, Profile};
use tracing::debug;

#[derive(Debug)]
pub struct ProfileCache {
    path: PathBuf,
    profiles: Vec<Profile>,
    by_id: HashMap<i64, usize>,
    by_handle: HashMap<String, usize>,
}

impl ProfileCache {
    /// Read the cache file. A missing file is an empty cache; lines that do
    /// not parse as profiles are skipped.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let mut cache = Self {
            path: path.to_path_buf(),
            profiles: Vec::new(),
            by_id: HashMap::new(),
            by_handle: HashMap::new(),
        };

        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cache),
            Err(e) => return Err(e),
        };

        for (lineno, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Profile>(&line) {
                Ok(profile) => cache.index(profile),
                Err(e) => debug!(path = %path.display(), line = lineno + 1, error = %e, "Skipping unreadable profile line"),
            }
        }
        Ok(cache)
    }

    fn index(&mut self, profile: Profile) {
        let slot = self.profiles.len();
        self.by_id.insert(profile.id, slot);
        if let Some(handle) = &profile.username {
            self.by_handle.insert(handle.to_lowercase(), slot);
        }
        self.profiles.push(profile);
    }

    pub fn lookup(&self, entity: &EntityRef) -> Option<&Profile> {
        let slot = match entity {
            EntityRef::Id(id) => self.by_id.get(id),
            EntityRef::Handle(handle) => self
                .by_handle
                .get(&handle.trim_start_matches('@').to_lowercase()),
        }?;
        self.profiles.get(*slot)
    }

    /// Write the profile to disk, then make it visible to lookups.
    pub fn append(&mut self, profile: Profile) -> std::io::Result<()> {
        let mut line = serde_json::to_string(&profile)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        self.index(profile);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
