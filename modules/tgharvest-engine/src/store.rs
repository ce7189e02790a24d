//! Filesystem layout of harvested groups.
//!
//! ```text
//! {data_dir}/{group}/group.toml       group document
//! {data_dir}/{group}/profiles.jsonl   profile cache
//! {data_dir}/{group}/{id}.jsonl       one message log per canonical member id
//! ```

use std::path::{Path, PathBuf};

use tracing::info;

use crate::document;
use crate::error::StoreError;
use crate::group::Group;

const GROUP_DOCUMENT: &str = "group.toml";
const PROFILE_CACHE: &str = "profiles.jsonl";

#[derive(Debug, Clone)]
pub struct GroupStore {
    root: PathBuf,
}

impl GroupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn document_path(&self, name: &str) -> PathBuf {
        self.group_dir(name).join(GROUP_DOCUMENT)
    }

    pub fn profiles_path(&self, name: &str) -> PathBuf {
        self.group_dir(name).join(PROFILE_CACHE)
    }

    pub fn member_log_path(&self, name: &str, canonical_id: &str) -> PathBuf {
        self.group_dir(name).join(format!("{canonical_id}.jsonl"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.document_path(name).exists()
    }

    /// Create the group directory and write the initial document. Refuses
    /// to touch an existing directory.
    pub fn create(&self, group: &Group) -> Result<(), StoreError> {
        let name = group.name();
        validate_name(name)?;
        if group.members().is_empty() {
            return Err(StoreError::NoMembers(name.to_string()));
        }
        let dir = self.group_dir(name);
        if dir.exists() {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        self.save(group)?;
        info!(group = name, members = group.members().len(), dir = %dir.display(), "Created group");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Group, StoreError> {
        validate_name(name)?;
        let path = self.document_path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UnknownGroup(name.to_string()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let group = document::decode(&text).map_err(|source| StoreError::Document {
            path: path.clone(),
            source,
        })?;
        // saves go to the directory named inside the document
        if group.name() != name {
            return Err(StoreError::NameMismatch {
                path,
                expected: name.to_string(),
                found: group.name().to_string(),
            });
        }
        Ok(group)
    }

    /// Write the full document. Goes through a temp file and a rename so a
    /// crash never leaves a half-written document behind.
    pub fn save(&self, group: &Group) -> Result<(), StoreError> {
        let path = self.document_path(group.name());
        let text = document::encode(group).map_err(|source| StoreError::Document {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).map_err(|e| StoreError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }
}

/// Group names double as directory names.
fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgharvest_common::FetchParams;

    fn group(name: &str, members: &[&str]) -> Group {
        Group::new(
            name,
            members.iter().map(|s| s.to_string()).collect(),
            FetchParams {
                reverse: Some(true),
                ..Default::default()
            },
        )
    }

    #[test]
    fn create_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        let g = group("g", &["alice", "123"]);

        store.create(&g).unwrap();
        assert!(store.exists("g"));
        assert_eq!(store.load("g").unwrap(), g);
        assert!(store.document_path("g").ends_with("g/group.toml"));
    }

    #[test]
    fn create_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        std::fs::create_dir(dir.path().join("g")).unwrap();

        let err = store.create(&group("g", &["a"])).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn create_refuses_empty_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        let err = store.create(&group("g", &[])).unwrap_err();
        assert!(matches!(err, StoreError::NoMembers(_)));
        assert!(!dir.path().join("g").exists());
    }

    #[test]
    fn unknown_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(StoreError::UnknownGroup(_))));
    }

    #[test]
    fn names_must_be_plain_directory_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(
                matches!(store.load(name), Err(StoreError::InvalidName(_))),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn save_overwrites_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        let mut g = group("g", &["a", "b"]);
        store.create(&g).unwrap();

        g.quarantine("a", "gone");
        store.save(&g).unwrap();

        assert_eq!(store.load("g").unwrap().members(), ["b"]);
        assert!(!dir.path().join("g").join("group.toml.tmp").exists());
    }

    #[test]
    fn document_must_name_its_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::new(dir.path());
        store.create(&group("a", &["1"])).unwrap();
        store.create(&group("b", &["2"])).unwrap();

        let path = store.document_path("a");
        let original = std::fs::read_to_string(&path).unwrap();
        for edited in ["b", "../x"] {
            let text = original.replace("name = \"a\"", &format!("name = {edited:?}"));
            assert_ne!(text, original);
            std::fs::write(&path, text).unwrap();

            assert!(
                matches!(store.load("a"), Err(StoreError::NameMismatch { ref found, .. }) if found == edited),
                "{edited:?} accepted"
            );
        }
        assert_eq!(store.load("b").unwrap().members(), ["2"]);
        assert!(!dir.path().join("x").exists());
    }
}
