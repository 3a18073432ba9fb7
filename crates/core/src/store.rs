// crates/core/src/store.rs
//! File-backed template store.
//!
//! Templates live in one pretty-printed JSON file mapping name → template.
//! The store keeps an in-memory cache guarded by an `RwLock` and writes the
//! whole file back on every mutation; template sets are tiny and mutations
//! are rare, so simplicity beats cleverness here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::TemplateError;
use crate::template::{Template, TemplateKind};

#[derive(Debug)]
pub struct TemplateStore {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, Template>>,
}

impl TemplateStore {
    /// Open the store at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let path = path.into();
        let cache = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| TemplateError::Malformed {
                path: path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    /// Path of the backing JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All templates, sorted by name.
    pub fn list(&self) -> BTreeMap<String, Template> {
        match self.cache.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("template cache lock poisoned on read: {e}");
                BTreeMap::new()
            }
        }
    }

    /// Look up one template by name.
    pub fn get(&self, name: &str) -> Option<Template> {
        match self.cache.read() {
            Ok(guard) => guard.get(name).cloned(),
            Err(e) => {
                tracing::error!("template cache lock poisoned on read: {e}");
                None
            }
        }
    }

    /// Insert or replace a template and persist the store.
    ///
    /// Image templates must reference an overlay image.
    pub fn upsert(&self, name: &str, template: Template) -> Result<(), TemplateError> {
        if template.kind == TemplateKind::Image && template.image_path.is_none() {
            return Err(TemplateError::MissingImagePath {
                name: name.to_string(),
            });
        }
        let snapshot = {
            let mut guard = self
                .cache
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.insert(name.to_string(), template);
            guard.clone()
        };
        self.persist(&snapshot)
    }

    /// Remove a template. Returns `false` if the name was unknown.
    pub fn remove(&self, name: &str) -> Result<bool, TemplateError> {
        let (removed, snapshot) = {
            let mut guard = self
                .cache
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let removed = guard.remove(name).is_some();
            (removed, guard.clone())
        };
        if removed {
            self.persist(&snapshot)?;
        }
        Ok(removed)
    }

    fn persist(&self, snapshot: &BTreeMap<String, Template>) -> Result<(), TemplateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TemplateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(snapshot).expect("template map serializes");
        std::fs::write(&self.path, json).map_err(|source| TemplateError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Position;

    fn store_in(dir: &tempfile::TempDir) -> TemplateStore {
        TemplateStore::open(dir.path().join("templates.json")).unwrap()
    }

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.list().is_empty());
        assert!(store.get("anything").is_none());
    }

    #[test]
    fn upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let tmpl = Template {
            text: Some("© ACME {date:%Y}".to_string()),
            position: Position::Tile,
            ..Template::default()
        };
        store.upsert("acme", tmpl).unwrap();

        // A fresh store sees the persisted template.
        let reopened = store_in(&dir);
        let loaded = reopened.get("acme").unwrap();
        assert_eq!(loaded.text(), "© ACME {date:%Y}");
        assert_eq!(loaded.position, Position::Tile);
    }

    #[test]
    fn upsert_image_template_requires_image_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let tmpl = Template {
            kind: TemplateKind::Image,
            ..Template::default()
        };
        let err = store.upsert("logo", tmpl).unwrap_err();
        assert!(matches!(err, TemplateError::MissingImagePath { .. }));
        assert!(store.get("logo").is_none());
    }

    #[test]
    fn remove_reports_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.upsert("a", Template::default()).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
    }

    #[test]
    fn open_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = TemplateStore::open(&path).unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { .. }));
    }
}
