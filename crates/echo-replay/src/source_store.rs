// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted source text for code-parse records.
//!
//! Source text is large and append-mostly, so the log only carries its length
//! and digest; the text itself lives in a [`SourceStore`] keyed by
//! `(directory, document, uri)`.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from a source store.
#[derive(Debug, Error)]
pub enum SourceStoreError {
    /// No source persisted under the key.
    #[error("no source for document {document} ({uri})")]
    NotFound {
        /// Document key.
        document: String,
        /// Script uri.
        uri: String,
    },
    /// Filesystem failure.
    #[error("source store io error: {0}")]
    Io(#[from] io::Error),
}

/// Key of one persisted source blob.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    /// Source directory recorded with the load.
    pub directory: String,
    /// Synthesized document key (`"<document id>ld"`).
    pub document: String,
    /// Script uri.
    pub uri: String,
}

impl SourceKey {
    /// Key for the source loaded as `document_id`.
    #[must_use]
    pub fn for_document(directory: &str, document_id: u64, uri: &str) -> Self {
        Self {
            directory: directory.to_owned(),
            document: format!("{document_id}ld"),
            uri: uri.to_owned(),
        }
    }

    fn not_found(&self) -> SourceStoreError {
        SourceStoreError::NotFound {
            document: self.document.clone(),
            uri: self.uri.clone(),
        }
    }
}

/// Persisted-stream abstraction for source text.
pub trait SourceStore {
    /// Persists `text` under `key`, replacing any previous text.
    ///
    /// # Errors
    /// Backend failures.
    fn write_source(&mut self, key: &SourceKey, text: &str) -> Result<(), SourceStoreError>;

    /// Reads the text persisted under `key`.
    ///
    /// # Errors
    /// [`SourceStoreError::NotFound`] or backend failures.
    fn read_source(&self, key: &SourceKey) -> Result<String, SourceStoreError>;
}

/// In-memory source store.
#[derive(Debug, Default, Clone)]
pub struct MemorySourceStore {
    sources: BTreeMap<SourceKey, String>,
}

impl MemorySourceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceStore for MemorySourceStore {
    fn write_source(&mut self, key: &SourceKey, text: &str) -> Result<(), SourceStoreError> {
        self.sources.insert(key.clone(), text.to_owned());
        Ok(())
    }

    fn read_source(&self, key: &SourceKey) -> Result<String, SourceStoreError> {
        self.sources.get(key).cloned().ok_or_else(|| key.not_found())
    }
}

/// Directory-backed source store, one file per key.
///
/// Files are named `<document>-<hash>.js` where `<hash>` is a BLAKE3 prefix of
/// the directory and uri, so recorded paths never escape `root`.
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    root: PathBuf,
}

impl FsSourceStore {
    /// Creates a store rooted at `root` (created on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &SourceKey) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.directory.as_bytes());
        hasher.update(&[0]);
        hasher.update(key.uri.as_bytes());
        let hash = hasher.finalize();
        let tag = hex::encode(&hash.as_bytes()[..8]);
        let document: String = key
            .document
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        self.root.join(format!("{document}-{tag}.js"))
    }
}

impl SourceStore for FsSourceStore {
    fn write_source(&mut self, key: &SourceKey, text: &str) -> Result<(), SourceStoreError> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.path_for(key), text)?;
        Ok(())
    }

    fn read_source(&self, key: &SourceKey) -> Result<String, SourceStoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(key.not_found()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn document_key_is_synthesized_from_id() {
        let key = SourceKey::for_document("src", 42, "app.js");
        assert_eq!(key.document, "42ld");
    }

    #[test]
    fn memory_store_reads_back_what_was_written() {
        let mut store = MemorySourceStore::new();
        let key = SourceKey::for_document("", 1, "a.js");
        store.write_source(&key, "let x = 1;").unwrap();
        assert_eq!(store.read_source(&key).unwrap(), "let x = 1;");
        let other = SourceKey::for_document("", 2, "a.js");
        assert!(matches!(
            store.read_source(&other),
            Err(SourceStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn fs_store_keeps_files_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsSourceStore::new(dir.path().join("sources"));
        let key = SourceKey::for_document("../../etc", 7, "../passwd");
        store.write_source(&key, "print(1)").unwrap();
        assert_eq!(store.read_source(&key).unwrap(), "print(1)");
        let entries: Vec<_> = fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let missing = SourceKey::for_document("", 8, "x.js");
        assert!(matches!(
            store.read_source(&missing),
            Err(SourceStoreError::NotFound { .. })
        ));
    }
}
