//! Durable ledger of user structural overrides ("cut" and "copy")
//!
//! A cut asserts that the reference-derived link between a child and a parent
//! must not be (re)established. A copy asserts that a child must be attached
//! under a given parent regardless of references.
//!
//! The ledger is a JSON-lines file, one assertion per line, in the order the
//! assertions were made. It is read fully before a threading pass and written
//! back afterwards; there is never more than one cut and one copy per child id
//! (a later assertion for the same child replaces the earlier one).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing the override ledger
#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("override ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed override record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize override record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Cut,
    Copy,
}

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub kind: OverrideKind,
    pub child: String,
    pub parent: String,
}

/// Read-only copy of the ledger taken at the start of a threading pass.
#[derive(Debug, Clone, Default)]
pub struct OverrideRules {
    cuts: HashMap<String, String>,
    copies: HashMap<String, String>,
}

impl OverrideRules {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get_cut(&self, child_id: &str) -> Option<&str> {
        self.cuts.get(child_id).map(String::as_str)
    }

    pub fn get_copy(&self, child_id: &str) -> Option<&str> {
        self.copies.get(child_id).map(String::as_str)
    }

    pub fn is_cut(&self, child_id: &str, parent_id: &str) -> bool {
        self.get_cut(child_id) == Some(parent_id)
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty() && self.copies.is_empty()
    }
}

/// In-memory view of the override ledger, optionally backed by a file.
#[derive(Debug, Default)]
pub struct OverrideStore {
    path: Option<PathBuf>,
    records: Vec<OverrideRecord>,
    cuts: HashMap<String, String>,
    copies: HashMap<String, String>,
    dirty: bool,
}

impl OverrideStore {
    /// A ledger that lives only for the current session.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A ledger backed by `path`. Nothing is read until [`read_all`](Self::read_all).
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        OverrideStore {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Open a file-backed ledger and load it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, OverrideError> {
        let mut store = Self::at_path(path);
        store.read_all()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn add_cut(&mut self, child_id: &str, parent_id: &str) {
        self.insert(OverrideRecord {
            kind: OverrideKind::Cut,
            child: child_id.to_string(),
            parent: parent_id.to_string(),
        });
    }

    pub fn add_copy(&mut self, child_id: &str, parent_id: &str) {
        self.insert(OverrideRecord {
            kind: OverrideKind::Copy,
            child: child_id.to_string(),
            parent: parent_id.to_string(),
        });
    }

    /// Parent the child was cut from, if any.
    pub fn get_cut(&self, child_id: &str) -> Option<&str> {
        self.cuts.get(child_id).map(String::as_str)
    }

    /// Parent the child was pasted under, if any.
    pub fn get_copy(&self, child_id: &str) -> Option<&str> {
        self.copies.get(child_id).map(String::as_str)
    }

    /// Whether a cut record exactly matches `(child_id, parent_id)`.
    pub fn is_cut(&self, child_id: &str, parent_id: &str) -> bool {
        self.get_cut(child_id) == Some(parent_id)
    }

    /// Snapshot of the current cuts and copies for one threading pass.
    pub fn rules(&self) -> OverrideRules {
        OverrideRules {
            cuts: self.cuts.clone(),
            copies: self.copies.clone(),
        }
    }

    pub fn records(&self) -> &[OverrideRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: OverrideRecord) {
        // A cut and a copy of the same pair contradict each other; the later one wins
        let opposite = match record.kind {
            OverrideKind::Cut => OverrideKind::Copy,
            OverrideKind::Copy => OverrideKind::Cut,
        };
        self.records.retain(|existing| {
            existing.child != record.child
                || (existing.kind == opposite && existing.parent != record.parent)
        });
        let opposite_table = match opposite {
            OverrideKind::Cut => &mut self.cuts,
            OverrideKind::Copy => &mut self.copies,
        };
        if opposite_table.get(&record.child) == Some(&record.parent) {
            opposite_table.remove(&record.child);
        }
        self.index(&record);
        self.records.push(record);
        self.dirty = true;
    }

    fn index(&mut self, record: &OverrideRecord) {
        let table = match record.kind {
            OverrideKind::Cut => &mut self.cuts,
            OverrideKind::Copy => &mut self.copies,
        };
        table.insert(record.child.clone(), record.parent.clone());
    }

    /// Replace the in-memory state with the contents of the backing file.
    ///
    /// A missing file is an empty ledger. Blank lines are skipped.
    pub fn read_all(&mut self) -> Result<(), OverrideError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        self.records.clear();
        self.cuts.clear();
        self.copies.clear();
        self.dirty = false;

        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(OverrideError::Io { path, source }),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| OverrideError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: OverrideRecord =
                serde_json::from_str(&line).map_err(|source| OverrideError::Malformed {
                    line: line_no + 1,
                    source,
                })?;
            self.insert(record);
        }

        self.dirty = false;
        log::debug!(
            "loaded {} override records from {}",
            self.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Rewrite the backing file with the current records.
    ///
    /// The new ledger is written to a temporary file in the same directory and
    /// renamed over the old one.
    pub fn write_all(&mut self) -> Result<(), OverrideError> {
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };
        let io_err = |source: std::io::Error| OverrideError::Io {
            path: path.clone(),
            source,
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut buffer = Vec::new();
        for record in &self.records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        staged.write_all(&buffer).map_err(io_err)?;
        staged.flush().map_err(io_err)?;
        staged
            .persist(&path)
            .map_err(|err| io_err(err.error))?;

        self.dirty = false;
        log::debug!(
            "wrote {} override records to {}",
            self.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Flush pending changes, if any.
    pub fn close(&mut self) -> Result<(), OverrideError> {
        if self.dirty {
            self.write_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_assertion_replaces_earlier() {
        let mut store = OverrideStore::in_memory();
        store.add_cut("c", "p1");
        store.add_cut("c", "p2");
        store.add_copy("c", "p3");

        assert_eq!(store.get_cut("c"), Some("p2"));
        assert_eq!(store.get_copy("c"), Some("p3"));
        assert!(store.is_cut("c", "p2"));
        assert!(!store.is_cut("c", "p1"));
        assert_eq!(store.len(), 2);

        let rules = store.rules();
        store.add_cut("c", "p4");
        assert!(rules.is_cut("c", "p2"));
        assert_eq!(rules.get_copy("c"), Some("p3"));
    }

    #[test]
    fn test_cut_and_copy_of_same_pair_cancel() {
        let mut store = OverrideStore::in_memory();
        store.add_copy("z", "a");
        store.add_cut("z", "a");

        assert!(store.is_cut("z", "a"));
        assert_eq!(store.get_copy("z"), None);
        assert_eq!(store.len(), 1);

        store.add_copy("z", "a");
        assert_eq!(store.get_cut("z"), None);
        assert_eq!(store.get_copy("z"), Some("a"));
        assert_eq!(store.len(), 1);

        // Different parents do not contradict
        store.add_cut("z", "b");
        assert_eq!(store.get_copy("z"), Some("a"));
        assert!(store.is_cut("z", "b"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reload_keeps_later_of_contradicting_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"kind":"copy","child":"z","parent":"a"}"#,
                "\n",
                r#"{"kind":"cut","child":"z","parent":"a"}"#,
                "\n"
            ),
        )
        .unwrap();

        let store = OverrideStore::open(&path).unwrap();
        assert!(store.is_cut("z", "a"));
        assert_eq!(store.get_copy("z"), None);
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverrideStore::open(dir.path().join("none.jsonl")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_write_then_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("overrides.jsonl");

        let mut store = OverrideStore::at_path(&path);
        store.add_cut("b@x", "a@x");
        store.add_copy("c@x", "a@x");
        store.add_cut("d@x", "c@x");
        store.close().unwrap();

        let reopened = OverrideStore::open(&path).unwrap();
        let kinds: Vec<_> = reopened.records().iter().map(|r| (r.kind, r.child.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (OverrideKind::Cut, "b@x"),
                (OverrideKind::Copy, "c@x"),
                (OverrideKind::Cut, "d@x")
            ]
        );
        assert_eq!(reopened.get_copy("c@x"), Some("a@x"));
    }

    #[test]
    fn test_duplicate_lines_on_disk_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"kind\":\"cut\",\"child\":\"c\",\"parent\":\"p1\"}\n",
                "\n",
                "{\"kind\":\"cut\",\"child\":\"c\",\"parent\":\"p2\"}\n",
            ),
        )
        .unwrap();

        let store = OverrideStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_cut("c"), Some("p2"));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.jsonl");
        std::fs::write(&path, "{\"kind\":\"cut\",\"child\":\"c\",\"parent\":\"p\"}\nnot json\n").unwrap();

        let err = OverrideStore::open(&path).unwrap_err();
        assert!(matches!(err, OverrideError::Malformed { line: 2, .. }));
    }
}
