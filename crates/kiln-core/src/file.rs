//! A single vertex in the build graph

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{Attribute, FileId};

/// One logical build artifact and its transformation history.
///
/// Every path the file has had is kept in `history`, oldest first, so a file
/// that was renamed from `index.ts` to `index.js` can still be found by its
/// original name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    id: FileId,
    history: Vec<PathBuf>,
    base: PathBuf,
    contents: Option<Vec<u8>>,
    /// Guards against two concurrent discovery passes over the same file.
    #[serde(skip)]
    parsing: bool,
    #[serde(default)]
    parsed: bool,
    #[serde(default)]
    attributes: BTreeMap<String, Attribute>,
}

impl File {
    pub(crate) fn new(id: FileId, path: PathBuf, base: PathBuf) -> Self {
        File {
            id,
            history: vec![path],
            base,
            contents: None,
            parsing: false,
            parsed: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    /// The current path.
    pub fn path(&self) -> &Path {
        // history is never empty: `new` seeds it and nothing removes entries
        self.history.last().unwrap_or(&self.base)
    }

    pub fn initial_path(&self) -> &Path {
        self.history.first().unwrap_or(&self.base)
    }

    pub fn history(&self) -> &[PathBuf] {
        &self.history
    }

    /// Whether this file has, or ever had, the given absolute path.
    pub fn has_path(&self, path: &Path) -> bool {
        self.history.iter().any(|p| p == path)
    }

    /// Move the file to a new path. Relative paths resolve against the base.
    pub fn set_path(&mut self, path: impl AsRef<Path>) {
        let path = normalize(&self.base.join(path.as_ref()));
        if path != self.path() {
            self.history.push(path);
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub(crate) fn set_base(&mut self, base: PathBuf) {
        self.base = base;
    }

    /// The current path relative to the base, for logs.
    pub fn relative(&self) -> &Path {
        let path = self.path();
        path.strip_prefix(&self.base).unwrap_or(path)
    }

    /// Lower-cased extension of the current path, empty when there is none.
    pub fn file_type(&self) -> String {
        extension(self.path())
    }

    /// Lower-cased extension of the first path this file ever had.
    pub fn initial_type(&self) -> String {
        extension(self.initial_path())
    }

    /// Change the extension. The old path stays in the history.
    pub fn set_type(&mut self, file_type: &str) {
        let next = self.path().with_extension(file_type);
        if next != self.path() {
            self.history.push(next);
        }
    }

    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    pub fn set_contents(&mut self, contents: impl Into<Vec<u8>>) {
        self.contents = Some(contents.into());
    }

    pub fn take_contents(&mut self) -> Option<Vec<u8>> {
        self.contents.take()
    }

    /// Forget the contents so the next read starts from scratch.
    pub fn reset(&mut self) {
        self.contents = None;
    }

    pub fn is_parsing(&self) -> bool {
        self.parsing
    }

    pub fn set_parsing(&mut self, parsing: bool) {
        self.parsing = parsing;
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    pub fn set_parsed(&mut self, parsed: bool) {
        self.parsed = parsed;
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Attribute>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Attribute> {
        self.attributes.remove(key)
    }

    /// A copy of this file under a new id with a fresh single-entry history.
    pub(crate) fn copy_as(&self, id: FileId, path: PathBuf) -> File {
        File {
            id,
            history: vec![path],
            base: self.base.clone(),
            contents: self.contents.clone(),
            parsing: false,
            parsed: self.parsed,
            attributes: self.attributes.clone(),
        }
    }
}

/// Collapse `.` and `..` segments without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}
