//! Collects the bootstrap payload from a directory tree.
//!
//! Files are keyed by their path relative to the invocation root, joined with
//! forward slashes so the keys match the layout recreated on the instance
//! regardless of the host platform. The resulting [`FileTree`] is ordered by
//! path; filesystem enumeration order never leaks into the script.

use std::collections::BTreeMap;
use std::collections::btree_map;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while collecting the payload tree.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FileTreeError {
    /// Raised when the invocation root or source directory cannot be opened.
    #[error("source directory `{path}` cannot be opened: {message}")]
    MissingSource {
        /// Directory that failed to open.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when an entry inside the tree cannot be listed or read.
    #[error("failed to read `{path}`: {message}")]
    Unreadable {
        /// Relative path of the entry.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// One file of the bootstrap payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileRecord {
    /// Forward-slash separated path relative to the invocation root.
    pub relative_path: String,
    /// Raw file content.
    pub content: Vec<u8>,
}

impl FileRecord {
    /// Creates a record, normalising backslashes to forward slashes.
    #[must_use]
    pub fn new(relative_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into().replace('\\', "/"),
            content: content.into(),
        }
    }

    /// Parent directory of the record, or `None` for top-level files.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        parent_of(&self.relative_path)
    }
}

/// Parent directory of a forward-slash separated relative path, or `None`
/// for top-level entries.
#[must_use]
pub fn parent_of(relative_path: &str) -> Option<&str> {
    relative_path
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// Path-ordered collection of [`FileRecord`]s.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl FileTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record. A record already stored under the same path is
    /// replaced and returned; duplicates indicate a collection defect.
    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        let FileRecord {
            relative_path,
            content,
        } = record;
        let previous = self.files.insert(relative_path.clone(), content);
        previous.map(|content| {
            warn!(path = %relative_path, "duplicate path in payload tree, keeping last");
            FileRecord {
                relative_path,
                content,
            }
        })
    }

    /// Number of files in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Content stored at `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Iterates `(path, content)` pairs by path ascending.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.files.iter(),
        }
    }
}

impl FromIterator<FileRecord> for FileTree {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut tree = Self::new();
        for record in iter {
            tree.insert(record);
        }
        tree
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = (&'a str, &'a [u8]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ordered iterator over a [`FileTree`].
#[derive(Debug)]
pub struct Iter<'a> {
    inner: btree_map::Iter<'a, String, Vec<u8>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(path, content)| (path.as_str(), content.as_slice()))
    }
}

/// Walks a source directory beneath an invocation root.
#[derive(Clone, Debug)]
pub struct FileTreeCollector {
    root: Utf8PathBuf,
}

impl FileTreeCollector {
    /// Creates a collector anchored at `root`; keys are relative to it.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Collects every regular file beneath `root/source_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`FileTreeError::MissingSource`] when the root or source
    /// directory cannot be opened, and [`FileTreeError::Unreadable`] when an
    /// entry cannot be listed or read.
    pub fn collect(&self, source_dir: &Utf8Path) -> Result<FileTree, FileTreeError> {
        let root = Dir::open_ambient_dir(&self.root, ambient_authority()).map_err(|err| {
            FileTreeError::MissingSource {
                path: self.root.clone(),
                message: err.to_string(),
            }
        })?;
        let source = root
            .open_dir(source_dir)
            .map_err(|err| FileTreeError::MissingSource {
                path: self.root.join(source_dir),
                message: err.to_string(),
            })?;

        let prefix = source_dir
            .components()
            .map(|component| component.as_str())
            .filter(|part| *part != ".")
            .collect::<Vec<_>>()
            .join("/");
        let mut tree = FileTree::new();
        walk(&source, &prefix, &mut tree)?;
        debug!(root = %self.root, source = %source_dir, files = tree.len(), "collected payload tree");
        Ok(tree)
    }
}

/// Collects `root/source_dir` with a fresh [`FileTreeCollector`].
///
/// # Errors
///
/// See [`FileTreeCollector::collect`].
pub fn collect_file_tree(root: &Utf8Path, source_dir: &Utf8Path) -> Result<FileTree, FileTreeError> {
    FileTreeCollector::new(root).collect(source_dir)
}

fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

fn walk(dir: &Dir, prefix: &str, tree: &mut FileTree) -> Result<(), FileTreeError> {
    let unreadable = |path: &str, err: &std::io::Error| FileTreeError::Unreadable {
        path: path.to_owned(),
        message: err.to_string(),
    };

    let entries = dir.entries().map_err(|err| unreadable(prefix, &err))?;
    for entry in entries {
        let entry = entry.map_err(|err| unreadable(prefix, &err))?;
        let name = entry.file_name().map_err(|err| unreadable(prefix, &err))?;
        let relative = join_relative(prefix, &name);
        let file_type = entry.file_type().map_err(|err| unreadable(&relative, &err))?;

        if file_type.is_dir() {
            let child = entry.open_dir().map_err(|err| unreadable(&relative, &err))?;
            walk(&child, &relative, tree)?;
        } else if file_type.is_file() {
            let content = dir.read(&name).map_err(|err| unreadable(&relative, &err))?;
            tree.insert(FileRecord::new(relative, content));
        } else if file_type.is_symlink() {
            // Links are followed to regular files only; the sandbox refuses
            // targets outside the root and directory links are not walked.
            let target = dir.metadata(&name).map_err(|err| unreadable(&relative, &err))?;
            if target.is_file() {
                let content = dir.read(&name).map_err(|err| unreadable(&relative, &err))?;
                tree.insert(FileRecord::new(relative, content));
            } else {
                warn!(path = %relative, "skipping symlink that does not resolve to a regular file");
            }
        } else {
            debug!(path = %relative, "skipping non-regular entry");
        }
    }
    Ok(())
}
