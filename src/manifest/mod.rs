//! # Manifest
//!
//! The in-memory record tree of an archive. A manifest is built by inserting
//! files one at a time: every insertion becomes a chain of directories ending
//! in a single file record, and that chain is merged into the existing root.
//!
//! Relative insertion paths are resolved against the manifest's base
//! directory. The path of a file inside the archive is its path below the
//! base directory, minus an optional archive base, under the insertion prefix.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CarError, Result};
use crate::fsx;
use crate::record::wire::MAX_DEPTH;
use crate::record::{Compression, DirectoryRecord, FileKind, FileRecord, Record};

/// An ordered tree of records rooted at a single record.
#[derive(Debug, Clone)]
pub struct Manifest {
    base_dir: PathBuf,
    archive_base: Vec<String>,
    root: Option<Record>,
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for Manifest {}

/// Splits an archive path into its non-empty segments.
fn split_segments(name: &str) -> Vec<&str> {
    name.split('/').filter(|part| !part.is_empty()).collect()
}

/// Lexically normalizes a relative path into name segments.
fn normalize(path: &Path) -> Result<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| CarError::Encoding(part.to_string_lossy().into_owned()))?;
                segments.push(part.to_string());
            }
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(CarError::Validation(format!(
                        "'{}' escapes the base directory",
                        path.display()
                    )));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(segments)
}

/// Builds the nested directories for `dirs` around a single file leaf.
fn build_chain(dirs: &[String], leaf: FileRecord) -> Result<Record> {
    if dirs.len() > MAX_DEPTH {
        return Err(CarError::Validation(format!(
            "'{}' is nested deeper than {MAX_DEPTH} directories",
            dirs.join("/")
        )));
    }
    let mut record = Record::File(leaf);
    for name in dirs.iter().rev() {
        let mut dir = DirectoryRecord::new(name.as_str())?;
        dir.add_child(record)?;
        record = Record::Directory(dir);
    }
    Ok(record)
}

fn is_file(record: &Record) -> bool {
    !record.is_dir()
}

fn any_record(_: &Record) -> bool {
    true
}

impl Manifest {
    /// Creates an empty manifest. Relative insertion paths are resolved
    /// against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), archive_base: Vec::new(), root: None }
    }

    pub fn with_root(base_dir: impl Into<PathBuf>, root: Record) -> Self {
        Self { base_dir: base_dir.into(), archive_base: Vec::new(), root: Some(root) }
    }

    /// Strips `base` (relative to the base directory) from archive paths, so
    /// `src/app.prg` with an archive base of `src` is stored as `app.prg`.
    /// Files outside `base` can no longer be inserted.
    /// An absolute `base` must lie under the base directory.
    pub fn with_archive_base(mut self, base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let relative = if base.is_absolute() {
            base.strip_prefix(&self.base_dir).map_err(|_| CarError::StripPrefix {
                prefix: self.base_dir.clone(),
                path: base.to_path_buf(),
            })?
        } else {
            base
        };
        self.archive_base = normalize(relative)?;
        Ok(self)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn root(&self) -> Option<&Record> {
        self.root.as_ref()
    }

    pub fn into_root(self) -> Option<Record> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Turns an insertion path into its content location and its segments below the base directory.
    fn resolve(&self, path: &Path) -> Result<(PathBuf, Vec<String>)> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.base_dir).map_err(|_| CarError::StripPrefix {
                prefix: self.base_dir.clone(),
                path: path.to_path_buf(),
            })?
        } else {
            path
        };
        let segments = normalize(relative)?;
        let source = segments.iter().fold(self.base_dir.clone(), |acc, s| acc.join(s));
        Ok((source, segments))
    }

    /// Adds the file at `path` to the archive under `prefix`.
    ///
    /// The archive path of the file is the segments of `prefix` followed by
    /// the segments of `path` relative to the base directory. Inserting the
    /// same file twice is a no-op.
    pub fn insert(&mut self, path: impl AsRef<Path>, prefix: &str, compression: Compression) -> Result<()> {
        let (source, segments) = self.resolve(path.as_ref())?;
        self.insert_resolved(source, &segments, prefix, compression)
    }

    /// Like [`Manifest::insert`], but a directory `path` is walked and every
    /// regular file below it is inserted, in file name order.
    pub fn insert_tree(&mut self, path: impl AsRef<Path>, prefix: &str, compression: Compression) -> Result<()> {
        let (source, segments) = self.resolve(path.as_ref())?;
        if !fsx::metadata(&source)?.is_dir() {
            return self.insert_resolved(source, &segments, prefix, compression);
        }

        let mut inserted = 0usize;
        for entry in WalkDir::new(&source).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
                CarError::io(io::Error::from(e), path)
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                warn!(path = %entry.path().display(), "skipping entry that is not a regular file");
                continue;
            }
            let below = entry.path().strip_prefix(&source).map_err(|_| CarError::StripPrefix {
                prefix: source.clone(),
                path: entry.path().to_path_buf(),
            })?;
            let mut file_segments = segments.clone();
            file_segments.extend(normalize(below)?);
            self.insert_resolved(entry.path().to_path_buf(), &file_segments, prefix, compression)?;
            inserted += 1;
        }
        debug!(path = %source.display(), inserted, "inserted directory tree");
        Ok(())
    }

    fn insert_resolved(&mut self, source: PathBuf, segments: &[String], prefix: &str, compression: Compression) -> Result<()> {
        fsx::regular_file_len(&source)?;

        let relative = segments
            .strip_prefix(self.archive_base.as_slice())
            .ok_or_else(|| CarError::StripPrefix {
                prefix: self.archive_base.iter().collect(),
                path: source.clone(),
            })?;
        let mut chain = normalize(Path::new(prefix))?;
        chain.extend(relative.iter().cloned());
        let Some((leaf_name, dirs)) = chain.split_last() else {
            return Err(CarError::Validation(format!(
                "'{}' has no archive path",
                source.display()
            )));
        };

        let leaf = FileRecord::new(FileKind::from_path(Path::new(leaf_name)), leaf_name.as_str(), &source, compression)?;
        let record = build_chain(dirs, leaf)?;
        debug!(archive_path = %chain.join("/"), source = %source.display(), %compression, "inserting file");
        self.merge_record(record)
    }

    /// Merges a prepared record chain (or subtree) into the root.
    pub fn merge_record(&mut self, record: Record) -> Result<()> {
        let Some(root) = self.root.as_mut() else {
            self.root = Some(record);
            return Ok(());
        };
        match (root, record) {
            (Record::Directory(root), Record::Directory(other)) => root.merge(other),
            (Record::File(root), Record::File(other)) => {
                if *root == other {
                    Ok(())
                } else {
                    Err(CarError::MergeConflict {
                        path: root.name().to_string(),
                        reason: format!("the root already holds '{}'", root.source().display()),
                    })
                }
            }
            (root, record) => {
                debug!(root = root.name(), record = record.name(), "root type mismatch");
                Err(CarError::TypeMismatch(record.name().to_string()))
            }
        }
    }

    /// Finds a record by its archive path. The first segment names the root.
    pub fn lookup(&self, name: &str) -> Result<&Record> {
        let parts = split_segments(name);
        let not_found = || CarError::NotFound(name.to_string());
        let root = self.root.as_ref().ok_or_else(not_found)?;
        let (first, rest) = parts.split_first().ok_or_else(not_found)?;
        if *first != root.name() {
            return Err(CarError::RootMismatch {
                requested: name.to_string(),
                root: root.name().to_string(),
            });
        }
        rest.iter().try_fold(root, |current, part| {
            current
                .as_directory()
                .and_then(|dir| dir.child(part))
                .ok_or_else(not_found)
        })
    }

    /// Depth-first, pre-order traversal yielding the records accepted by `predicate`.
    pub fn iterate<P>(&self, predicate: P) -> Records<'_, P>
    where
        P: FnMut(&Record) -> bool,
    {
        Records { stack: self.root.iter().collect(), predicate }
    }

    /// Every record, directories included.
    pub fn records(&self) -> Records<'_, fn(&Record) -> bool> {
        self.iterate(any_record as fn(&Record) -> bool)
    }

    /// Every file leaf.
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> + '_ {
        self.iterate(is_file as fn(&Record) -> bool).filter_map(Record::as_file)
    }

    /// Finds the file leaf whose content is `source`. Relative paths are
    /// taken relative to the base directory.
    pub fn find_by_source(&self, source: impl AsRef<Path>) -> Option<&FileRecord> {
        let wanted = self.source_candidates(source.as_ref());
        self.files().find(|f| wanted.iter().any(|w| w == f.source()))
    }

    /// Changes the compression of the file leaf whose content is `source`.
    pub fn set_compression(&mut self, source: impl AsRef<Path>, compression: Compression) -> Result<()> {
        let source = source.as_ref();
        let wanted = self.source_candidates(source);
        let file = self
            .root
            .as_mut()
            .and_then(|root| find_file_mut(root, &wanted))
            .ok_or_else(|| CarError::NotFound(source.display().to_string()))?;
        debug!(name = file.name(), from = %file.compression(), to = %compression, "changing compression");
        file.set_compression(compression);
        Ok(())
    }

    fn source_candidates(&self, source: &Path) -> Vec<PathBuf> {
        let mut wanted = vec![source.to_path_buf()];
        if let Ok((resolved, _)) = self.resolve(source) {
            if resolved != source {
                wanted.push(resolved);
            }
        }
        wanted
    }

    /// JSON description of the manifest: the ordered `contents` tree mapping
    /// names to content paths, and per-file `attributes`.
    pub fn to_json(&self) -> Value {
        let mut attributes = Map::new();
        for file in self.files() {
            attributes.insert(
                file.source().display().to_string(),
                json!({ "compression": file.compression().as_str() }),
            );
        }
        let contents = self.root.as_ref().map(record_json).unwrap_or_else(|| json!({}));
        json!({ "contents": contents, "attributes": attributes })
    }
}

fn record_json(record: &Record) -> Value {
    let value = match record {
        Record::File(file) => Value::String(file.source().display().to_string()),
        Record::Directory(dir) => {
            let mut children = Map::new();
            for child in dir.children() {
                if let Value::Object(entry) = record_json(child) {
                    children.extend(entry);
                }
            }
            Value::Object(children)
        }
    };
    let mut entry = Map::new();
    entry.insert(record.name().to_string(), value);
    Value::Object(entry)
}

fn find_file_mut<'a>(record: &'a mut Record, wanted: &[PathBuf]) -> Option<&'a mut FileRecord> {
    match record {
        Record::File(file) => {
            if wanted.iter().any(|w| w == file.source()) {
                Some(file)
            } else {
                None
            }
        }
        Record::Directory(dir) => dir.children_mut().iter_mut().find_map(|child| find_file_mut(child, wanted)),
    }
}

/// Iterator returned by [`Manifest::iterate`]. Calling `iterate` again restarts the walk.
pub struct Records<'a, P> {
    stack: Vec<&'a Record>,
    predicate: P,
}

impl<'a, P> Iterator for Records<'a, P>
where
    P: FnMut(&Record) -> bool,
{
    type Item = &'a Record;

    fn next(&mut self) -> Option<&'a Record> {
        while let Some(record) = self.stack.pop() {
            if let Record::Directory(dir) = record {
                self.stack.extend(dir.children().iter().rev());
            }
            if (self.predicate)(record) {
                return Some(record);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn workspace(files: &[(&str, &[u8])]) -> TempDir {
        let dir = tempdir().unwrap();
        for (path, data) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, data).unwrap();
        }
        dir
    }

    fn names(records: Records<'_, impl FnMut(&Record) -> bool>) -> Vec<String> {
        records.map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn test_insert_under_prefix() {
        let ws = workspace(&[("src/app.prg", b"\x01\x08"), ("src/readme.seq", b"hi")]);
        let mut m = Manifest::new(ws.path());
        m.insert("src/app.prg", "/myapp", Compression::None).unwrap();
        m.insert("src/readme.seq", "/myapp", Compression::None).unwrap();

        let root = m.root().and_then(Record::as_directory).unwrap();
        assert_eq!(root.name(), "myapp");
        let src = root.child("src").and_then(Record::as_directory).unwrap();
        let kinds: Vec<_> = src.children().iter().map(|r| (r.name(), r.kind())).collect();
        assert_eq!(
            kinds,
            [("app.prg", crate::record::RecordKind::Prg), ("readme.seq", crate::record::RecordKind::Seq)]
        );
        assert_eq!(m.lookup("myapp/src/app.prg").unwrap().as_file().unwrap().source(), ws.path().join("src/app.prg"));
    }

    #[test]
    fn test_archive_base_is_stripped() {
        let ws = workspace(&[("src/app.prg", b"code"), ("other/x.prg", b"x")]);
        let mut m = Manifest::new(ws.path()).with_archive_base("src").unwrap();
        m.insert("src/app.prg", "myapp", Compression::None).unwrap();
        assert!(m.lookup("myapp/app.prg").is_ok());
        assert!(matches!(m.insert("other/x.prg", "myapp", Compression::None), Err(CarError::StripPrefix { .. })));
        assert!(matches!(Manifest::new(ws.path()).with_archive_base(".."), Err(CarError::Validation(_))));
    }

    #[test]
    fn test_single_file_becomes_root() {
        let ws = workspace(&[("a.prg", b"a"), ("b.prg", b"b")]);
        let mut m = Manifest::new(ws.path());
        m.insert("a.prg", "", Compression::None).unwrap();
        assert_eq!(m.root().unwrap().name(), "a.prg");

        m.insert("a.prg", "", Compression::None).unwrap();
        assert!(matches!(m.insert("b.prg", "", Compression::None), Err(CarError::MergeConflict { .. })));
        assert!(matches!(m.insert("b.prg", "dir", Compression::None), Err(CarError::TypeMismatch(_))));
    }

    #[test]
    fn test_root_directory_type_mismatch() {
        let ws = workspace(&[("a.prg", b"a")]);
        let mut m = Manifest::new(ws.path());
        m.insert("a.prg", "dir", Compression::None).unwrap();
        assert!(matches!(m.insert("a.prg", "", Compression::None), Err(CarError::TypeMismatch(_))));
        assert!(matches!(m.insert("a.prg", "other", Compression::None), Err(CarError::MergeConflict { .. })));
    }

    #[test]
    fn test_idempotent_reinsertion() {
        let ws = workspace(&[("src/app.prg", b"code")]);
        let mut once = Manifest::new(ws.path());
        once.insert("src/app.prg", "myapp", Compression::None).unwrap();
        let mut twice = once.clone();
        twice.insert("./src/../src/app.prg", "/myapp/", Compression::None).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.records().count(), 3);
    }

    #[test]
    fn test_conflicting_insertions() {
        let ws = workspace(&[("one/app.prg", b"1"), ("app.prg", b"2")]);
        let mut m = Manifest::new(ws.path());
        m.insert("one/app.prg", "", Compression::None).unwrap();
        let before = m.clone();

        // a different file that lands on one/app.prg inside the archive
        let err = m.insert("app.prg", "one", Compression::None).unwrap_err();
        assert!(matches!(err, CarError::MergeConflict { .. }));

        let err = m.insert("one/app.prg", "", Compression::Rle).unwrap_err();
        assert!(matches!(err, CarError::MergeConflict { .. }));
        assert_eq!(m, before);
    }

    #[test]
    fn test_invalid_insertions() {
        let ws = workspace(&[("a-very-long-file-name.prg", b"x"), ("ok.prg", b"y")]);
        let mut m = Manifest::new(ws.path());
        assert!(matches!(
            m.insert("a-very-long-file-name.prg", "", Compression::None),
            Err(CarError::Validation(_))
        ));
        assert!(matches!(m.insert("../ok.prg", "", Compression::None), Err(CarError::Validation(_))));
        assert!(matches!(m.insert("/elsewhere/ok.prg", "", Compression::None), Err(CarError::StripPrefix { .. })));
        assert!(matches!(m.insert("missing.prg", "", Compression::None), Err(CarError::Io { .. })));
        assert!(matches!(m.insert(".", "", Compression::None), Err(CarError::Unsupported(_))));
        assert!(m.is_empty());
    }

    #[test]
    fn test_lookup_errors() {
        let ws = workspace(&[("src/app.prg", b"code")]);
        let mut m = Manifest::new(ws.path());
        assert!(matches!(m.lookup("myapp"), Err(CarError::NotFound(_))));
        m.insert("src/app.prg", "myapp", Compression::None).unwrap();

        assert!(m.lookup("/myapp/").unwrap().is_dir());
        assert!(matches!(m.lookup("other/src"), Err(CarError::RootMismatch { .. })));
        assert!(matches!(m.lookup("myapp/src/nope.prg"), Err(CarError::NotFound(_))));
        assert!(matches!(m.lookup("myapp/src/app.prg/deeper"), Err(CarError::NotFound(_))));
        assert!(matches!(m.lookup(""), Err(CarError::NotFound(_))));
    }

    #[test]
    fn test_iteration_is_preorder_and_restartable() {
        let ws = workspace(&[("a/x.prg", b"1"), ("b.seq", b"2"), ("a/c/y.prg", b"3")]);
        let mut m = Manifest::new(ws.path());
        m.insert("a/x.prg", "root", Compression::None).unwrap();
        m.insert("b.seq", "root", Compression::None).unwrap();
        m.insert("a/c/y.prg", "root", Compression::None).unwrap();

        assert_eq!(names(m.records()), ["root", "a", "x.prg", "c", "y.prg", "b.seq"]);
        assert_eq!(names(m.records()), ["root", "a", "x.prg", "c", "y.prg", "b.seq"]);
        let files: Vec<_> = m.files().map(FileRecord::name).collect();
        assert_eq!(files, ["x.prg", "y.prg", "b.seq"]);
        assert_eq!(names(m.iterate(|r| r.is_dir())), ["root", "a", "c"]);
        assert_eq!(Manifest::new(ws.path()).records().count(), 0);
    }

    #[test]
    fn test_set_compression_by_source() {
        let ws = workspace(&[("app.prg", b"code"), ("lib.prg", b"lib")]);
        let mut m = Manifest::new(ws.path());
        m.insert("app.prg", "myapp", Compression::None).unwrap();
        m.insert("lib.prg", "myapp", Compression::None).unwrap();

        m.set_compression("app.prg", Compression::Rle).unwrap();
        m.set_compression(ws.path().join("lib.prg"), Compression::Lz).unwrap();
        assert_eq!(m.find_by_source("app.prg").unwrap().compression(), Compression::Rle);
        assert_eq!(m.lookup("myapp/lib.prg").unwrap().compression(), Compression::Lz);

        let err = m.set_compression("missing.prg", Compression::None).unwrap_err();
        assert!(matches!(err, CarError::NotFound(_)));
    }

    #[test]
    fn test_insert_tree_walks_directories() {
        let ws = workspace(&[("app/z.prg", b"z"), ("app/a.seq", b"a"), ("app/sub/m.prg", b"m")]);
        fs::create_dir_all(ws.path().join("app/empty")).unwrap();
        let mut m = Manifest::new(ws.path());
        m.insert_tree("app", "", Compression::None).unwrap();
        assert_eq!(names(m.records()), ["app", "a.seq", "sub", "m.prg", "z.prg"]);

        // a plain file goes through the same path as insert
        m.insert_tree("app/z.prg", "", Compression::None).unwrap();
        assert_eq!(m.files().count(), 3);
    }

    #[test]
    fn test_absolute_archive_base() {
        let ws = workspace(&[("src/app.prg", b"code")]);
        let mut m = Manifest::new(ws.path()).with_archive_base(ws.path().join("src")).unwrap();
        m.insert("src/app.prg", "myapp", Compression::None).unwrap();
        assert!(m.lookup("myapp/app.prg").is_ok());

        let outside = tempdir().unwrap();
        let err = Manifest::new(ws.path()).with_archive_base(outside.path()).unwrap_err();
        assert!(matches!(err, CarError::StripPrefix { .. }));
    }

    #[test]
    fn test_nesting_limit_on_insert() {
        let ws = workspace(&[("a.prg", b"a")]);
        let prefix = |depth: usize| (0..depth).map(|i| format!("d{i}")).collect::<Vec<_>>().join("/");

        let mut m = Manifest::new(ws.path());
        m.insert("a.prg", &prefix(MAX_DEPTH), Compression::None).unwrap();
        assert_eq!(m.records().filter(|r| r.is_dir()).count(), MAX_DEPTH);

        let mut m = Manifest::new(ws.path());
        let err = m.insert("a.prg", &prefix(MAX_DEPTH + 1), Compression::None).unwrap_err();
        assert!(matches!(err, CarError::Validation(_)), "{err}");
        assert!(m.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_insert_tree_skips_symlinks() {
        let ws = workspace(&[("app/a.prg", b"a")]);
        std::os::unix::fs::symlink(ws.path().join("app/a.prg"), ws.path().join("app/link.prg")).unwrap();

        let mut m = Manifest::new(ws.path());
        m.insert_tree("app", "", Compression::None).unwrap();
        assert_eq!(names(m.records()), ["app", "a.prg"]);

        let err = m.insert("app/link.prg", "", Compression::None).unwrap_err();
        assert!(matches!(err, CarError::Unsupported(_)), "{err}");
    }

    #[test]
    fn test_manifest_json() {
        let ws = workspace(&[("src/app.prg", b"code")]);
        let mut m = Manifest::new(ws.path());
        m.insert("src/app.prg", "myapp", Compression::None).unwrap();
        let source = ws.path().join("src/app.prg").display().to_string();

        let value = m.to_json();
        assert_eq!(value["contents"]["myapp"]["src"]["app.prg"], Value::String(source.clone()));
        assert_eq!(value["attributes"][source.as_str()]["compression"], "none");
    }
}
