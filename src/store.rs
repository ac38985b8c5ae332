//! Object store collaborators.
//!
//! The planner never touches storage. A store answers three questions: how
//! long is an object, what bytes sit in a range of it, and how to commit a
//! plan as a new object. [`FileStore`] streams plans between files on disk;
//! [`MemoryStore`] keeps named objects in memory.

use crate::materialize::apply_plan;
use crate::patch::Patch;
use crate::plan::{checked_keep, Layout, Plan, PlanError, PlanOptions, PlanStep};
use crate::selector::{ConcreteRange, RangeError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot determine the length of {0}; refusing to patch an object of unknown length")]
    UnknownLength(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("path is outside store root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("source {object} ended early while copying {range}")]
    ShortRead { object: String, range: ConcreteRange },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Storage backend a plan is executed against.
pub trait ObjectStore {
    /// How objects are addressed
    type Object: ?Sized + fmt::Debug;

    /// Length of `object` in bytes.
    fn length(&self, object: &Self::Object) -> Result<usize, StoreError>;

    /// Bytes of `object` within `range`.
    fn read_range(&self, object: &Self::Object, range: ConcreteRange)
        -> Result<Vec<u8>, StoreError>;

    /// Write the concatenation of `plan` (reading `Keep` ranges from
    /// `source`) as `destination`. Returns the number of bytes written.
    fn commit(
        &self,
        source: &Self::Object,
        destination: &Self::Object,
        plan: &Plan,
    ) -> Result<usize, StoreError>;
}

/// Resolve, verify, and plan `patches` against an object held by `store`.
pub fn plan_object<S: ObjectStore>(
    store: &S,
    source: &S::Object,
    patches: &[Patch],
    options: PlanOptions,
) -> Result<Plan, StoreError> {
    let source_length = store.length(source)?;
    let layout = Layout::resolve(source_length, patches, options)?;
    layout.verify_with(|range| store.read_range(source, range))?;
    Ok(layout.plan())
}

/// Patch `source` into `destination`. They may name the same object.
#[instrument(level = "debug", skip(store, patches), fields(patches = patches.len()))]
pub fn patch_object<S: ObjectStore>(
    store: &S,
    source: &S::Object,
    destination: &S::Object,
    patches: &[Patch],
    options: PlanOptions,
) -> Result<usize, StoreError> {
    let plan = plan_object(store, source, patches, options)?;
    store.commit(source, destination, &plan)
}

/// Objects are files below a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// The root is canonicalized so symlinked roots compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| StoreError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `object`, which must stay inside the root.
    ///
    /// The file itself may not exist yet; its parent directory must.
    pub fn locate(&self, object: &Path) -> Result<PathBuf, StoreError> {
        let absolute = if object.is_absolute() {
            object.to_path_buf()
        } else {
            self.root.join(object)
        };

        let (parent, name) = match (absolute.parent(), absolute.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(StoreError::OutsideRoot {
                    path: absolute,
                    root: self.root.clone(),
                })
            }
        };
        let parent = parent.canonicalize().map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let located = parent.join(name);

        // A symlink at the final component could still point outside.
        let resolved = match located.canonicalize() {
            Ok(target) => target,
            Err(_) => located.clone(),
        };
        if !resolved.starts_with(&self.root) {
            return Err(StoreError::OutsideRoot {
                path: resolved,
                root: self.root.clone(),
            });
        }
        Ok(located)
    }

    fn open(&self, object: &Path) -> Result<(PathBuf, File), StoreError> {
        let path = self.locate(object)?;
        let file = File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok((path, file))
    }
}

impl ObjectStore for FileStore {
    type Object = Path;

    fn length(&self, object: &Path) -> Result<usize, StoreError> {
        let path = self.locate(object)?;
        let metadata = fs::metadata(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(StoreError::UnknownLength(path.display().to_string()));
        }
        usize::try_from(metadata.len())
            .map_err(|_| StoreError::UnknownLength(path.display().to_string()))
    }

    fn read_range(&self, object: &Path, range: ConcreteRange) -> Result<Vec<u8>, StoreError> {
        let range = ConcreteRange::new(range.start, range.end)?;
        let (path, mut file) = self.open(object)?;
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        file.seek(SeekFrom::Start(range.start as u64))
            .map_err(io_err)?;
        let mut buffer = Vec::with_capacity(range.len());
        file.take(range.len() as u64)
            .read_to_end(&mut buffer)
            .map_err(io_err)?;
        if buffer.len() != range.len() {
            return Err(StoreError::ShortRead {
                object: path.display().to_string(),
                range,
            });
        }
        Ok(buffer)
    }

    #[instrument(level = "debug", skip(self, plan), fields(steps = plan.len()))]
    fn commit(&self, source: &Path, destination: &Path, plan: &Plan) -> Result<usize, StoreError> {
        // Reject malformed steps before a temp file exists.
        let chunks = plan
            .iter()
            .enumerate()
            .map(|(index, step)| match step {
                PlanStep::Keep { start, end } => {
                    checked_keep(index, *start, *end).map(Chunk::Copy)
                }
                PlanStep::Insert { bytes } => Ok(Chunk::Literal(bytes.as_slice())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (source_path, mut input) = self.open(source)?;
        let destination = self.locate(destination)?;
        let read_err = |source: io::Error| StoreError::Io {
            path: source_path.clone(),
            source,
        };
        let write_err = |source: io::Error| StoreError::Io {
            path: destination.clone(),
            source,
        };

        let written = atomic_stream(&destination, |output| {
            let mut buffer = vec![0; COPY_BUFFER_SIZE];
            let mut written = 0;
            for chunk in chunks {
                match chunk {
                    Chunk::Copy(range) => {
                        input
                            .seek(SeekFrom::Start(range.start as u64))
                            .map_err(read_err)?;
                        let mut remaining = range.len();
                        while remaining > 0 {
                            let want = remaining.min(buffer.len());
                            let read = match input.read(&mut buffer[..want]) {
                                Ok(0) => {
                                    return Err(StoreError::ShortRead {
                                        object: source_path.display().to_string(),
                                        range,
                                    })
                                }
                                Ok(read) => read,
                                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                                Err(err) => return Err(read_err(err)),
                            };
                            output.write_all(&buffer[..read]).map_err(write_err)?;
                            remaining -= read;
                        }
                        written += range.len();
                    }
                    Chunk::Literal(bytes) => {
                        output.write_all(bytes).map_err(write_err)?;
                        written += bytes.len();
                    }
                }
            }
            Ok(written)
        })?;

        debug!(
            source = %source_path.display(),
            destination = %destination.display(),
            written,
            "committed plan"
        );
        Ok(written)
    }
}

/// A validated plan step, ready to stream.
enum Chunk<'a> {
    Copy(ConcreteRange),
    Literal(&'a [u8]),
}

/// Atomic streaming write: tempfile in the same directory, fsync, rename.
///
/// Either the full object lands at `path` or nothing changes. I/O failures
/// of the temp file are reported against `path`.
fn atomic_stream<T>(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<&mut File>) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let io_err = |source: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().ok_or_else(|| {
        io_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Path has no parent directory",
        ))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;

    let result = {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let result = write(&mut writer)?;
        writer.flush().map_err(io_err)?;
        result
    };

    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;

    Ok(result)
}

/// Named objects held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.borrow_mut().insert(name.into(), bytes.into());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.borrow().get(name).cloned()
    }
}

impl ObjectStore for MemoryStore {
    type Object = str;

    fn length(&self, object: &str) -> Result<usize, StoreError> {
        self.objects
            .borrow()
            .get(object)
            .map(Vec::len)
            .ok_or_else(|| StoreError::UnknownLength(object.to_string()))
    }

    fn read_range(&self, object: &str, range: ConcreteRange) -> Result<Vec<u8>, StoreError> {
        let range = ConcreteRange::new(range.start, range.end)?;
        let objects = self.objects.borrow();
        let bytes = objects
            .get(object)
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;
        bytes
            .get(range.as_range())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| StoreError::ShortRead {
                object: object.to_string(),
                range,
            })
    }

    fn commit(&self, source: &str, destination: &str, plan: &Plan) -> Result<usize, StoreError> {
        let output = {
            let objects = self.objects.borrow();
            let original = objects
                .get(source)
                .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
            apply_plan(original, plan)?
        };
        let written = output.len();
        self.insert(destination, output);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Verification;
    use crate::selector::Selector;

    #[test]
    fn test_memory_store_patch_object() {
        let store = MemoryStore::new();
        store.insert("in", "b");
        let patches = [Patch::prepend("a"), Patch::append(1, "c")];
        let written =
            patch_object(&store, "in", "out", &patches, PlanOptions::default()).unwrap();
        assert_eq!(written, 3);
        assert_eq!(store.get("out").unwrap(), b"abc");
        assert_eq!(store.get("in").unwrap(), b"b");
    }

    #[test]
    fn test_memory_store_unknown_length() {
        let store = MemoryStore::new();
        let result = patch_object(&store, "missing", "out", &[], PlanOptions::default());
        assert!(matches!(result, Err(StoreError::UnknownLength(_))));
    }

    #[test]
    fn test_file_store_patches_in_place() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("object.bin");
        fs::write(&file_path, b"original content").unwrap();

        let store = FileStore::new(temp_dir.path()).unwrap();
        let patches = [Patch::new(Selector::up_to(8), "modified")
            .with_verification(Verification::ExactMatch(b"original".to_vec()))];
        let object = Path::new("object.bin");
        let written =
            patch_object(&store, object, object, &patches, PlanOptions::default()).unwrap();

        assert_eq!(written, 16);
        assert_eq!(fs::read(&file_path).unwrap(), b"modified content");
    }

    #[test]
    fn test_file_store_verification_failure_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("object.bin");
        fs::write(&file_path, b"original content").unwrap();

        let store = FileStore::new(temp_dir.path()).unwrap();
        let patches = [Patch::new(Selector::up_to(8), "modified")
            .with_verification(Verification::ExactMatch(b"different".to_vec()))];
        let object = Path::new("object.bin");
        let result = patch_object(&store, object, object, &patches, PlanOptions::default());

        assert!(matches!(
            result,
            Err(StoreError::Plan(PlanError::VerificationFailed { .. }))
        ));
        assert_eq!(fs::read(&file_path).unwrap(), b"original content");
    }

    #[test]
    fn test_file_store_read_range() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a"), b"hello-world").unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        let bytes = store
            .read_range(Path::new("a"), ConcreteRange { start: 6, end: 11 })
            .unwrap();
        assert_eq!(bytes, b"world");
        assert!(matches!(
            store.read_range(Path::new("a"), ConcreteRange { start: 6, end: 20 }),
            Err(StoreError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_file_store_rejects_paths_outside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(temp_dir.path().join("outside.bin"), b"x").unwrap();

        let store = FileStore::new(&root).unwrap();
        let result = store.length(Path::new("../outside.bin"));
        assert!(matches!(result, Err(StoreError::OutsideRoot { .. })));
    }

    #[test]
    fn test_file_store_directory_has_unknown_length() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("dir")).unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        assert!(matches!(
            store.length(Path::new("dir")),
            Err(StoreError::UnknownLength(_))
        ));
    }

    #[test]
    fn test_file_store_commit_rejects_inverted_keep() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a"), b"hello-world").unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        let plan: Plan = serde_json::from_str(r#"[{"op":"keep","start":5,"end":2}]"#).unwrap();
        let result = store.commit(Path::new("a"), Path::new("b"), &plan);

        assert!(matches!(
            result,
            Err(StoreError::Plan(PlanError::InvalidKeep {
                step: 0,
                source: RangeError::Inverted { start: 5, end: 2 },
            }))
        ));
        assert!(!temp_dir.path().join("b").exists());
    }

    #[test]
    fn test_file_store_read_range_rejects_inverted_range() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a"), b"hello-world").unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        let result = store.read_range(Path::new("a"), ConcreteRange { start: 5, end: 2 });
        assert!(matches!(
            result,
            Err(StoreError::Range(RangeError::Inverted { .. }))
        ));
    }

    #[test]
    fn test_file_store_commit_short_source_is_short_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a"), b"hello").unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        let plan = Plan::from_steps(vec![PlanStep::Keep { start: 0, end: 100 }]);
        let result = store.commit(Path::new("a"), Path::new("b"), &plan);

        assert!(matches!(
            result,
            Err(StoreError::ShortRead {
                range: ConcreteRange { start: 0, end: 100 },
                ..
            })
        ));
        assert!(!temp_dir.path().join("b").exists());
    }

    #[test]
    fn test_file_store_commit_labels_destination_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a"), b"hello").unwrap();
        fs::create_dir_all(temp_dir.path().join("taken")).unwrap();
        fs::write(temp_dir.path().join("taken").join("entry"), b"x").unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        // Renaming a file over a non-empty directory fails.
        let plan = Plan::from_steps(vec![PlanStep::Keep { start: 0, end: 5 }]);
        let result = store.commit(Path::new("a"), Path::new("taken"), &plan);

        match result {
            Err(StoreError::Io { path, .. }) => assert!(path.ends_with("taken")),
            other => panic!("expected destination I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_memory_store_read_range_rejects_inverted_range() {
        let store = MemoryStore::new();
        store.insert("a", "hello");
        assert!(matches!(
            store.read_range("a", ConcreteRange { start: 4, end: 1 }),
            Err(StoreError::Range(RangeError::Inverted { start: 4, end: 1 }))
        ));
    }
}
