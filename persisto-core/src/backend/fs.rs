use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::utils::escape_path_segment;
use crate::{CacheEntry, EntryMetadata};

use super::{BackendError, CacheBackend};

/// Extension of value files.
pub const VALUE_EXTENSION: &str = "out";
/// Extension of metadata files.
pub const METADATA_EXTENSION: &str = "meta";

const TEMP_PREFIX: &str = ".tmp";

/// Filesystem store: `<root>/<function>/<id>.out` plus `<id>.meta`.
///
/// Values are written exactly as the serializer produced them and metadata as
/// pretty-printed JSON, so both can be audited with ordinary tools.
///
/// Writes go to a temporary file inside the function directory which is then
/// renamed over the target. The rename is atomic on the same filesystem, so a
/// concurrent reader sees either no file or the complete file. Metadata is
/// renamed into place before the value, which means a visible value always
/// has its metadata.
#[derive(Debug, Clone)]
pub struct FsBackend {
    dir: PathBuf,
}

impl FsBackend {
    /// Opens (and creates) the directory for `function` below `root`.
    pub fn new(root: impl AsRef<Path>, function: &str) -> Result<Self, BackendError> {
        let dir = root.as_ref().join(escape_path_segment(function));
        fs::create_dir_all(&dir).map_err(|e| BackendError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// The directory holding this function's entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the value file for `id`.
    pub fn value_path(&self, id: &str) -> PathBuf {
        self.path_with(id, VALUE_EXTENSION)
    }

    /// Path of the metadata file for `id`.
    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.path_with(id, METADATA_EXTENSION)
    }

    fn path_with(&self, id: &str, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{extension}", escape_path_segment(id)))
    }

    fn persist_atomically(&self, path: &Path, contents: &[u8]) -> Result<(), BackendError> {
        // The directory may have been removed by an external cleanup.
        fs::create_dir_all(&self.dir).map_err(|e| BackendError::io(&self.dir, e))?;

        let mut temp_file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| BackendError::io(&self.dir, e))?;
        temp_file
            .write_all(contents)
            .and_then(|()| temp_file.as_file().sync_all())
            .map_err(|e| BackendError::io(temp_file.path(), e))?;

        tracing::trace!(path = %path.display(), "persisting cache file");
        temp_file
            .persist(path)
            .map_err(|e| BackendError::io(path, e.error))?;
        Ok(())
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, BackendError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| BackendError::io(&self.dir, e))?;
            let path = dir_entry.path();
            let is_entry_file = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some(VALUE_EXTENSION) | Some(METADATA_EXTENSION)
            );
            if is_entry_file {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn remove_if_present(path: &Path) -> Result<bool, BackendError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BackendError::io(path, e)),
    }
}

impl CacheBackend for FsBackend {
    fn exists(&self, id: &str) -> Result<bool, BackendError> {
        let path = self.value_path(id);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::io(&path, e)),
        }
    }

    fn read(&self, id: &str) -> Result<String, BackendError> {
        let path = self.value_path(id);
        tracing::trace!(path = %path.display(), "reading cache file");
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackendError::NotFound(id.to_string()))
            }
            Err(e) => return Err(BackendError::io(&path, e)),
        };
        String::from_utf8(bytes).map_err(|e| BackendError::InvalidText {
            id: id.to_string(),
            message: e.to_string(),
        })
    }

    fn metadata(&self, id: &str) -> Result<Option<EntryMetadata>, BackendError> {
        let path = self.metadata_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BackendError::Malformed(format!("{}: {e}", path.display())))
    }

    fn write(&self, entry: &CacheEntry) -> Result<(), BackendError> {
        let metadata = serde_json::to_vec_pretty(&entry.metadata)
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        self.persist_atomically(&self.metadata_path(&entry.identifier), &metadata)?;
        self.persist_atomically(
            &self.value_path(&entry.identifier),
            entry.representation.as_bytes(),
        )
    }

    fn remove(&self, id: &str) -> Result<bool, BackendError> {
        let existed = remove_if_present(&self.value_path(id))?;
        remove_if_present(&self.metadata_path(id))?;
        Ok(existed)
    }

    fn len(&self) -> Result<usize, BackendError> {
        Ok(self
            .entry_files()?
            .iter()
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(VALUE_EXTENSION))
            .count())
    }

    fn clear(&self) -> Result<(), BackendError> {
        // Only entry files are removed; anything else in the directory is
        // left for its owner.
        for path in self.entry_files()? {
            remove_if_present(&path)?;
        }
        tracing::debug!(dir = %self.dir.display(), "cleared cache directory");
        Ok(())
    }

    fn entries(&self) -> Result<Vec<EntryMetadata>, BackendError> {
        let mut entries = Vec::new();
        for path in self.entry_files()? {
            if path.extension().and_then(|ext| ext.to_str()) != Some(METADATA_EXTENSION) {
                continue;
            }
            // Metadata whose value was never written (or was lost) is not an entry.
            if !path.with_extension(VALUE_EXTENSION).is_file() {
                tracing::debug!(path = %path.display(), "skipping metadata without a value");
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Removed concurrently.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackendError::io(&path, e)),
            };
            match serde_json::from_slice(&bytes) {
                Ok(meta) => entries.push(meta),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable metadata file");
                }
            }
        }
        Ok(entries)
    }
}
