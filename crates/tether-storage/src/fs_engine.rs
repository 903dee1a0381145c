use crate::{PersistedSnapshot, StorageEngine, StorageResult, io_error};
use std::{
    fmt,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

const SNAPSHOT_DIR: &str = ".tether";
const SNAPSHOT_EXT: &str = "snapshot";

/// Filesystem-backed engine storing one CBOR record at
/// `<root>/.tether/<namespace>.snapshot`.
#[derive(Clone)]
pub struct FsEngine {
    dir: PathBuf,
    path: PathBuf,
}

impl fmt::Debug for FsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsEngine").field("path", &self.path).finish()
    }
}

impl FsEngine {
    pub fn open(root: impl AsRef<Path>, namespace: &str) -> StorageResult<Self> {
        let dir = root.as_ref().join(SNAPSHOT_DIR);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let path = dir.join(format!("{namespace}.{SNAPSHOT_EXT}"));
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageEngine for FsEngine {
    fn load(&self) -> StorageResult<Option<PersistedSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&self.path, err)),
        };
        Ok(Some(serde_cbor::from_slice(&bytes)?))
    }

    /// Write to a temporary file in the same directory, sync, then rename over
    /// the previous snapshot.
    fn save(&self, snapshot: &PersistedSnapshot) -> StorageResult<()> {
        let bytes = serde_cbor::to_vec(snapshot)?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        tmp.write_all(&bytes).map_err(|e| io_error(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| io_error(&self.path, e.error))?;
        Ok(())
    }
}
