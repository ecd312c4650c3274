//! Directory-backed record storage: one file per record key.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{RecordKey, RecordStorage};
use crate::error::StoreError;
use crate::recipient::RecipientId;

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir` as the sessions directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl RecordStorage for FileStorage {
    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.path_for(key).try_exists()?)
    }

    fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &RecordKey, payload: &[u8]) -> Result<(), StoreError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        // Overwrite in place, then cut off whatever a longer previous
        // payload left behind.
        let mut file = options.open(self.path_for(key))?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(payload)?;
        file.sync_data()?;
        file.set_len(payload.len() as u64)?;
        file.sync_all()?;

        debug!(record = %key, len = payload.len(), "record written");
        Ok(())
    }

    fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                debug!(record = %key, "record deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys_for(&self, recipient: RecipientId) -> Result<Vec<RecordKey>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some(key) = RecordKey::from_file_name(&name) {
                if key.recipient == recipient {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
