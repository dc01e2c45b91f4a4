use super::{LocalStore, Namespace};
use crate::Error;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// One file per record under `<root>/<namespace>/<key>`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous record intact. On Unix every record is
/// readable by the owner only, since key records hold private keys.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Uses `root` as the storage directory, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, namespace: Namespace, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Storage(format!("Invalid record key: {key:?}")));
        }
        Ok(self.root.join(namespace.as_str()).join(key))
    }
}

impl LocalStore for FileStore {
    fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(self.path(namespace, key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, namespace: Namespace, key: &str, value: &[u8]) -> Result<(), Error> {
        let path = self.path(namespace, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension("tmp");
        let mut options = OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }

        let mut file = options.open(&staging)?;
        file.write_all(value)?;
        file.sync_all()?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn delete(&self, namespace: Namespace, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(namespace, key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
