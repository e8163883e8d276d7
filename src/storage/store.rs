use super::{Command, Storage};
use crate::error::FsError;
use crate::path::Path;
use crate::transport::lock;
use log::{debug, warn};
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::Mutex,
};

/// Files below a local directory, served through [`Storage`] and
/// [`Command`]. Operations are serialized.
pub struct LocalStore {
    root: PathBuf,
    guard: Mutex<()>,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            guard: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Opens an existing regular file.
    fn open(&self, file: &Path, write: bool) -> Result<File, FsError> {
        let local = file.to_local(&self.root);
        match fs::metadata(&local) {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(FsError::NotFound(file.clone())),
        }
        OpenOptions::new()
            .read(!write)
            .write(write)
            .open(&local)
            .map_err(|err| FsError::io(file, err))
    }

    // Removes now-empty directories from `dir` upwards, stopping below the root.
    fn prune(&self, mut dir: PathBuf) {
        while dir != self.root && dir.starts_with(&self.root) {
            let empty = match fs::read_dir(&dir) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if !empty || fs::remove_dir(&dir).is_err() {
                break;
            }
            debug!("pruned empty directory {}", dir.display());
            if !dir.pop() {
                break;
            }
        }
    }
}

impl Storage for LocalStore {
    fn size(&self, file: &Path) -> Result<u64, FsError> {
        let _guard = lock(&self.guard);
        let meta = self.open(file, false)?.metadata().map_err(|err| FsError::io(file, err))?;
        Ok(meta.len())
    }

    fn read(&self, file: &Path, offset: u64, length: u64) -> Result<Vec<u8>, FsError> {
        let _guard = lock(&self.guard);
        let mut handle = self.open(file, false)?;
        let size = handle.metadata().map_err(|err| FsError::io(file, err))?.len();
        match offset.checked_add(length) {
            Some(end) if end <= size => {}
            _ => {
                return Err(FsError::OutOfRange {
                    path: file.clone(),
                    offset,
                    length,
                    size,
                })
            }
        }
        let mut buf = vec![0u8; length as usize];
        handle
            .seek(SeekFrom::Start(offset))
            .and_then(|_| handle.read_exact(&mut buf))
            .map_err(|err| FsError::io(file, err))?;
        Ok(buf)
    }

    fn write(&self, file: &Path, offset: u64, data: &[u8]) -> Result<(), FsError> {
        let _guard = lock(&self.guard);
        let mut handle = self.open(file, true)?;
        handle
            .seek(SeekFrom::Start(offset))
            .and_then(|_| handle.write_all(data))
            .map_err(|err| FsError::io(file, err))
    }
}

impl Command for LocalStore {
    fn create(&self, file: &Path) -> Result<bool, FsError> {
        if file.is_root() {
            return Ok(false);
        }
        let _guard = lock(&self.guard);
        let local = file.to_local(&self.root);
        if let Some(parent) = local.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("cannot create parents of {}: {}", file, err);
                return Ok(false);
            }
        }
        match OpenOptions::new().write(true).create_new(true).open(&local) {
            Ok(_) => Ok(true),
            Err(err) => {
                debug!("cannot create {}: {}", file, err);
                Ok(false)
            }
        }
    }

    fn delete(&self, path: &Path) -> Result<bool, FsError> {
        if path.is_root() {
            return Ok(false);
        }
        let _guard = lock(&self.guard);
        let local = path.to_local(&self.root);
        let removed = match fs::symlink_metadata(&local) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&local),
            Ok(_) => fs::remove_file(&local),
            Err(err) => Err(err),
        };
        if let Err(err) = removed {
            debug!("cannot delete {}: {}", path, err);
            return Ok(false);
        }
        if let Some(parent) = local.parent() {
            self.prune(parent.to_path_buf());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn create_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let file = path("/a/b/file");

        assert_eq!(store.size(&file), Err(FsError::NotFound(file.clone())));
        assert!(store.create(&file).unwrap());
        assert!(!store.create(&file).unwrap());
        assert!(!store.create(&Path::root()).unwrap());
        assert_eq!(store.size(&file).unwrap(), 0);

        store.write(&file, 0, b"hello").unwrap();
        store.write(&file, 8, b"world").unwrap();
        assert_eq!(store.size(&file).unwrap(), 13);
        assert_eq!(store.read(&file, 8, 5).unwrap(), b"world");
        assert_eq!(store.read(&file, 5, 3).unwrap(), vec![0u8; 3]);
        assert_eq!(store.read(&file, 13, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn read_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let file = path("/f");
        store.create(&file).unwrap();
        store.write(&file, 0, b"abc").unwrap();

        assert!(matches!(store.read(&file, 2, 2), Err(FsError::OutOfRange { size: 3, .. })));
        assert!(matches!(store.read(&file, u64::MAX, 2), Err(FsError::OutOfRange { .. })));
        assert_eq!(store.read(&path("/missing"), 0, 0), Err(FsError::NotFound(path("/missing"))));
    }

    #[test]
    fn directories_are_not_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        store.create(&path("/d/f")).unwrap();
        assert_eq!(store.size(&path("/d")), Err(FsError::NotFound(path("/d"))));
        assert!(store.write(&path("/d"), 0, b"x").is_err());
    }

    #[test]
    fn delete_prunes_empty_parents() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        store.create(&path("/a/b/c/f")).unwrap();
        store.create(&path("/a/g")).unwrap();

        assert!(store.delete(&path("/a/b/c/f")).unwrap());
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a/g").exists());

        assert!(store.delete(&path("/a")).unwrap());
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().exists());

        assert!(!store.delete(&path("/a")).unwrap());
        assert!(!store.delete(&Path::root()).unwrap());
    }
}
