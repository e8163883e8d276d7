//! Storage servers: file bytes under a local root.
//!
//! Clients read and write through the data-plane [`Storage`] interface; the
//! naming server creates and deletes files through the control-plane
//! [`Command`] interface.

use crate::error::FsError;
use crate::path::Path;
use crate::transport::{interface::invoke, Method, Remote, Signature, Stub};

pub mod server;
pub mod store;

pub use server::StorageServer;
pub use store::LocalStore;

/// Data plane.
pub trait Storage: Send + Sync {
    /// Length in bytes of a file. Fails with `NotFound` for directories.
    fn size(&self, file: &Path) -> Result<u64, FsError>;

    /// Reads `length` bytes at `offset`; the whole range must lie inside the
    /// file.
    fn read(&self, file: &Path, offset: u64, length: u64) -> Result<Vec<u8>, FsError>;

    /// Writes `data` at `offset`, growing the file if needed.
    fn write(&self, file: &Path, offset: u64, data: &[u8]) -> Result<(), FsError>;
}

/// Control plane.
pub trait Command: Send + Sync {
    /// Creates an empty file and any missing parent directories. Returns
    /// `false` if the file could not be created, including when it exists.
    fn create(&self, file: &Path) -> Result<bool, FsError>;

    /// Removes a file or a whole directory, then prunes directories left empty.
    fn delete(&self, path: &Path) -> Result<bool, FsError>;
}

pub type StorageStub = Stub<dyn Storage>;
pub type CommandStub = Stub<dyn Command>;

const SIZE: Signature = Signature::remote("size", &["Path"]);
const READ: Signature = Signature::remote("read", &["Path", "u64", "u64"]);
const WRITE: Signature = Signature::remote("write", &["Path", "u64", "Vec<u8>"]);
const CREATE: Signature = Signature::remote("create", &["Path"]);
const DELETE: Signature = Signature::remote("delete", &["Path"]);

impl Remote for dyn Storage {
    const NAME: &'static str = "Storage";

    fn methods() -> Vec<Method<Self>> {
        vec![
            Method::new(SIZE, |target, args| {
                invoke(args, |(file,): (Path,)| target.size(&file))
            }),
            Method::new(READ, |target, args| {
                invoke(args, |(file, offset, length): (Path, u64, u64)| {
                    target.read(&file, offset, length)
                })
            }),
            Method::new(WRITE, |target, args| {
                invoke(args, |(file, offset, data): (Path, u64, Vec<u8>)| {
                    target.write(&file, offset, &data)
                })
            }),
        ]
    }
}

impl Remote for dyn Command {
    const NAME: &'static str = "Command";

    fn methods() -> Vec<Method<Self>> {
        vec![
            Method::new(CREATE, |target, args| {
                invoke(args, |(file,): (Path,)| target.create(&file))
            }),
            Method::new(DELETE, |target, args| {
                invoke(args, |(path,): (Path,)| target.delete(&path))
            }),
        ]
    }
}

impl Storage for StorageStub {
    fn size(&self, file: &Path) -> Result<u64, FsError> {
        self.call(&SIZE, &(file,))
    }

    fn read(&self, file: &Path, offset: u64, length: u64) -> Result<Vec<u8>, FsError> {
        self.call(&READ, &(file, offset, length))
    }

    fn write(&self, file: &Path, offset: u64, data: &[u8]) -> Result<(), FsError> {
        self.call(&WRITE, &(file, offset, data))
    }
}

impl Command for CommandStub {
    fn create(&self, file: &Path) -> Result<bool, FsError> {
        self.call(&CREATE, &(file,))
    }

    fn delete(&self, path: &Path) -> Result<bool, FsError> {
        self.call(&DELETE, &(path,))
    }
}
