//! The naming server: directory tree and storage-server registry.
//!
//! Clients use [`Service`] for metadata operations and to find the storage
//! server holding a file; storage servers announce themselves through
//! [`Registration`]. File bytes never pass through the naming server.

use crate::error::FsError;
use crate::path::Path;
use crate::storage::{CommandStub, StorageStub};
use crate::transport::{interface::invoke, Method, Remote, Signature, Stub};
use std::fmt;

pub mod namespace;
pub mod server;
pub mod tree;

pub use namespace::Namespace;
pub use server::NamingServer;
pub use tree::DirectoryTree;

/// Client-facing interface.
pub trait Service: Send + Sync {
    /// `true` for directories, `false` for files.
    fn is_directory(&self, path: &Path) -> Result<bool, FsError>;

    /// Names of the entries directly inside `directory`.
    fn list(&self, directory: &Path) -> Result<Vec<String>, FsError>;

    /// Creates an empty file on a randomly chosen storage server. The parent
    /// must be an existing directory. `false` if the path already exists.
    fn create_file(&self, file: &Path) -> Result<bool, FsError>;

    /// Creates a directory. The parent must be an existing directory. `false`
    /// if the path already exists.
    fn create_directory(&self, directory: &Path) -> Result<bool, FsError>;

    /// Removes a file or directory, deleting it on every storage server that
    /// holds a copy. `false` for the root.
    fn delete(&self, path: &Path) -> Result<bool, FsError>;

    /// Data-plane stub of a storage server holding `file`.
    fn get_storage(&self, file: &Path) -> Result<StorageStub, FsError>;
}

/// Storage-server-facing interface.
pub trait Registration: Send + Sync {
    /// Registers a storage server and the files it holds. Returns the files
    /// that already exist in the namespace; the caller must delete its copies.
    fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, FsError>;
}

pub type ServiceStub = Stub<dyn Service>;
pub type RegistrationStub = Stub<dyn Registration>;

/// The pair of stubs identifying one registered storage server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerStub {
    pub storage: StorageStub,
    pub command: CommandStub,
}

impl ServerStub {
    pub fn new(storage: StorageStub, command: CommandStub) -> Self {
        Self { storage, command }
    }
}

impl fmt::Display for ServerStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.storage, self.command)
    }
}

const IS_DIRECTORY: Signature = Signature::remote("is_directory", &["Path"]);
const LIST: Signature = Signature::remote("list", &["Path"]);
const CREATE_FILE: Signature = Signature::remote("create_file", &["Path"]);
const CREATE_DIRECTORY: Signature = Signature::remote("create_directory", &["Path"]);
const DELETE: Signature = Signature::remote("delete", &["Path"]);
const GET_STORAGE: Signature = Signature::remote("get_storage", &["Path"]);
const REGISTER: Signature =
    Signature::remote("register", &["Stub<Storage>", "Stub<Command>", "Vec<Path>"]);

impl Remote for dyn Service {
    const NAME: &'static str = "Service";

    fn methods() -> Vec<Method<Self>> {
        vec![
            Method::new(IS_DIRECTORY, |target, args| {
                invoke(args, |(path,): (Path,)| target.is_directory(&path))
            }),
            Method::new(LIST, |target, args| {
                invoke(args, |(directory,): (Path,)| target.list(&directory))
            }),
            Method::new(CREATE_FILE, |target, args| {
                invoke(args, |(file,): (Path,)| target.create_file(&file))
            }),
            Method::new(CREATE_DIRECTORY, |target, args| {
                invoke(args, |(directory,): (Path,)| target.create_directory(&directory))
            }),
            Method::new(DELETE, |target, args| {
                invoke(args, |(path,): (Path,)| target.delete(&path))
            }),
            Method::new(GET_STORAGE, |target, args| {
                invoke(args, |(file,): (Path,)| target.get_storage(&file))
            }),
        ]
    }
}

impl Remote for dyn Registration {
    const NAME: &'static str = "Registration";

    fn methods() -> Vec<Method<Self>> {
        vec![Method::new(REGISTER, |target, args| {
            invoke(
                args,
                |(storage, command, files): (StorageStub, CommandStub, Vec<Path>)| {
                    target.register(storage, command, files)
                },
            )
        })]
    }
}

impl Service for ServiceStub {
    fn is_directory(&self, path: &Path) -> Result<bool, FsError> {
        self.call(&IS_DIRECTORY, &(path,))
    }

    fn list(&self, directory: &Path) -> Result<Vec<String>, FsError> {
        self.call(&LIST, &(directory,))
    }

    fn create_file(&self, file: &Path) -> Result<bool, FsError> {
        self.call(&CREATE_FILE, &(file,))
    }

    fn create_directory(&self, directory: &Path) -> Result<bool, FsError> {
        self.call(&CREATE_DIRECTORY, &(directory,))
    }

    fn delete(&self, path: &Path) -> Result<bool, FsError> {
        self.call(&DELETE, &(path,))
    }

    fn get_storage(&self, file: &Path) -> Result<StorageStub, FsError> {
        self.call(&GET_STORAGE, &(file,))
    }
}

impl Registration for RegistrationStub {
    fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, FsError> {
        self.call(&REGISTER, &(storage, command, files))
    }
}
