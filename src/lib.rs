//! A small distributed filesystem.
//!
//! One naming server keeps the directory tree in memory and knows which
//! storage server holds each file. Storage servers keep file contents under a
//! local directory. Clients ask the naming server where a file lives and then
//! read and write it on the storage server directly. All communication goes
//! through the remote-call layer in [`transport`].

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod path;
pub mod storage;
pub mod transport;

pub use config::{NamingConfig, StorageConfig};
pub use error::{FsError, Result};
pub use naming::{NamingServer, Registration, Service, ServiceStub};
pub use path::Path;
pub use storage::{Command, Storage, StorageServer, StorageStub};
pub use transport::{RpcError, Skeleton, Stub};
