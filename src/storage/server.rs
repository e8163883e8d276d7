use super::{Command, CommandStub, LocalStore, Storage, StorageStub};
use crate::config::StorageConfig;
use crate::error::FsError;
use crate::lifecycle::{log_stopped, Lifecycle, StoppedHook};
use crate::naming::Registration;
use crate::path::Path;
use crate::transport::{RpcError, Skeleton, Stub};
use log::{info, warn};
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

/// A storage server: serves the files under a local directory and registers
/// them with a naming server.
pub struct StorageServer {
    config: StorageConfig,
    store: Arc<LocalStore>,
    storage: Skeleton<dyn Storage>,
    command: Skeleton<dyn Command>,
    lifecycle: Lifecycle,
}

fn endpoint(port: u16) -> Option<SocketAddr> {
    match port {
        0 => None,
        port => Some(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))),
    }
}

impl StorageServer {
    pub fn new(config: StorageConfig) -> Result<Self, RpcError> {
        Self::with_hook(config, log_stopped("storage server"))
    }

    pub fn with_hook(config: StorageConfig, hook: StoppedHook) -> Result<Self, RpcError> {
        let store = Arc::new(LocalStore::new(config.root.clone()));
        let lifecycle = Lifecycle::new("storage server", hook);
        let storage = store.clone() as Arc<dyn Storage>;
        let storage = Skeleton::new(storage, endpoint(config.storage_port))?
            .with_hooks(lifecycle.endpoint_hooks());
        let command = store.clone() as Arc<dyn Command>;
        let command = Skeleton::new(command, endpoint(config.command_port))?
            .with_hooks(lifecycle.endpoint_hooks());
        Ok(Self {
            config,
            store,
            storage,
            command,
            lifecycle,
        })
    }

    /// Starts both endpoints and registers with `naming`. Files the naming
    /// server already knows from another storage server are deleted locally.
    pub fn start(&self, naming: &dyn Registration) -> Result<(), FsError> {
        self.lifecycle.start(|| {
            self.storage.start()?;
            if let Err(err) = self.command.start() {
                self.storage.stop();
                return Err(err.into());
            }
            self.register(naming).map_err(|err| {
                self.storage.stop();
                self.command.stop();
                err
            })
        })
    }

    fn register(&self, naming: &dyn Registration) -> Result<(), FsError> {
        let (storage, command) = self.stubs()?;
        let files = Path::list(&self.config.root).map_err(|err| FsError::io(&Path::root(), err))?;
        info!(
            "registering {} files from {} as {}",
            files.len(),
            self.config.root.display(),
            storage
        );
        let duplicates = naming.register(storage, command, files)?;
        for path in &duplicates {
            match self.store.delete(path) {
                Ok(true) => info!("dropped {}, already served elsewhere", path),
                _ => warn!("failed to drop duplicate {}", path),
            }
        }
        Ok(())
    }

    /// Stops both endpoints, letting in-flight calls finish.
    pub fn stop(&self) {
        self.lifecycle.stop(|| {
            self.storage.stop();
            self.command.stop();
        });
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Stubs as advertised to the naming server. Available once started.
    pub fn stubs(&self) -> Result<(StorageStub, CommandStub), RpcError> {
        let hostname = &self.config.hostname;
        Ok((
            Stub::from_skeleton_with_host(&self.storage, hostname)?,
            Stub::from_skeleton_with_host(&self.command, hostname)?,
        ))
    }

    pub fn root(&self) -> &std::path::Path {
        self.store.root()
    }
}
