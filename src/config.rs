use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

/// Well-known port of the naming server's client-facing service interface.
pub const SERVICE_PORT: u16 = 6000;
/// Well-known port of the naming server's registration interface.
pub const REGISTRATION_PORT: u16 = 6001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConfig {
    pub service: SocketAddr,
    pub registration: SocketAddr,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            service: SocketAddr::from((Ipv4Addr::UNSPECIFIED, SERVICE_PORT)),
            registration: SocketAddr::from((Ipv4Addr::UNSPECIFIED, REGISTRATION_PORT)),
        }
    }
}

impl NamingConfig {
    /// Loopback only, with ports chosen by the system.
    pub fn loopback() -> Self {
        Self {
            service: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            registration: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Local directory whose contents are served.
    pub root: PathBuf,
    /// Externally visible host name put into the stubs sent to the naming
    /// server.
    pub hostname: String,
    /// Port of the data-plane interface, 0 for any.
    pub storage_port: u16,
    /// Port of the control-plane interface, 0 for any.
    pub command_port: u16,
}

impl StorageConfig {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            hostname: Ipv4Addr::LOCALHOST.to_string(),
            storage_port: 0,
            command_port: 0,
        }
    }
}
