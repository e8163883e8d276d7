use super::{Namespace, Registration, RegistrationStub, Service, ServiceStub};
use crate::config::NamingConfig;
use crate::error::FsError;
use crate::lifecycle::{log_stopped, Lifecycle, StoppedHook};
use crate::transport::{skeleton::reachable, RpcError, Skeleton, Stub};
use std::{net::SocketAddr, sync::Arc};

/// A naming server: one [`Namespace`] behind a service endpoint for clients
/// and a registration endpoint for storage servers.
pub struct NamingServer {
    namespace: Arc<Namespace>,
    service: Skeleton<dyn Service>,
    registration: Skeleton<dyn Registration>,
    lifecycle: Lifecycle,
}

impl NamingServer {
    pub fn new(config: NamingConfig) -> Result<Self, RpcError> {
        Self::with_hook(config, log_stopped("naming server"))
    }

    pub fn with_hook(config: NamingConfig, hook: StoppedHook) -> Result<Self, RpcError> {
        let namespace = Arc::new(Namespace::new());
        let lifecycle = Lifecycle::new("naming server", hook);
        let service = Skeleton::new(namespace.clone() as Arc<dyn Service>, Some(config.service))?
            .with_hooks(lifecycle.endpoint_hooks());
        let registration =
            Skeleton::new(namespace.clone() as Arc<dyn Registration>, Some(config.registration))?
                .with_hooks(lifecycle.endpoint_hooks());
        Ok(Self {
            namespace,
            service,
            registration,
            lifecycle,
        })
    }

    pub fn start(&self) -> Result<(), FsError> {
        self.lifecycle.start(|| {
            self.service.start()?;
            self.registration.start().map_err(|err| {
                self.service.stop();
                err.into()
            })
        })
    }

    /// Stops both endpoints, letting in-flight calls finish.
    pub fn stop(&self) {
        self.lifecycle.stop(|| {
            self.service.stop();
            self.registration.stop();
        });
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Connectable address of the service endpoint, once bound.
    pub fn service_address(&self) -> Option<SocketAddr> {
        self.service.address().map(reachable)
    }

    /// Connectable address of the registration endpoint, once bound.
    pub fn registration_address(&self) -> Option<SocketAddr> {
        self.registration.address().map(reachable)
    }

    pub fn service_stub(&self) -> Result<ServiceStub, RpcError> {
        Stub::new(self.service_address().ok_or(RpcError::Unbound)?)
    }

    pub fn registration_stub(&self) -> Result<RegistrationStub, RpcError> {
        Stub::new(self.registration_address().ok_or(RpcError::Unbound)?)
    }
}
