//! Start/stop bookkeeping shared by naming and storage servers.

use crate::error::FsError;
use crate::transport::{lock, Hooks, RpcError};
use log::{info, warn};
use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
};

/// Called once a server has shut down, with the cause or `None` when the
/// shutdown was requested.
pub type StoppedHook = Arc<dyn Fn(Option<&RpcError>) + Send + Sync>;

pub(crate) fn log_stopped(name: &'static str) -> StoppedHook {
    Arc::new(move |cause| match cause {
        Some(cause) => warn!("{} stopped: {}", name, cause),
        None => info!("{} stopped", name),
    })
}

#[derive(Default)]
struct Flags {
    started: bool,
    stopping: bool,
}

pub(crate) struct Lifecycle {
    name: &'static str,
    flags: Mutex<Flags>,
    // set when an endpoint died on its own during the current run
    failed: Arc<AtomicBool>,
    hook: StoppedHook,
}

impl Lifecycle {
    pub fn new(name: &'static str, hook: StoppedHook) -> Self {
        Self {
            name,
            flags: Mutex::new(Flags::default()),
            failed: Arc::new(AtomicBool::new(false)),
            hook,
        }
    }

    /// `false` once any endpoint has died on its own, even before `stop`.
    pub fn is_running(&self) -> bool {
        lock(&self.flags).started && !self.failed.load(Ordering::SeqCst)
    }

    /// Runs `start` unless the server is running or stopping. A server whose
    /// endpoint failed must be stopped before it can start again.
    pub fn start<F>(&self, start: F) -> Result<(), FsError>
    where
        F: FnOnce() -> Result<(), FsError>,
    {
        let mut flags = lock(&self.flags);
        if flags.started {
            return Err(FsError::IllegalState(format!("{} was not stopped", self.name)));
        }
        if flags.stopping {
            return Err(FsError::IllegalState(format!("{} is stopping", self.name)));
        }
        self.failed.store(false, Ordering::SeqCst);
        start()?;
        flags.started = true;
        info!("{} started", self.name);
        Ok(())
    }

    /// Runs `stop` if the server was started, then reports a clean shutdown
    /// unless a failure was already reported for this run.
    pub fn stop<F: FnOnce()>(&self, stop: F) {
        {
            let mut flags = lock(&self.flags);
            if !flags.started || flags.stopping {
                return;
            }
            flags.stopping = true;
        }
        stop();
        {
            let mut flags = lock(&self.flags);
            flags.started = false;
            flags.stopping = false;
        }
        if !self.failed.swap(false, Ordering::SeqCst) {
            (self.hook)(None);
        }
    }

    /// Endpoint hooks that report an endpoint dying on its own as a server
    /// shutdown.
    pub fn endpoint_hooks(&self) -> Arc<dyn Hooks> {
        Arc::new(EndpointHooks {
            name: self.name,
            failed: self.failed.clone(),
            hook: self.hook.clone(),
        })
    }
}

struct EndpointHooks {
    name: &'static str,
    failed: Arc<AtomicBool>,
    hook: StoppedHook,
}

impl Hooks for EndpointHooks {
    fn service_error(&self, err: &RpcError) {
        warn!("{}: service thread failed: {}", self.name, err);
    }

    fn stopped(&self, cause: Option<&io::Error>) {
        if let Some(cause) = cause {
            if !self.failed.swap(true, Ordering::SeqCst) {
                (self.hook)(Some(&RpcError::Io(cause.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        sync::Mutex,
    };

    #[test]
    fn start_stop_restart() {
        let stops = Arc::new(AtomicUsize::new(0));
        let hook: StoppedHook = {
            let stops = stops.clone();
            Arc::new(move |cause| {
                assert!(cause.is_none());
                stops.fetch_add(1, Ordering::SeqCst);
            })
        };
        let lifecycle = Lifecycle::new("test server", hook);

        lifecycle.start(|| Ok(())).unwrap();
        assert!(lifecycle.is_running());
        assert!(matches!(lifecycle.start(|| Ok(())), Err(FsError::IllegalState(_))));

        lifecycle.stop(|| {});
        assert!(!lifecycle.is_running());
        lifecycle.stop(|| panic!("not running"));
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        lifecycle.start(|| Ok(())).unwrap();
        assert!(lifecycle.is_running());
    }

    #[test]
    fn failed_start_leaves_server_stopped() {
        let lifecycle = Lifecycle::new("test server", log_stopped("test server"));
        let result = lifecycle.start(|| Err(FsError::IllegalState("bind failed".into())));
        assert!(result.is_err());
        assert!(!lifecycle.is_running());
        lifecycle.start(|| Ok(())).unwrap();
    }

    #[test]
    fn endpoint_failure_ends_the_run() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let hook: StoppedHook = {
            let causes = causes.clone();
            Arc::new(move |cause: Option<&RpcError>| {
                causes.lock().unwrap().push(cause.cloned());
            })
        };
        let lifecycle = Lifecycle::new("test server", hook);
        lifecycle.start(|| Ok(())).unwrap();

        let hooks = lifecycle.endpoint_hooks();
        hooks.stopped(None);
        assert!(lifecycle.is_running());
        hooks.stopped(Some(&io::Error::new(io::ErrorKind::Other, "gone")));
        hooks.stopped(Some(&io::Error::new(io::ErrorKind::Other, "also gone")));
        assert!(!lifecycle.is_running());
        assert!(matches!(lifecycle.start(|| Ok(())), Err(FsError::IllegalState(_))));

        // stop still tears down whatever is left, without a second report
        let mut torn_down = false;
        lifecycle.stop(|| torn_down = true);
        assert!(torn_down);
        assert_eq!(
            *causes.lock().unwrap(),
            vec![Some(RpcError::Io("gone".to_string()))]
        );

        lifecycle.start(|| Ok(())).unwrap();
        assert!(lifecycle.is_running());
        lifecycle.stop(|| {});
        assert_eq!(causes.lock().unwrap().last(), Some(&None));
    }
}
