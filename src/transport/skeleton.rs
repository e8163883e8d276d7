use super::{
    codec::{self, Call, Reply},
    interface::{Dispatch, Fault},
    lock, Remote, RpcError,
};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

/// Callbacks for failures that happen away from any caller.
pub trait Hooks: Send + Sync {
    /// Called when `accept` fails. Returning `true` resumes accepting,
    /// `false` shuts the endpoint down; the error is then passed to `stopped`.
    fn listen_error(&self, err: &io::Error) -> bool {
        warn!("listener failed: {}", err);
        false
    }

    /// Called when a connection could not be read from or answered.
    fn service_error(&self, err: &RpcError) {
        warn!("service thread failed: {}", err);
    }

    /// Called exactly once per run, after the accept loop and every in-flight
    /// handler have finished. `None` means the endpoint was stopped on request.
    fn stopped(&self, cause: Option<&io::Error>) {
        if let Some(cause) = cause {
            warn!("endpoint stopped: {}", cause);
        }
    }
}

/// Logs and otherwise ignores everything.
pub struct LogHooks;

impl Hooks for LogHooks {}

struct Running {
    local: SocketAddr,
    stop: Arc<AtomicBool>,
    accept: JoinHandle<()>,
}

struct State {
    address: Option<SocketAddr>,
    running: Option<Running>,
}

/// Multithreaded TCP server forwarding calls on interface `T` to a target.
pub struct Skeleton<T: Remote + ?Sized> {
    target: Arc<T>,
    dispatch: Arc<Dispatch<T>>,
    hooks: Arc<dyn Hooks>,
    state: Mutex<State>,
    // serializes start and stop; `state` is only held briefly
    transition: Mutex<()>,
}

impl<T: Remote + ?Sized> Skeleton<T> {
    /// Creates an unstarted endpoint. Without an address, the system picks a
    /// port at the first `start` and that address is kept for restarts.
    pub fn new(target: Arc<T>, address: Option<SocketAddr>) -> Result<Self, RpcError> {
        Ok(Self {
            target,
            dispatch: Arc::new(Dispatch::new()?),
            hooks: Arc::new(LogHooks),
            state: Mutex::new(State {
                address,
                running: None,
            }),
            transition: Mutex::new(()),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Address assigned by the user or by the last `start`.
    pub fn address(&self) -> Option<SocketAddr> {
        lock(&self.state).address
    }

    pub fn is_running(&self) -> bool {
        let mut state = lock(&self.state);
        Self::reap(&mut state);
        state.running.is_some()
    }

    /// Binds the listening socket and spawns the accept loop. Returns once the
    /// bind has succeeded or failed.
    pub fn start(&self) -> Result<(), RpcError> {
        let _transition = lock(&self.transition);
        let mut state = lock(&self.state);
        Self::reap(&mut state);
        if state.running.is_some() {
            return Err(RpcError::AlreadyRunning);
        }

        let bind = state
            .address
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
        let listener = TcpListener::bind(bind).map_err(|err| RpcError::Bind {
            addr: bind,
            cause: err.to_string(),
        })?;
        let local = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let accept = {
            let target = self.target.clone();
            let dispatch = self.dispatch.clone();
            let hooks = self.hooks.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("{}-accept", T::NAME))
                .spawn(move || accept_loop(listener, target, dispatch, hooks, stop))?
        };

        state.address = Some(local);
        state.running = Some(Running {
            local,
            stop,
            accept,
        });
        info!("{} endpoint listening on {}", T::NAME, local);
        Ok(())
    }

    /// Closes the listening socket and waits for in-flight calls to finish.
    /// Connections that have not sent a call yet are shut down instead of
    /// waited for. Does nothing if the endpoint is not running.
    ///
    /// Must not be called from inside a call served by this endpoint.
    pub fn stop(&self) {
        let _transition = lock(&self.transition);
        let running = match lock(&self.state).running.take() {
            Some(running) => running,
            None => return,
        };
        running.stop.store(true, Ordering::SeqCst);
        // unblock accept
        if let Err(err) = TcpStream::connect(reachable(running.local)) {
            debug!("{} wakeup connection failed: {}", T::NAME, err);
        }
        if running.accept.join().is_err() {
            warn!("{} accept thread panicked", T::NAME);
        }
        info!("{} endpoint on {} stopped", T::NAME, running.local);
    }

    // Drops a run whose accept loop already exited on its own.
    fn reap(state: &mut State) {
        let finished = match &state.running {
            Some(running) => running.accept.is_finished(),
            None => false,
        };
        if finished {
            if let Some(running) = state.running.take() {
                let _ = running.accept.join();
            }
        }
    }
}

impl<T: Remote + ?Sized> Drop for Skeleton<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Maps a wildcard address to loopback so it can be connected to.
pub(crate) fn reachable(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        addr => addr,
    }
}

fn accept_loop<T: Remote + ?Sized>(
    listener: TcpListener,
    target: Arc<T>,
    dispatch: Arc<Dispatch<T>>,
    hooks: Arc<dyn Hooks>,
    stop: Arc<AtomicBool>,
) {
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();
    // connections still waiting for their call, by connection number
    let waiting: Arc<Mutex<HashMap<u64, TcpStream>>> = Arc::default();
    let mut accepted = 0u64;
    let cause = loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stop.load(Ordering::SeqCst) {
                    break None;
                }
                handlers.retain(|handler| !handler.is_finished());
                let id = accepted;
                accepted += 1;
                match stream.try_clone() {
                    Ok(watch) => {
                        lock(&waiting).insert(id, watch);
                    }
                    Err(err) => debug!("{} cannot watch {}: {}", T::NAME, peer, err),
                }
                let target = target.clone();
                let dispatch = dispatch.clone();
                let handler_hooks = hooks.clone();
                let handler_waiting = waiting.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-call", T::NAME))
                    .spawn(move || {
                        let received = || {
                            lock(&handler_waiting).remove(&id);
                        };
                        if let Err(err) = serve(stream, &*target, &dispatch, received) {
                            debug!("{} call from {} failed: {}", T::NAME, peer, err);
                            handler_hooks.service_error(&err);
                        }
                    });
                match spawned {
                    Ok(handler) => handlers.push(handler),
                    Err(err) => hooks.service_error(&RpcError::from(err)),
                }
            }
            Err(err) => {
                if stop.load(Ordering::SeqCst) {
                    break None;
                }
                if !hooks.listen_error(&err) {
                    break Some(err);
                }
            }
        }
    };
    drop(listener);
    for (_, stream) in lock(&waiting).drain() {
        let _ = stream.shutdown(Shutdown::Read);
    }
    for handler in handlers {
        let _ = handler.join();
    }
    hooks.stopped(cause.as_ref());
}

fn serve<T: Remote + ?Sized, F: FnOnce()>(
    mut stream: TcpStream,
    target: &T,
    dispatch: &Dispatch<T>,
    received: F,
) -> Result<(), RpcError> {
    let call = codec::read_frame::<_, Call>(&mut stream);
    received();
    let call = call?;
    debug!("{}.{}({})", call.interface, call.method, call.params.join(", "));

    let handler = if call.interface == T::NAME {
        dispatch.resolve(&call.method, &call.params)
    } else {
        None
    };
    let reply = match handler {
        None => Reply::Failed(RpcError::NoSuchMethod {
            interface: call.interface,
            method: call.method,
            params: call.params,
        }),
        Some(handler) => {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(target, &call.args))) {
                Ok(Ok(value)) => Reply::Return(value),
                Ok(Err(Fault::Raised(payload))) => Reply::Raised(payload),
                Ok(Err(Fault::Rpc(err))) => Reply::Failed(err),
                Err(_) => Reply::Failed(RpcError::Remote(format!(
                    "{}.{} panicked",
                    T::NAME,
                    call.method
                ))),
            }
        }
    };
    codec::write_frame(&mut stream, &reply)
}
