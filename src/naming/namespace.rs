use super::{DirectoryTree, Registration, ServerStub, Service};
use crate::error::FsError;
use crate::path::Path;
use crate::storage::{Command, CommandStub, StorageStub};
use crate::transport::lock;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use std::sync::{Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Naming-server state: the directory tree and the registered storage
/// servers.
///
/// Tree lookups share a read lock and tree mutations hold the write lock for
/// their whole duration. Storage servers are never called with the lock held:
/// `create_file` reserves the name, creates the file remotely and only then
/// makes it visible, and `delete` detaches the subtree before telling the
/// storage servers. A file is not created below a path whose storage-server
/// deletes are still in flight, so a late delete never hits a new file.
#[derive(Default)]
pub struct Namespace {
    tree: RwLock<DirectoryTree>,
    servers: Mutex<Vec<ServerStub>>,
    // paths detached from the tree whose storage-server deletes are running
    purging: Mutex<Vec<Path>>,
    purged: Condvar,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, DirectoryTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DirectoryTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently registered storage servers.
    pub fn servers(&self) -> Vec<ServerStub> {
        lock(&self.servers).clone()
    }

    fn pick_server(&self) -> Result<ServerStub, FsError> {
        lock(&self.servers)
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| FsError::IllegalState("no storage servers registered".to_string()))
    }

    /// Deletes `path` on every location, best effort. The caller registered
    /// `path` in `purging` while holding the tree write lock.
    fn purge(&self, locations: &[ServerStub], path: &Path) {
        for location in locations {
            match location.command.delete(path) {
                Ok(true) => debug!("deleted {} on {}", path, location),
                Ok(false) => warn!("{} refused to delete {}", location, path),
                Err(err) => warn!("failed to delete {} on {}: {}", path, location, err),
            }
        }
        let mut purging = lock(&self.purging);
        if let Some(index) = purging.iter().position(|p| p == path) {
            purging.swap_remove(index);
        }
        self.purged.notify_all();
    }

    fn purging(&self, file: &Path) -> bool {
        lock(&self.purging).iter().any(|p| file.is_subpath(p))
    }

    fn await_purges(&self, file: &Path) {
        let mut purging = lock(&self.purging);
        while purging.iter().any(|p| file.is_subpath(p)) {
            purging = self
                .purged
                .wait(purging)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn require_parent_directory(tree: &DirectoryTree, path: &Path) -> Result<(), FsError> {
        let parent = path.parent()?;
        if tree.is_directory(&parent)? {
            Ok(())
        } else {
            Err(FsError::NotFound(parent))
        }
    }
}

impl Service for Namespace {
    fn is_directory(&self, path: &Path) -> Result<bool, FsError> {
        self.read().is_directory(path)
    }

    fn list(&self, directory: &Path) -> Result<Vec<String>, FsError> {
        self.read().list(directory)
    }

    fn create_file(&self, file: &Path) -> Result<bool, FsError> {
        if file.is_root() {
            return Ok(false);
        }
        let reservation = loop {
            let mut tree = self.write();
            if self.purging(file) {
                drop(tree);
                self.await_purges(file);
                continue;
            }
            Self::require_parent_directory(&tree, file)?;
            match tree.reserve(file, self.pick_server()?)? {
                Some(reservation) => break reservation,
                None => return Ok(false),
            }
        };

        let server = reservation.location();
        let created = server.command.create(file);
        if !matches!(created, Ok(true)) {
            warn!("{} could not create {}, releasing the name", server, file);
            self.write().abandon(file, &reservation);
            return created;
        }
        {
            let mut tree = self.write();
            if tree.commit(file, &reservation) {
                return Ok(true);
            }
            // removed while being created; the copy on disk has no entry
            lock(&self.purging).push(file.clone());
        }
        warn!("{} vanished while being created on {}", file, server);
        self.purge(std::slice::from_ref(server), file);
        Ok(false)
    }

    fn create_directory(&self, directory: &Path) -> Result<bool, FsError> {
        if directory.is_root() {
            return Ok(false);
        }
        let mut tree = self.write();
        Self::require_parent_directory(&tree, directory)?;
        tree.create_directory(directory)
    }

    fn delete(&self, path: &Path) -> Result<bool, FsError> {
        if path.is_root() {
            return Ok(false);
        }
        let locations = {
            let mut tree = self.write();
            let locations = tree.delete(path)?;
            lock(&self.purging).push(path.clone());
            locations
        };
        self.purge(&locations, path);
        Ok(true)
    }

    fn get_storage(&self, file: &Path) -> Result<StorageStub, FsError> {
        Ok(self.read().get_storage(file)?.storage)
    }
}

impl Registration for Namespace {
    fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, FsError> {
        for addr in [storage.address(), command.address()] {
            if addr.port() == 0 || addr.ip().is_unspecified() {
                return Err(FsError::InvalidArgument(format!(
                    "{} is not a reachable stub address",
                    addr
                )));
            }
        }
        let server = ServerStub::new(storage, command);
        {
            let mut servers = lock(&self.servers);
            if servers.contains(&server) {
                return Err(FsError::AlreadyRegistered(server.to_string()));
            }
            servers.push(server.clone());
        }

        let mut tree = self.write();
        let duplicates: Vec<Path> = files
            .into_iter()
            .filter(|file| !file.is_root() && !tree.create_file_recursive(file, server.clone()))
            .collect();
        info!(
            "registered storage server {} ({} duplicate files)",
            server,
            duplicates.len()
        );
        Ok(duplicates)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::{Skeleton, Stub};
    use std::{
        net::SocketAddr,
        sync::{mpsc, Arc},
        thread,
    };

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn stubs(port: u16) -> (StorageStub, CommandStub) {
        let addr = |port| SocketAddr::from(([127, 0, 0, 1], port));
        (
            Stub::new(addr(port)).unwrap(),
            Stub::new(addr(port + 1)).unwrap(),
        )
    }

    /// Command target that records calls. A held gate parks each call until
    /// the test sends its answer.
    #[derive(Default)]
    struct Gate {
        held: Option<(Mutex<mpsc::Sender<()>>, Mutex<mpsc::Receiver<bool>>)>,
        created: Mutex<Vec<Path>>,
        deleted: Mutex<Vec<Path>>,
    }

    impl Gate {
        fn held() -> (Self, mpsc::Receiver<()>, mpsc::Sender<bool>) {
            let (entered, on_enter) = mpsc::channel();
            let (release, on_release) = mpsc::channel();
            let gate = Gate {
                held: Some((Mutex::new(entered), Mutex::new(on_release))),
                ..Gate::default()
            };
            (gate, on_enter, release)
        }

        fn pass(&self) -> bool {
            match &self.held {
                None => true,
                Some((entered, release)) => {
                    let _ = entered.lock().unwrap().send(());
                    release.lock().unwrap().recv().unwrap()
                }
            }
        }
    }

    impl Command for Gate {
        fn create(&self, file: &Path) -> Result<bool, FsError> {
            self.created.lock().unwrap().push(file.clone());
            Ok(self.pass())
        }

        fn delete(&self, path: &Path) -> Result<bool, FsError> {
            self.deleted.lock().unwrap().push(path.clone());
            Ok(self.pass())
        }
    }

    /// Serves `gate` on loopback and registers it with `files`.
    fn register(
        ns: &Namespace,
        gate: Gate,
        files: Vec<Path>,
    ) -> (Arc<Gate>, Skeleton<dyn Command>) {
        let gate = Arc::new(gate);
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let endpoint = Skeleton::new(gate.clone() as Arc<dyn Command>, Some(loopback)).unwrap();
        endpoint.start().unwrap();
        let command: CommandStub = Stub::from_skeleton(&endpoint).unwrap();
        // the data plane is never called here
        let storage = Stub::new(command.address()).unwrap();
        ns.register(storage, command, files).unwrap();
        (gate, endpoint)
    }

    #[test]
    fn root_is_protected() {
        let ns = Namespace::new();
        let root = Path::root();
        assert!(ns.is_directory(&root).unwrap());
        assert!(!ns.create_directory(&root).unwrap());
        assert!(!ns.create_file(&root).unwrap());
        assert!(!ns.delete(&root).unwrap());
        assert!(ns.get_storage(&root).is_err());
    }

    #[test]
    fn parent_must_be_directory() {
        let ns = Namespace::new();
        let (storage, command) = stubs(1000);
        ns.register(storage, command, vec![path("/file")]).unwrap();

        assert_eq!(
            ns.create_directory(&path("/missing/d")),
            Err(FsError::NotFound(path("/missing")))
        );
        assert_eq!(
            ns.create_directory(&path("/file/d")),
            Err(FsError::NotFound(path("/file")))
        );
        assert!(ns.create_file(&path("/file/f")).is_err());
        assert!(ns.create_directory(&path("/d")).unwrap());
        assert!(!ns.create_directory(&path("/d")).unwrap());
        assert!(!ns.create_file(&path("/file")).unwrap());
    }

    #[test]
    fn create_file_needs_a_server() {
        let ns = Namespace::new();
        assert!(matches!(
            ns.create_file(&path("/f")),
            Err(FsError::IllegalState(_))
        ));
        assert!(ns.list(&Path::root()).unwrap().is_empty());
    }

    #[test]
    fn unreachable_server_rolls_back() {
        let ns = Namespace::new();
        let (storage, command) = stubs(1000);
        ns.register(storage, command, Vec::new()).unwrap();

        assert!(matches!(
            ns.create_file(&path("/f")),
            Err(FsError::Rpc(_))
        ));
        assert_eq!(ns.is_directory(&path("/f")), Err(FsError::NotFound(path("/f"))));
    }

    #[test]
    fn registration() {
        let ns = Namespace::new();
        let (s1, c1) = stubs(1000);
        let (s2, c2) = stubs(2000);

        let dup = ns
            .register(s1.clone(), c1.clone(), vec![path("/a/x"), path("/b"), Path::root()])
            .unwrap();
        assert!(dup.is_empty());

        assert_eq!(
            ns.register(s1.clone(), c1.clone(), vec![path("/c")]),
            Err(FsError::AlreadyRegistered(ServerStub::new(s1.clone(), c1).to_string()))
        );
        assert!(ns.is_directory(&path("/c")).is_err());

        let dup = ns
            .register(s2.clone(), c2, vec![path("/a/x"), path("/a/y"), path("/b/z")])
            .unwrap();
        assert_eq!(dup, vec![path("/a/x"), path("/b/z")]);
        assert_eq!(ns.get_storage(&path("/a/x")).unwrap(), s1);
        assert_eq!(ns.get_storage(&path("/a/y")).unwrap(), s2);
        assert_eq!(ns.list(&path("/a")).unwrap(), vec!["x", "y"]);
        assert_eq!(ns.servers().len(), 2);
    }

    #[test]
    fn rejects_unreachable_stubs() {
        let ns = Namespace::new();
        let storage = Stub::new(SocketAddr::from(([0, 0, 0, 0], 5000))).unwrap();
        let (_, command) = stubs(1000);
        assert!(matches!(
            ns.register(storage, command, Vec::new()),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(ns.servers().is_empty());
    }

    #[test]
    fn concurrent_directory_creation() {
        let ns = Arc::new(Namespace::new());
        let racers: Vec<_> = (0..8)
            .map(|_| {
                let ns = ns.clone();
                thread::spawn(move || ns.create_directory(&path("/same")).unwrap())
            })
            .collect();
        let won = racers
            .into_iter()
            .map(|racer| racer.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(won, 1);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let ns = ns.clone();
                thread::spawn(move || {
                    let dir = path(&format!("/same/d{}", i));
                    assert!(ns.create_directory(&dir).unwrap());
                    for j in 0..20 {
                        let child = dir.join(&j.to_string()).unwrap();
                        assert!(ns.create_directory(&child).unwrap());
                    }
                    assert!(ns.delete(&dir).unwrap());
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(ns.list(&path("/same")).unwrap().is_empty());
    }

    #[test]
    fn pending_file_is_invisible() {
        let ns = Arc::new(Namespace::new());
        let (gate, entered, release) = Gate::held();
        let (gate, _endpoint) = register(&ns, gate, Vec::new());
        let create = |ns: &Arc<Namespace>| {
            let ns = ns.clone();
            thread::spawn(move || ns.create_file(&path("/f")))
        };

        let creator = create(&ns);
        entered.recv().unwrap();
        assert_eq!(ns.is_directory(&path("/f")), Err(FsError::NotFound(path("/f"))));
        assert!(ns.list(&Path::root()).unwrap().is_empty());
        assert!(ns.get_storage(&path("/f")).is_err());
        assert_eq!(ns.delete(&path("/f")), Err(FsError::NotFound(path("/f"))));
        assert!(!ns.create_directory(&path("/f")).unwrap());
        assert!(!ns.create_file(&path("/f")).unwrap());

        // refused remotely: the name is free again
        release.send(false).unwrap();
        assert_eq!(creator.join().unwrap(), Ok(false));
        assert_eq!(ns.is_directory(&path("/f")), Err(FsError::NotFound(path("/f"))));

        let creator = create(&ns);
        entered.recv().unwrap();
        release.send(true).unwrap();
        assert_eq!(creator.join().unwrap(), Ok(true));
        assert!(!ns.is_directory(&path("/f")).unwrap());
        assert_eq!(gate.created.lock().unwrap().len(), 2);
        assert!(gate.deleted.lock().unwrap().is_empty());
    }

    #[test]
    fn creation_overtaken_by_delete_leaves_no_copy() {
        let ns = Arc::new(Namespace::new());
        let (gate, entered, release) = Gate::held();
        let (gate, _endpoint) = register(&ns, gate, Vec::new());
        assert!(ns.create_directory(&path("/d")).unwrap());

        let creator = {
            let ns = ns.clone();
            thread::spawn(move || ns.create_file(&path("/d/f")))
        };
        entered.recv().unwrap();
        assert!(ns.delete(&path("/d")).unwrap());
        assert!(ns.create_directory(&path("/d")).unwrap());

        // the remote create succeeds, then its orphan is deleted
        release.send(true).unwrap();
        entered.recv().unwrap();
        release.send(true).unwrap();
        assert_eq!(creator.join().unwrap(), Ok(false));

        assert!(ns.is_directory(&path("/d")).unwrap());
        assert!(ns.list(&path("/d")).unwrap().is_empty());
        assert_eq!(*gate.deleted.lock().unwrap(), vec![path("/d/f")]);
    }

    #[test]
    fn delete_reaches_each_holder_once() {
        let ns = Namespace::new();
        let files = vec![path("/a/x"), path("/a/b/y"), path("/k")];
        let (first, _e1) = register(&ns, Gate::default(), files);
        let (second, _e2) = register(&ns, Gate::default(), vec![path("/a/z")]);

        assert!(ns.delete(&path("/a")).unwrap());
        assert_eq!(*first.deleted.lock().unwrap(), vec![path("/a")]);
        assert_eq!(*second.deleted.lock().unwrap(), vec![path("/a")]);

        assert!(ns.delete(&path("/k")).unwrap());
        assert_eq!(*first.deleted.lock().unwrap(), vec![path("/a"), path("/k")]);
        assert_eq!(second.deleted.lock().unwrap().len(), 1);
        assert!(ns.list(&Path::root()).unwrap().is_empty());
    }

    #[test]
    fn stalled_delete_does_not_block_lookups() {
        let ns = Arc::new(Namespace::new());
        let (gate, entered, release) = Gate::held();
        let (_gate, _endpoint) = register(&ns, gate, vec![path("/a/f")]);
        assert!(ns.create_directory(&path("/other")).unwrap());

        let deleter = {
            let ns = ns.clone();
            thread::spawn(move || ns.delete(&path("/a")))
        };
        entered.recv().unwrap();
        assert!(ns.is_directory(&path("/other")).unwrap());
        assert!(ns.create_directory(&path("/more")).unwrap());
        assert_eq!(ns.is_directory(&path("/a")), Err(FsError::NotFound(path("/a"))));

        release.send(true).unwrap();
        assert_eq!(deleter.join().unwrap(), Ok(true));
    }

    #[test]
    fn create_and_delete_race_on_one_path() {
        let ns = Arc::new(Namespace::new());
        let (gate, _endpoint) = register(&ns, Gate::default(), Vec::new());
        let workers: Vec<_> = (0..6)
            .map(|i| {
                let ns = ns.clone();
                thread::spawn(move || {
                    let file = path("/f");
                    let mut balance = 0i64;
                    for _ in 0..25 {
                        if i % 2 == 0 {
                            if ns.create_file(&file).unwrap() {
                                balance += 1;
                            }
                        } else if ns.delete(&file) == Ok(true) {
                            balance -= 1;
                        }
                    }
                    balance
                })
            })
            .collect();
        let balance: i64 = workers.into_iter().map(|w| w.join().unwrap()).sum();

        match ns.is_directory(&path("/f")) {
            Ok(false) => assert_eq!(balance, 1),
            Err(FsError::NotFound(_)) => assert_eq!(balance, 0),
            other => panic!("unexpected {:?}", other),
        }
        // every successful call reached the storage server exactly once
        let created = gate.created.lock().unwrap().len() as i64;
        let deleted = gate.deleted.lock().unwrap().len() as i64;
        assert_eq!(created - deleted, balance);
    }
}
