use super::ServerStub;
use crate::error::FsError;
use crate::path::Path;
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Storage servers holding one file, handed out round-robin.
#[derive(Debug)]
pub struct Replicas {
    locations: Vec<ServerStub>,
    cursor: AtomicUsize,
}

impl Replicas {
    fn new(location: ServerStub) -> Self {
        Self {
            locations: vec![location],
            cursor: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> &ServerStub {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.locations[index % self.locations.len()]
    }
}

#[derive(Debug)]
enum Node {
    Directory(BTreeMap<String, Node>),
    File(Replicas),
    /// A file whose storage server has not confirmed its creation yet.
    /// Reserves the name but is invisible to lookups.
    Pending(Reservation),
}

/// Claim on a pending file, handed to the creator to commit or abandon it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    location: ServerStub,
    serial: u64,
}

impl Reservation {
    pub fn location(&self) -> &ServerStub {
        &self.location
    }
}

impl Node {
    fn directory() -> Self {
        Node::Directory(BTreeMap::new())
    }

    // Every distinct location holding a file at or below this node.
    fn collect_locations(&self, out: &mut Vec<ServerStub>) {
        match self {
            Node::File(replicas) => {
                for location in &replicas.locations {
                    if !out.contains(location) {
                        out.push(location.clone());
                    }
                }
            }
            Node::Directory(children) => {
                for child in children.values() {
                    child.collect_locations(out);
                }
            }
            Node::Pending(_) => {}
        }
    }

    fn is_visible(&self) -> bool {
        !matches!(self, Node::Pending(_))
    }
}

/// In-memory directory tree of the naming server.
///
/// Each operation walks from the root. Every component but the last must name
/// an existing directory, otherwise the operation fails with `NotFound`.
#[derive(Debug, Default)]
pub struct DirectoryTree {
    root: BTreeMap<String, Node>,
    reservations: u64,
}

impl DirectoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory containing the last component of `path`, which must not be
    /// the root.
    fn parent<'p>(&self, path: &'p Path) -> Result<(&BTreeMap<String, Node>, &'p str), FsError> {
        let (last, intermediate) = path
            .components()
            .split_last()
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        let mut dir = &self.root;
        for name in intermediate {
            dir = match dir.get(name) {
                Some(Node::Directory(children)) => children,
                _ => return Err(FsError::NotFound(path.clone())),
            };
        }
        Ok((dir, last))
    }

    fn parent_mut<'p>(
        &mut self,
        path: &'p Path,
    ) -> Result<(&mut BTreeMap<String, Node>, &'p str), FsError> {
        let (last, intermediate) = path
            .components()
            .split_last()
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        let mut dir = &mut self.root;
        for name in intermediate {
            dir = match dir.get_mut(name) {
                Some(Node::Directory(children)) => children,
                _ => return Err(FsError::NotFound(path.clone())),
            };
        }
        Ok((dir, last))
    }

    pub fn is_directory(&self, path: &Path) -> Result<bool, FsError> {
        if path.is_root() {
            return Ok(true);
        }
        let (dir, last) = self.parent(path)?;
        match dir.get(last) {
            Some(Node::Directory(_)) => Ok(true),
            Some(Node::File(_)) => Ok(false),
            Some(Node::Pending(_)) | None => Err(FsError::NotFound(path.clone())),
        }
    }

    /// Entry names of a directory, in lexical order.
    pub fn list(&self, directory: &Path) -> Result<Vec<String>, FsError> {
        let children = if directory.is_root() {
            &self.root
        } else {
            let (dir, last) = self.parent(directory)?;
            match dir.get(last) {
                Some(Node::Directory(children)) => children,
                _ => return Err(FsError::NotFound(directory.clone())),
            }
        };
        Ok(children
            .iter()
            .filter(|(_, node)| node.is_visible())
            .map(|(name, _)| name.clone())
            .collect())
    }

    pub fn create_directory(&mut self, directory: &Path) -> Result<bool, FsError> {
        self.insert(directory, Node::directory())
    }

    pub fn create_file(&mut self, file: &Path, location: ServerStub) -> Result<bool, FsError> {
        self.insert(file, Node::File(Replicas::new(location)))
    }

    /// Reserves `file` for a file about to be created on `location`. The name
    /// counts as taken but lookups report it missing until [`commit`] is
    /// called. `None` if the name is already taken.
    ///
    /// [`commit`]: DirectoryTree::commit
    pub fn reserve(
        &mut self,
        file: &Path,
        location: ServerStub,
    ) -> Result<Option<Reservation>, FsError> {
        self.reservations += 1;
        let reservation = Reservation {
            location,
            serial: self.reservations,
        };
        let inserted = self.insert(file, Node::Pending(reservation.clone()))?;
        Ok(inserted.then_some(reservation))
    }

    /// Turns a reservation into a visible file. `false` if the reservation is
    /// gone, e.g. because an ancestor was deleted meanwhile.
    pub fn commit(&mut self, file: &Path, reservation: &Reservation) -> bool {
        match self.reserved(file, reservation) {
            Some(node) => {
                *node = Node::File(Replicas::new(reservation.location.clone()));
                true
            }
            None => false,
        }
    }

    /// Drops a reservation. Whatever else now lives at `file` is left alone.
    pub fn abandon(&mut self, file: &Path, reservation: &Reservation) -> bool {
        if self.reserved(file, reservation).is_none() {
            return false;
        }
        self.detach(file).is_ok()
    }

    fn reserved(&mut self, file: &Path, reservation: &Reservation) -> Option<&mut Node> {
        let (dir, last) = self.parent_mut(file).ok()?;
        dir.get_mut(last)
            .filter(|node| matches!(node, Node::Pending(held) if held == reservation))
    }

    fn insert(&mut self, path: &Path, node: Node) -> Result<bool, FsError> {
        if path.is_root() {
            return Ok(false);
        }
        let (dir, last) = self.parent_mut(path)?;
        match dir.entry(last.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(node);
                Ok(true)
            }
        }
    }

    /// Adds a file reported by a registering storage server, creating missing
    /// directories on the way. Returns `false` if something already exists at
    /// `file` or one of its ancestors is a file; the file is then left alone.
    pub fn create_file_recursive(&mut self, file: &Path, location: ServerStub) -> bool {
        let (last, intermediate) = match file.components().split_last() {
            Some(split) => split,
            None => return false,
        };
        let mut dir = &mut self.root;
        for name in intermediate {
            dir = match dir.entry(name.clone()).or_insert_with(Node::directory) {
                Node::Directory(children) => children,
                Node::File(_) | Node::Pending(_) => return false,
            };
        }
        match dir.entry(last.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Node::File(Replicas::new(location)));
                true
            }
        }
    }

    /// Removes `path` and everything below it. Returns every distinct storage
    /// server holding a file in the removed subtree; the caller tells each of
    /// them to delete `path`.
    pub fn delete(&mut self, path: &Path) -> Result<Vec<ServerStub>, FsError> {
        let locations = {
            let (dir, last) = self.parent(path)?;
            let node = dir
                .get(last)
                .filter(|node| node.is_visible())
                .ok_or_else(|| FsError::NotFound(path.clone()))?;
            let mut locations = Vec::new();
            node.collect_locations(&mut locations);
            locations
        };
        self.detach(path)?;
        Ok(locations)
    }

    fn detach(&mut self, path: &Path) -> Result<(), FsError> {
        let (dir, last) = self.parent_mut(path)?;
        dir.remove(last)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(path.clone()))
    }

    /// Next storage server, in round-robin order, holding `file`.
    pub fn get_storage(&self, file: &Path) -> Result<ServerStub, FsError> {
        let (dir, last) = self.parent(file)?;
        match dir.get(last) {
            Some(Node::File(replicas)) => Ok(replicas.next().clone()),
            _ => Err(FsError::NotFound(file.clone())),
        }
    }
}
