use serde::{Deserialize, Serialize};
use std::{fmt, fs, io, path::PathBuf, str::FromStr};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path {0:?} does not start with '/'")]
    Relative(String),
    #[error("path component {0:?} is empty or contains '/' or ':'")]
    Component(String),
    #[error("the root path has no parent or last component")]
    Root,
}

/// Distributed filesystem path.
///
/// An immutable sequence of components; the root is the empty sequence and is
/// written as `/`. Components are never empty and never contain `/` or `:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    components: Vec<String>,
}

fn valid_component(component: &str) -> bool {
    !component.is_empty() && !component.contains('/') && !component.contains(':')
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Appends one component, producing a child path.
    pub fn join(&self, component: &str) -> Result<Self, PathError> {
        if !valid_component(component) {
            return Err(PathError::Component(component.to_string()));
        }
        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(Self { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.components.iter()
    }

    pub fn parent(&self) -> Result<Self, PathError> {
        match self.components.split_last() {
            Some((_, rest)) => Ok(Self {
                components: rest.to_vec(),
            }),
            None => Err(PathError::Root),
        }
    }

    pub fn last(&self) -> Result<&str, PathError> {
        self.components
            .last()
            .map(String::as_str)
            .ok_or(PathError::Root)
    }

    /// Prefix test: `other` is a subpath of `self` if `self` starts with all of
    /// `other`'s components. Every path is a subpath of itself.
    pub fn is_subpath(&self, other: &Path) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Location of this path below a local directory.
    pub fn to_local(&self, root: &std::path::Path) -> PathBuf {
        let mut local = root.to_path_buf();
        local.extend(&self.components);
        local
    }

    /// Lists every regular file below `directory`, relative to it, in lexical
    /// order.
    pub fn list(directory: &std::path::Path) -> io::Result<Vec<Path>> {
        if !fs::metadata(directory)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", directory.display()),
            ));
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(directory).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(directory)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            let mut path = Path::root();
            for component in relative.iter() {
                let component = component.to_str().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{} is not valid unicode", entry.path().display()),
                    )
                })?;
                path = path
                    .join(component)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            }
            paths.push(path);
        }
        paths.sort();
        Ok(paths)
    }
}

impl FromStr for Path {
    type Err = PathError;

    /// Parses a `/`-delimited string. Empty components are dropped; the string
    /// must be absolute and free of `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('/') {
            return Err(PathError::Relative(s.to_string()));
        }
        if s.contains(':') {
            return Err(PathError::Component(s.to_string()));
        }
        let components = s
            .split('/')
            .filter(|component| !component.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { components })
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn string_round_trip() {
        for s in ["/", "/a", "/a/b/c", "/with space/x.txt"] {
            assert_eq!(path(s).to_string(), s);
        }
        assert_eq!(path("//a///b/").to_string(), "/a/b");
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!("a/b".parse::<Path>(), Err(PathError::Relative("a/b".into())));
        assert!("".parse::<Path>().is_err());
        assert!("/a:b".parse::<Path>().is_err());
        let root = Path::root();
        assert!(root.join("").is_err());
        assert!(root.join("a/b").is_err());
        assert!(root.join("a:b").is_err());
    }

    #[test]
    fn parent_and_last() {
        assert_eq!(Path::root().parent(), Err(PathError::Root));
        assert_eq!(Path::root().last(), Err(PathError::Root));
        let p = path("/a/b/c");
        assert_eq!(p.parent().unwrap(), path("/a/b"));
        assert_eq!(p.last().unwrap(), "c");
        assert_eq!(path("/a").parent().unwrap(), Path::root());
        assert_eq!(p.parent().unwrap().join("c").unwrap(), p);
    }

    #[test]
    fn subpath() {
        let p = path("/a/b");
        assert!(p.is_subpath(&p));
        assert!(p.is_subpath(&path("/a")));
        assert!(p.is_subpath(&Path::root()));
        assert!(!p.is_subpath(&path("/a/b/c")));
        assert!(!path("/ab").is_subpath(&path("/a")));
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(path("/a/b"), Path::root().join("a").unwrap().join("b").unwrap());
        let p = path("/x/y");
        let collected: Vec<&str> = p.iter().map(String::as_str).collect();
        assert_eq!(collected, vec!["x", "y"]);
    }

    #[test]
    fn list_local_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/c")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("b/c/f"), b"1").unwrap();
        fs::write(dir.path().join("a"), b"2").unwrap();
        let listed = Path::list(dir.path()).unwrap();
        assert_eq!(listed, vec![path("/a"), path("/b/c/f")]);

        assert!(Path::list(&dir.path().join("missing")).is_err());
        assert!(Path::list(&dir.path().join("a")).is_err());
        assert_eq!(path("/b/c/f").to_local(dir.path()), dir.path().join("b/c/f"));
    }
}
