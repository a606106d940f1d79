use crate::fs::{BlockNumber, FsError, Result, ROOT_BLOCK};
use crate::io::Region;
use crate::node::{Directory, Kind};
use crate::store::BlockStore;

use log::debug;

/// Walks the directory tree from the root block.
///
/// Paths are slash separated and always resolved from the root, so a leading
/// slash is optional and repeated slashes are ignored. `.` and `..` are looked
/// up like any other entry, which makes them navigate to self and parent.
pub struct Resolver<'a, R: Region> {
    store: &'a BlockStore<R>,
}

impl<'a, R: Region> Resolver<'a, R> {
    pub fn new(store: &'a BlockStore<R>) -> Self {
        Self { store }
    }

    /// Resolves every component but the last and returns the directory that
    /// would hold the last one, together with its name. Used by operations
    /// that add or remove an entry.
    ///
    /// # Errors
    ///
    /// The path must name something below the root, and the final component
    /// may not be `.` or `..`.
    pub fn parent<'p>(&self, path: &'p str) -> Result<(BlockNumber, &'p str)> {
        let parts = components(path)?;
        let (name, dirs) = parts
            .split_last()
            .ok_or_else(|| FsError::InvalidPath(format!("{:?} has no final component", path)))?;
        if *name == "." || *name == ".." {
            return Err(FsError::InvalidPath(format!(
                "{:?} ends in a self or parent link",
                path
            )));
        }
        let parent = self.walk(dirs)?;
        Ok((parent, *name))
    }

    /// Resolves the whole path to the block it designates. The empty path and
    /// `/` resolve to the root directory.
    pub fn target(&self, path: &str) -> Result<BlockNumber> {
        let parts = components(path)?;
        match parts.split_last() {
            None => Ok(ROOT_BLOCK),
            Some((name, dirs)) => {
                let parent = self.walk(dirs)?;
                self.lookup(parent, name)
            }
        }
    }

    /// Finds `name` among the valid entries of directory `dir`.
    pub fn lookup(&self, dir: BlockNumber, name: &str) -> Result<BlockNumber> {
        self.store
            .view::<Directory>(dir)?
            .find(name.as_bytes())
            .map(|(_, entry)| entry.block())
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Descends through `dirs`, requiring each one to be a directory.
    fn walk(&self, dirs: &[&str]) -> Result<BlockNumber> {
        let mut current = ROOT_BLOCK;
        for name in dirs {
            let next = self.lookup(current, name)?;
            if self.store.kind_of(next)? != Kind::Directory {
                return Err(FsError::NotADirectory(name.to_string()));
            }
            debug!("resolved {:?} in block {} to block {}", name, current, next);
            current = next;
        }
        Ok(current)
    }
}

/// Splits a path into its non-empty components.
fn components(path: &str) -> Result<Vec<&str>> {
    if path.contains('\0') {
        return Err(FsError::InvalidPath(format!("{:?} contains a NUL byte", path)));
    }
    Ok(path.split('/').filter(|part| !part.is_empty()).collect())
}
