use std::collections::HashSet;
use std::fmt::Write;

use crate::fs::{BlockNumber, FsError, HeartyFs, Result, FIRST_FREE_BLOCK, ROOT_BLOCK};
use crate::io::Region;
use crate::node::{DataBlock, Directory, Inode, Kind, DATA_CAPACITY};
use crate::store::BlockStore;

use log::warn;

/// How deep `list_tree` descends before cutting a branch off.
pub const MAX_DEPTH: usize = 10;

/// One entry reached while walking the tree.
struct Visit<'a> {
    depth: usize,
    block: BlockNumber,
    kind: Kind,
    name: &'a [u8],
}

/// Depth-first walk below `dir`, skipping `.` and `..`. Directories at
/// `max_depth` are reported but not entered, so a corrupted tree whose links
/// form a cycle still terminates.
fn walk<R, F>(
    store: &BlockStore<R>,
    dir: BlockNumber,
    depth: usize,
    max_depth: usize,
    visit: &mut F,
) -> Result<()>
where
    R: Region,
    F: FnMut(&Visit<'_>) -> Result<()>,
{
    for (_, entry) in store.view::<Directory>(dir)?.entries() {
        if entry.is_dot() {
            continue;
        }
        let kind = store.kind_of(entry.block())?;
        visit(&Visit {
            depth,
            block: entry.block(),
            kind,
            name: entry.name(),
        })?;
        if kind == Kind::Directory && depth + 1 < max_depth {
            walk(store, entry.block(), depth + 1, max_depth, visit)?;
        }
    }
    Ok(())
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Directories, inodes and data blocks reachable from the root, plus the
    /// two reserved blocks.
    pub reachable: usize,
    /// Blocks marked used in the bitmap that nothing references, typically
    /// left behind by an interrupted write.
    pub leaked: Vec<BlockNumber>,
}

impl<R: Region> HeartyFs<R> {
    /// Renders the directory tree, one entry per line, indented two spaces
    /// per level. Directories end in `/`, files show their size.
    pub fn list_tree(&self) -> Result<String> {
        let mut out = String::from("/\n");
        walk(&self.store, ROOT_BLOCK, 0, MAX_DEPTH, &mut |v: &Visit<'_>| -> Result<()> {
            let indent = "  ".repeat(v.depth + 1);
            let name = String::from_utf8_lossy(v.name);
            match v.kind {
                Kind::Directory => writeln!(out, "{}{}/", indent, name),
                Kind::File => writeln!(
                    out,
                    "{}{} ({} bytes)",
                    indent,
                    name,
                    self.store.view::<Inode>(v.block)?.size()
                ),
            }
            .ok();
            Ok(())
        })?;
        Ok(out)
    }

    /// Walks the whole tree and verifies that every block is owned at most
    /// once, directory sizes and links are consistent and every file's data
    /// covers its declared size.
    ///
    /// # Errors
    ///
    /// Returns `CorruptImage` describing the first violation found. Leaked
    /// blocks are not an error, they are listed in the report.
    pub fn check(&self) -> Result<CheckReport> {
        let store = &self.store;
        let mut owned: HashSet<BlockNumber> = (ROOT_BLOCK..FIRST_FREE_BLOCK).collect();

        let mut claim = |block: BlockNumber| -> Result<()> {
            if !store.is_allocated(block)? || !owned.insert(block) {
                return Err(FsError::CorruptImage(format!(
                    "block {} is free or owned twice",
                    block
                )));
            }
            Ok(())
        };

        // (directory, its parent) pairs still to scan. The ownership set
        // rejects a directory reached twice, so cycles cannot loop.
        let mut pending = vec![(ROOT_BLOCK, ROOT_BLOCK)];
        while let Some((dir, parent)) = pending.pop() {
            check_directory(store, dir, parent)?;
            for (_, entry) in store.view::<Directory>(dir)?.entries() {
                if entry.is_dot() {
                    continue;
                }
                let block = entry.block();
                claim(block)?;
                match store.kind_of(block)? {
                    Kind::Directory => pending.push((block, dir)),
                    Kind::File => check_file(store, block, &mut claim)?,
                }
            }
        }

        let leaked: Vec<BlockNumber> = (FIRST_FREE_BLOCK..store.block_count())
            .filter(|&b| store.is_allocated(b).unwrap_or(false) && !owned.contains(&b))
            .collect();
        if !leaked.is_empty() {
            warn!("{} allocated blocks are unreachable", leaked.len());
        }
        Ok(CheckReport {
            reachable: owned.len(),
            leaked,
        })
    }
}

/// Claims the data blocks of `inode` and verifies they cover its size.
fn check_file<R, F>(store: &BlockStore<R>, inode: BlockNumber, claim: &mut F) -> Result<()>
where
    R: Region,
    F: FnMut(BlockNumber) -> Result<()>,
{
    let node = store.view::<Inode>(inode)?;
    let mut available = 0;
    for data in node.blocks() {
        claim(data)?;
        let len = store.view::<DataBlock>(data)?.len();
        if len > DATA_CAPACITY {
            return Err(FsError::CorruptImage(format!(
                "data block {} overflows its payload",
                data
            )));
        }
        available += len;
    }
    if available < node.size() {
        return Err(FsError::CorruptImage(format!(
            "inode {} declares {} bytes but holds {}",
            inode,
            node.size(),
            available
        )));
    }
    Ok(())
}

fn check_directory<R: Region>(
    store: &BlockStore<R>,
    block: BlockNumber,
    parent: BlockNumber,
) -> Result<()> {
    let dir = store.view::<Directory>(block)?;
    if dir.self_block() != block || dir.parent_block() != parent {
        return Err(FsError::CorruptImage(format!(
            "directory {} links to {} and {}, expected {} and {}",
            block,
            dir.self_block(),
            dir.parent_block(),
            block,
            parent
        )));
    }
    let valid = dir.entries().count();
    if valid != dir.len() {
        return Err(FsError::CorruptImage(format!(
            "directory {} records {} entries but holds {}",
            block,
            dir.len(),
            valid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsConfig, MAX_BLOCKS};
    use crate::io::MemoryRegion;
    use crate::node::encode_name;

    fn create_test_fs() -> HeartyFs<MemoryRegion> {
        let config = FsConfig::default().with_block_count(128);
        HeartyFs::format(MemoryRegion::new(config.image_len()), config).unwrap()
    }

    #[test]
    fn empty_tree_lists_only_root() {
        let fs = create_test_fs();
        assert_eq!(fs.list_tree().unwrap(), "/\n");
    }

    #[test]
    fn tree_shows_nesting_and_sizes() {
        let mut fs = create_test_fs();
        fs.make_directory("/a").unwrap();
        fs.make_directory("/a/b").unwrap();
        fs.write_file("/a/b/notes", b"twelve bytes").unwrap();
        fs.create_file("/top").unwrap();

        let expected = "/\n  a/\n    b/\n      notes (12 bytes)\n  top (0 bytes)\n";
        assert_eq!(fs.list_tree().unwrap(), expected);
    }

    #[test]
    fn deep_trees_are_cut_off() {
        let mut fs = create_test_fs();
        let mut path = String::new();
        for _ in 0..MAX_DEPTH + 2 {
            path.push_str("/d");
            fs.make_directory(&path).unwrap();
        }
        let listing = fs.list_tree().unwrap();
        assert_eq!(listing.lines().count(), 1 + MAX_DEPTH);
    }

    #[test]
    fn consistent_image_passes_check() {
        let mut fs = create_test_fs();
        fs.make_directory("/a").unwrap();
        fs.write_file("/a/f", &[7; 3 * DATA_CAPACITY]).unwrap();
        fs.create_file("/g").unwrap();

        let report = fs.check().unwrap();
        // Root, bitmap, /a, /a/f with three data blocks, /g.
        assert_eq!(report.reachable, 2 + 1 + 4 + 1);
        assert!(report.leaked.is_empty());
        assert_eq!(
            report.reachable,
            fs.block_count() - fs.free_blocks().unwrap()
        );
    }

    #[test]
    fn unreferenced_allocation_is_reported_as_leak() {
        let mut fs = create_test_fs();
        let stray = fs.store.allocate().unwrap();
        let report = fs.check().unwrap();
        assert_eq!(report.leaked, vec![stray]);
    }

    #[test]
    fn shared_block_is_corruption() {
        let mut fs = create_test_fs();
        let a = fs.make_directory("/a").unwrap();
        fs.store
            .view_mut::<Directory>(ROOT_BLOCK)
            .unwrap()
            .insert(a, encode_name("alias").unwrap())
            .unwrap();
        assert!(matches!(fs.check(), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn wrong_entry_count_is_corruption() {
        let mut fs = create_test_fs();
        fs.make_directory("/a").unwrap();
        // The entry count sits right after the type tag and the name.
        let size_field = 4 + crate::node::NAME_LEN;
        let raw = fs.store.block_at_mut(ROOT_BLOCK).unwrap();
        assert_eq!(raw[size_field], 3);
        raw[size_field] = 5;
        assert!(matches!(fs.check(), Err(FsError::CorruptImage(_))));
    }

    #[test]
    fn check_walks_chain_as_deep_as_the_image_allows() {
        let config = FsConfig::default().with_block_count(MAX_BLOCKS);
        let mut fs = HeartyFs::format(MemoryRegion::new(config.image_len()), config).unwrap();
        let name = encode_name("d").unwrap();
        let mut parent = ROOT_BLOCK;
        for _ in 0..4000 {
            let block = fs.store.allocate().unwrap();
            *fs.store.view_mut::<Directory>(block).unwrap() = Directory::new(name, block, parent);
            fs.store
                .view_mut::<Directory>(parent)
                .unwrap()
                .insert(block, name)
                .unwrap();
            parent = block;
        }

        let report = fs.check().unwrap();
        assert_eq!(report.reachable, 2 + 4000);
        assert!(report.leaked.is_empty());
        assert_eq!(fs.list_tree().unwrap().lines().count(), 1 + MAX_DEPTH);
    }
}
