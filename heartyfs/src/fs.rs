use crate::alloc::State;
use crate::io::Region;
use crate::node::{encode_name, Directory, Inode, Kind, NAME_LEN};
use crate::path::Resolver;
use crate::store::BlockStore;

use log::info;
use thiserror::Error;

/// The block number to access ranging from 0 (the first block) to n - 1 (the
/// last block) where n is number of blocks in the image.
pub type BlockNumber = usize;

pub const BLOCK_SIZE: usize = 512;
/// A 1 MiB image.
pub const DEFAULT_BLOCKS: usize = 2048;
/// Root, bitmap and at least one allocatable block.
pub const MIN_BLOCKS: usize = 3;
/// Everything a single bitmap block can track.
pub const MAX_BLOCKS: usize = BLOCK_SIZE * 8;

/// Known locations.
pub const ROOT_BLOCK: BlockNumber = 0;
pub const BITMAP_BLOCK: BlockNumber = 1;
pub const FIRST_FREE_BLOCK: BlockNumber = 2;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("directory has no free entries")]
    DirectoryFull,
    #[error("no free blocks left in the image")]
    OutOfSpace,
    #[error("file needs more data blocks than an inode can hold")]
    TooLarge,
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("block {0} is outside the image")]
    OutOfRange(BlockNumber),
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Geometry of an image. The block size is fixed, the number of blocks is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    pub block_count: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCKS,
        }
    }
}

impl FsConfig {
    pub fn with_block_count(mut self, block_count: usize) -> Self {
        self.block_count = block_count;
        self
    }

    /// Checks the block count against what one bitmap block can track.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCKS..=MAX_BLOCKS).contains(&self.block_count) {
            return Err(FsError::InvalidConfig(format!(
                "block count {} outside {}..={}",
                self.block_count, MIN_BLOCKS, MAX_BLOCKS
            )));
        }
        Ok(())
    }

    /// Total image size in bytes.
    pub fn image_len(&self) -> usize {
        self.block_count * BLOCK_SIZE
    }
}

/// What `stat` reports about a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub block: BlockNumber,
    pub kind: Kind,
    pub name: String,
    /// Bytes for a file, valid entries (including `.` and `..`) for a
    /// directory.
    pub size: usize,
}

/// A listed directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub block: BlockNumber,
    pub kind: Kind,
}

/// A hierarchical filesystem living in a flat image of fixed-size blocks.
///
/// # Layout
/// ==============================================================
/// | Root directory | Bitmap | Directories, inodes, data blocks |
/// ==============================================================
///
/// Every operation mutates the image in place and flushes before returning.
/// Nothing here is reentrant: callers must not run two mutating operations
/// against the same image at once.
pub struct HeartyFs<R: Region> {
    pub(crate) store: BlockStore<R>,
}

impl<R: Region> HeartyFs<R> {
    /// Initializes a fresh filesystem onto `region`, discarding whatever the
    /// region held before.
    pub fn format(region: R, config: FsConfig) -> Result<Self> {
        let mut store = BlockStore::new(region, config.block_count)?;
        store.clear();
        *store.view_mut::<Directory>(ROOT_BLOCK)? = Directory::root();
        store.reserve_fixed_blocks()?;
        store.flush()?;
        info!("formatted image with {} blocks", config.block_count);
        Ok(Self { store })
    }

    /// Opens a previously formatted image.
    ///
    /// # Errors
    ///
    /// Fails with `CorruptImage` if block 0 is not the root directory or the
    /// bitmap does not reserve blocks 0 and 1.
    pub fn open(region: R, config: FsConfig) -> Result<Self> {
        let store = BlockStore::new(region, config.block_count)?;
        if store.kind_of(ROOT_BLOCK)? != Kind::Directory
            || store.view::<Directory>(ROOT_BLOCK)?.name() != b"/"
        {
            return Err(FsError::CorruptImage(
                "block 0 does not hold the root directory".to_string(),
            ));
        }
        let bitmap = store.bitmap()?;
        if (ROOT_BLOCK..FIRST_FREE_BLOCK).any(|b| bitmap.get(b) == State::Free) {
            return Err(FsError::CorruptImage(
                "bitmap does not reserve the root and bitmap blocks".to_string(),
            ));
        }
        Ok(Self { store })
    }

    /// Creates an empty regular file and returns its inode block.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyExists` if the name is taken and `DirectoryFull` if
    /// the parent has no free slot.
    pub fn create_file(&mut self, path: &str) -> Result<BlockNumber> {
        let (parent, name) = Resolver::new(&self.store).parent(path)?;
        let field = encode_name(name)?;
        self.check_insertable(parent, name)?;

        let block = self.store.allocate()?;
        *self.store.view_mut::<Inode>(block)? = Inode::new(field);
        self.link(parent, block, field)?;
        self.store.flush()?;
        info!("created file {:?} at block {}", path, block);
        Ok(block)
    }

    /// Creates an empty directory and returns its block.
    pub fn make_directory(&mut self, path: &str) -> Result<BlockNumber> {
        let (parent, name) = Resolver::new(&self.store).parent(path)?;
        let field = encode_name(name)?;
        self.check_insertable(parent, name)?;

        let block = self.store.allocate()?;
        *self.store.view_mut::<Directory>(block)? = Directory::new(field, block, parent);
        self.link(parent, block, field)?;
        self.store.flush()?;
        info!("created directory {:?} at block {}", path, block);
        Ok(block)
    }

    /// Removes a directory holding nothing but `.` and `..`.
    ///
    /// # Errors
    ///
    /// Fails with `NotEmpty` if anything else remains and `NotADirectory` if
    /// the path names a file.
    pub fn remove_directory(&mut self, path: &str) -> Result<()> {
        let (parent, name) = Resolver::new(&self.store).parent(path)?;
        let (slot, target) = self.entry(parent, name)?;
        if self.store.kind_of(target)? != Kind::Directory {
            return Err(FsError::NotADirectory(name.to_string()));
        }
        if target == ROOT_BLOCK || target == parent {
            return Err(FsError::InvalidPath(format!("{:?} links back up the tree", path)));
        }
        if !self.store.view::<Directory>(target)?.is_empty() {
            return Err(FsError::NotEmpty(name.to_string()));
        }

        self.store.release(target)?;
        self.store.view_mut::<Directory>(parent)?.remove(slot);
        self.store.flush()?;
        info!("removed directory {:?} from block {}", path, target);
        Ok(())
    }

    /// Removes a regular file together with every data block it owns.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let (parent, name) = Resolver::new(&self.store).parent(path)?;
        let (slot, target) = self.entry(parent, name)?;
        if self.store.kind_of(target)? != Kind::File {
            return Err(FsError::NotAFile(name.to_string()));
        }

        self.release_file(target)?;
        self.store.view_mut::<Directory>(parent)?.remove(slot);
        self.store.flush()?;
        info!("removed file {:?} from block {}", path, target);
        Ok(())
    }

    /// Resolves a path to the block it designates.
    pub fn resolve(&self, path: &str) -> Result<BlockNumber> {
        Resolver::new(&self.store).target(path)
    }

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let block = self.resolve(path)?;
        let kind = self.store.kind_of(block)?;
        let (name, size) = match kind {
            Kind::Directory => {
                let dir = self.store.view::<Directory>(block)?;
                (String::from_utf8_lossy(dir.name()).into_owned(), dir.len())
            }
            Kind::File => {
                let node = self.store.view::<Inode>(block)?;
                (String::from_utf8_lossy(node.name()).into_owned(), node.size())
            }
        };
        Ok(Metadata {
            block,
            kind,
            name,
            size,
        })
    }

    /// Lists a directory's entries, leaving out `.` and `..`.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let block = self.resolve(path)?;
        if self.store.kind_of(block)? != Kind::Directory {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        self.store
            .view::<Directory>(block)?
            .entries()
            .filter(|(_, e)| !e.is_dot())
            .map(|(_, e)| {
                Ok(DirEntryInfo {
                    name: String::from_utf8_lossy(e.name()).into_owned(),
                    block: e.block(),
                    kind: self.store.kind_of(e.block())?,
                })
            })
            .collect()
    }

    /// Number of blocks still available for allocation.
    pub fn free_blocks(&self) -> Result<usize> {
        self.store.free_blocks()
    }

    pub fn block_count(&self) -> usize {
        self.store.block_count()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    /// Gives the backing region back to the caller.
    pub fn into_region(self) -> R {
        self.store.into_region()
    }

    /// The slot and block of `name` inside directory `parent`.
    pub(crate) fn entry(&self, parent: BlockNumber, name: &str) -> Result<(usize, BlockNumber)> {
        self.store
            .view::<Directory>(parent)?
            .find(name.as_bytes())
            .map(|(slot, e)| (slot, e.block()))
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    pub(crate) fn check_insertable(&self, parent: BlockNumber, name: &str) -> Result<()> {
        let dir = self.store.view::<Directory>(parent)?;
        if dir.find(name.as_bytes()).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        if dir.is_full() {
            return Err(FsError::DirectoryFull);
        }
        Ok(())
    }

    /// Adds `block` to `parent`, handing the block back if that fails.
    pub(crate) fn link(
        &mut self,
        parent: BlockNumber,
        block: BlockNumber,
        name: [u8; NAME_LEN],
    ) -> Result<()> {
        if let Err(err) = self.store.view_mut::<Directory>(parent)?.insert(block, name) {
            self.store.release(block)?;
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileRegion, FileRegionBuilder, MemoryRegion};
    use crate::node::DIR_ENTRIES;

    fn create_test_fs() -> HeartyFs<MemoryRegion> {
        let config = FsConfig::default().with_block_count(64);
        HeartyFs::format(MemoryRegion::new(config.image_len()), config).unwrap()
    }

    #[test]
    fn root_dir_resolves_to_block_zero() {
        let fs = create_test_fs();
        assert_eq!(fs.resolve("/").unwrap(), ROOT_BLOCK);
        let meta = fs.stat("/").unwrap();
        assert_eq!(meta.kind, Kind::Directory);
        assert_eq!(meta.name, "/");
        assert_eq!(meta.size, 2);
    }

    #[test]
    fn formatted_image_reserves_root_and_bitmap() {
        let fs = create_test_fs();
        assert_eq!(fs.free_blocks().unwrap(), 62);
    }

    #[test]
    fn file_not_found_returns_error() {
        let fs = create_test_fs();
        match fs.resolve("/foo").unwrap_err() {
            FsError::NotFound(_) => (),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn created_file_is_listed_in_parent() {
        let mut fs = create_test_fs();
        let block = fs.create_file("/foo").unwrap();
        assert_eq!(block, FIRST_FREE_BLOCK);

        let listing = fs.read_dir("/").unwrap();
        assert_eq!(
            listing,
            vec![DirEntryInfo {
                name: "foo".to_string(),
                block,
                kind: Kind::File,
            }]
        );
        assert_eq!(fs.stat("/foo").unwrap().size, 0);
        assert_eq!(fs.stat("/").unwrap().size, 3);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fs = create_test_fs();
        fs.create_file("/foo").unwrap();
        let free = fs.free_blocks().unwrap();
        assert!(matches!(fs.create_file("/foo"), Err(FsError::AlreadyExists(_))));
        assert!(matches!(fs.make_directory("/foo"), Err(FsError::AlreadyExists(_))));
        assert_eq!(fs.free_blocks().unwrap(), free);
    }

    #[test]
    fn overlong_names_are_rejected() {
        let mut fs = create_test_fs();
        let path = format!("/{}", "n".repeat(28));
        assert!(matches!(fs.create_file(&path), Err(FsError::InvalidPath(_))));
        assert_eq!(fs.read_dir("/").unwrap().len(), 0);
    }

    #[test]
    fn new_directory_links_to_parent() {
        let mut fs = create_test_fs();
        let a = fs.make_directory("/a").unwrap();
        let b = fs.make_directory("/a/b").unwrap();
        assert_eq!(fs.resolve("/a/b/..").unwrap(), a);
        assert_eq!(fs.resolve("/a/b/.").unwrap(), b);
        assert_eq!(fs.stat("/a").unwrap().size, 3);
    }

    #[test]
    fn full_directory_rejects_new_entries() {
        let mut fs = create_test_fs();
        fs.make_directory("/d").unwrap();
        for i in 0..DIR_ENTRIES - 2 {
            fs.create_file(&format!("/d/f{}", i)).unwrap();
        }
        let free = fs.free_blocks().unwrap();
        assert!(matches!(fs.create_file("/d/extra"), Err(FsError::DirectoryFull)));
        assert!(matches!(fs.make_directory("/d/extra"), Err(FsError::DirectoryFull)));
        assert_eq!(fs.stat("/d").unwrap().size, DIR_ENTRIES);
        assert_eq!(fs.free_blocks().unwrap(), free);
    }

    #[test]
    fn remove_directory_requires_empty_directory() {
        let mut fs = create_test_fs();
        fs.make_directory("/a").unwrap();
        fs.create_file("/a/f").unwrap();

        match fs.remove_directory("/a") {
            Err(FsError::NotEmpty(name)) => assert_eq!(name, "a"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(fs.resolve("/a/f").is_ok());

        fs.remove_file("/a/f").unwrap();
        fs.remove_directory("/a").unwrap();
        assert!(fs.read_dir("/").unwrap().is_empty());
        assert_eq!(fs.free_blocks().unwrap(), 62);
    }

    #[test]
    fn remove_checks_target_kind() {
        let mut fs = create_test_fs();
        fs.make_directory("/a").unwrap();
        fs.create_file("/f").unwrap();
        assert!(matches!(fs.remove_file("/a"), Err(FsError::NotAFile(_))));
        assert!(matches!(fs.remove_directory("/f"), Err(FsError::NotADirectory(_))));
        assert!(matches!(fs.remove_directory("/"), Err(FsError::InvalidPath(_))));
        assert!(matches!(fs.remove_file("/missing"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn read_dir_on_file_is_not_a_directory() {
        let mut fs = create_test_fs();
        fs.create_file("/f").unwrap();
        assert!(matches!(fs.read_dir("/f"), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn can_create_and_reopen_initialized_filesystem() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let config = FsConfig::default().with_block_count(64);
        let region = FileRegionBuilder::from(disk.reopen().unwrap())
            .with_block_count(64)
            .build()
            .unwrap();
        let mut fs = HeartyFs::format(region, config).unwrap();
        fs.make_directory("/etc").unwrap();

        let region = FileRegion::open(disk.path(), 64).unwrap();
        let fs: HeartyFs<FileRegion> = HeartyFs::open(region, config).unwrap();
        assert_eq!(fs.read_dir("/").unwrap()[0].name, "etc");
    }

    #[test]
    fn staged_memory_image_reopens() {
        let mut fs = create_test_fs();
        fs.make_directory("/staged").unwrap();
        let image = fs.into_region().into_inner();

        let config = FsConfig::default().with_block_count(64);
        let fs = HeartyFs::open(MemoryRegion::from(image), config).unwrap();
        assert_eq!(fs.stat("/staged").unwrap().kind, Kind::Directory);
        assert_eq!(fs.free_blocks().unwrap(), 61);
    }

    #[test]
    fn unformatted_image_is_rejected() {
        let config = FsConfig::default().with_block_count(64);
        let result = HeartyFs::open(MemoryRegion::new(config.image_len()), config);
        assert!(matches!(result, Err(FsError::CorruptImage(_))));
    }
}
