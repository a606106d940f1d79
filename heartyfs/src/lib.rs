//! A small hierarchical filesystem kept in a single flat image of 512 byte
//! blocks.
//!
//! Block 0 holds the root directory, block 1 the allocation bitmap and every
//! other block is a directory, a file inode or a chunk of file data. The image
//! is edited in place through a [`Region`](io::Region) and flushed after each
//! operation.
//!
//! ```
//! use heartyfs::io::MemoryRegion;
//! use heartyfs::{FsConfig, HeartyFs};
//!
//! let config = FsConfig::default();
//! let mut fs = HeartyFs::format(MemoryRegion::new(config.image_len()), config)?;
//! fs.make_directory("/docs")?;
//! fs.write_file("/docs/readme", b"hello")?;
//! assert_eq!(fs.read_file("/docs/readme")?.to_vec(), b"hello");
//! # Ok::<(), heartyfs::FsError>(())
//! ```

mod alloc;
mod file;
mod fs;
pub mod io;
mod node;
mod path;
mod store;
mod tree;

pub use crate::file::{Chunks, FileContents, MAX_FILE_SIZE};
pub use crate::fs::{
    BlockNumber, DirEntryInfo, FsConfig, FsError, HeartyFs, Metadata, Result, BLOCK_SIZE,
    DEFAULT_BLOCKS, MAX_BLOCKS, MIN_BLOCKS,
};
pub use crate::node::{Kind, DATA_CAPACITY, DIR_ENTRIES, INODE_BLOCKS, MAX_NAME_LEN};
pub use crate::tree::{CheckReport, MAX_DEPTH};
