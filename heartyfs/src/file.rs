use std::collections::HashSet;
use std::io::Write;

use crate::fs::{BlockNumber, FsError, HeartyFs, Result};
use crate::io::Region;
use crate::node::{
    encode_name, DataBlock, Directory, Inode, Kind, DATA_CAPACITY, INODE_BLOCKS, NAME_LEN,
};
use crate::path::Resolver;
use crate::store::BlockStore;

use log::{info, warn};

/// The largest file an inode can describe.
pub const MAX_FILE_SIZE: usize = INODE_BLOCKS * DATA_CAPACITY;

impl<R: Region> HeartyFs<R> {
    /// Stores `data` as the content of the file at `path`, creating the file
    /// if it does not exist and replacing its content if it does.
    ///
    /// Size, capacity and free space are checked before anything is
    /// allocated. Should a later step still fail, every block claimed by this
    /// call is released again; the operation is not atomic with respect to a
    /// process interruption, which can leak allocated blocks.
    ///
    /// # Errors
    ///
    /// `TooLarge` if the content needs more than 119 data blocks,
    /// `DirectoryFull` if a new entry is needed and the parent has no free
    /// slot, `NotAFile` if the path names a directory.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<BlockNumber> {
        let (parent, name) = Resolver::new(&self.store).parent(path)?;
        let field = encode_name(name)?;

        let existing = match self.entry(parent, name) {
            Ok((slot, block)) => {
                if self.store.kind_of(block)? != Kind::File {
                    return Err(FsError::NotAFile(name.to_string()));
                }
                Some((slot, block))
            }
            Err(FsError::NotFound(_)) => {
                if self.store.view::<Directory>(parent)?.is_full() {
                    return Err(FsError::DirectoryFull);
                }
                None
            }
            Err(err) => return Err(err),
        };

        let chunks = data.chunks(DATA_CAPACITY);
        if chunks.len() > INODE_BLOCKS {
            return Err(FsError::TooLarge);
        }
        if self.store.free_blocks()? < chunks.len() + 1 {
            return Err(FsError::OutOfSpace);
        }

        let mut claimed = Vec::with_capacity(chunks.len() + 1);
        let inode = match self.build_file(field, data, &mut claimed) {
            Ok(inode) => inode,
            Err(err) => {
                warn!("rolling back {} blocks for {:?}: {}", claimed.len(), path, err);
                self.release_claimed(&claimed)?;
                return Err(err);
            }
        };

        match existing {
            Some((slot, old)) => {
                self.store.view_mut::<Directory>(parent)?.repoint(slot, inode);
                self.release_file(old)?;
            }
            None => {
                if let Err(err) = self.store.view_mut::<Directory>(parent)?.insert(inode, field) {
                    self.release_file(inode)?;
                    return Err(err);
                }
            }
        }
        self.store.flush()?;
        info!(
            "wrote {} bytes to {:?} (inode {}, {} data blocks)",
            data.len(),
            path,
            inode,
            claimed.len() - 1
        );
        Ok(inode)
    }

    /// Allocates and fills an inode plus its data blocks, recording every
    /// claimed block in `claimed` as it goes.
    fn build_file(
        &mut self,
        name: [u8; NAME_LEN],
        data: &[u8],
        claimed: &mut Vec<BlockNumber>,
    ) -> Result<BlockNumber> {
        let inode = self.store.allocate()?;
        claimed.push(inode);
        *self.store.view_mut::<Inode>(inode)? = Inode::new(name);

        for chunk in data.chunks(DATA_CAPACITY) {
            let block = self.store.allocate()?;
            claimed.push(block);
            self.store.view_mut::<DataBlock>(block)?.fill(chunk)?;
            self.store.view_mut::<Inode>(inode)?.push_block(block)?;
        }
        self.store.view_mut::<Inode>(inode)?.set_size(data.len());
        Ok(inode)
    }

    /// Hands back blocks taken by a failed `build_file`. Data blocks go back
    /// before the inode that listed them.
    fn release_claimed(&mut self, claimed: &[BlockNumber]) -> Result<()> {
        for &block in claimed.iter().rev() {
            self.store.release(block)?;
        }
        Ok(())
    }

    /// Opens the content of the regular file at `path` for reading.
    pub fn read_file(&self, path: &str) -> Result<FileContents<'_, R>> {
        let block = self.resolve(path)?;
        if self.store.kind_of(block)? != Kind::File {
            return Err(FsError::NotAFile(path.to_string()));
        }
        let blocks = owned_data_blocks(&self.store, block)?;
        let len = self.store.view::<Inode>(block)?.size();

        let mut available = 0;
        for &b in &blocks {
            let data = self.store.view::<DataBlock>(b)?;
            if data.len() > DATA_CAPACITY {
                return Err(FsError::CorruptImage(format!(
                    "data block {} claims {} payload bytes",
                    b,
                    data.len()
                )));
            }
            available += data.len();
        }
        if available < len {
            return Err(FsError::CorruptImage(format!(
                "inode {} declares {} bytes but its blocks hold {}",
                block, len, available
            )));
        }

        Ok(FileContents {
            store: &self.store,
            blocks,
            len,
        })
    }

    /// Frees an inode's data blocks, then the inode itself. All of them are
    /// checked before the first one is released.
    pub(crate) fn release_file(&mut self, inode: BlockNumber) -> Result<()> {
        let blocks = owned_data_blocks(&self.store, inode)?;
        for block in blocks {
            self.store.release(block)?;
        }
        self.store.release(inode)
    }
}

/// The data block list of `inode`, verified to consist of distinct,
/// allocated blocks.
fn owned_data_blocks<R: Region>(
    store: &BlockStore<R>,
    inode: BlockNumber,
) -> Result<Vec<BlockNumber>> {
    if !store.is_allocated(inode)? {
        return Err(FsError::CorruptImage(format!(
            "inode block {} is not allocated",
            inode
        )));
    }
    let blocks: Vec<BlockNumber> = store.view::<Inode>(inode)?.blocks().collect();
    let mut seen = HashSet::with_capacity(blocks.len());
    for &block in &blocks {
        if block == inode || !seen.insert(block) || !store.is_allocated(block)? {
            return Err(FsError::CorruptImage(format!(
                "inode {} lists unowned data block {}",
                inode, block
            )));
        }
    }
    Ok(blocks)
}

/// The content of a file, read lazily from its data blocks. Iterating twice
/// yields the same bytes; the view borrows the filesystem so nothing can
/// change underneath it.
pub struct FileContents<'a, R: Region> {
    store: &'a BlockStore<R>,
    blocks: Vec<BlockNumber>,
    len: usize,
}

impl<'a, R: Region> FileContents<'a, R> {
    /// Declared size of the file in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The significant payload of each data block, in file order.
    pub fn chunks(&self) -> Chunks<'_, R> {
        Chunks {
            store: self.store,
            blocks: self.blocks.iter(),
            remaining: self.len,
        }
    }

    /// The file's bytes one at a time.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks().flat_map(|chunk| chunk.iter().copied())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        self.chunks().for_each(|chunk| out.extend_from_slice(chunk));
        out
    }

    /// Streams the content into `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for chunk in self.chunks() {
            w.write_all(chunk)?;
        }
        Ok(())
    }
}

pub struct Chunks<'a, R: Region> {
    store: &'a BlockStore<R>,
    blocks: std::slice::Iter<'a, BlockNumber>,
    remaining: usize,
}

impl<'a, R: Region> Iterator for Chunks<'a, R> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let &block = self.blocks.next()?;
            let store = self.store;
            let data = store.view::<DataBlock>(block);
            debug_assert!(data.is_ok(), "data block {} was validated on open", block);
            let payload = data.ok()?.payload();
            if payload.is_empty() {
                continue;
            }
            let take = payload.len().min(self.remaining);
            self.remaining -= take;
            return Some(&payload[..take]);
        }
        None
    }
}
