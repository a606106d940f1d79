use std::mem::size_of;

use crate::fs::{BlockNumber, FsError, Result, BLOCK_SIZE};

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

type Le32 = U32<LittleEndian>;

/// Names are stored NUL-terminated in a 28 byte field.
pub const NAME_LEN: usize = 28;
pub const MAX_NAME_LEN: usize = NAME_LEN - 1;
/// Slots in a directory record, including `.` and `..`.
pub const DIR_ENTRIES: usize = 14;
/// Direct data blocks an inode can reference.
pub const INODE_BLOCKS: usize = 119;
/// Payload bytes carried by a single data block.
pub const DATA_CAPACITY: usize = BLOCK_SIZE - size_of::<u32>();

const TAG_FILE: u32 = 0;
const TAG_DIRECTORY: u32 = 1;

const _: () = assert!(size_of::<Directory>() <= BLOCK_SIZE);
const _: () = assert!(size_of::<Inode>() == BLOCK_SIZE);
const _: () = assert!(size_of::<DataBlock>() == BLOCK_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    File,
    Directory,
}

impl Kind {
    /// Reads the type tag stored at offset 0 of a directory or inode block.
    pub fn from_tag(block: BlockNumber, tag: u32) -> Result<Self> {
        match tag {
            TAG_FILE => Ok(Kind::File),
            TAG_DIRECTORY => Ok(Kind::Directory),
            other => Err(FsError::CorruptImage(format!(
                "block {} carries unknown type tag {}",
                block, other
            ))),
        }
    }
}

/// Encodes a name into its on-disk field.
///
/// # Errors
///
/// Names must be non-empty, at most 27 bytes and free of NUL bytes.
pub fn encode_name(name: &str) -> Result<[u8; NAME_LEN]> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.as_bytes().contains(&0) {
        return Err(FsError::InvalidPath(format!("invalid name {:?}", name)));
    }
    let mut field = [0; NAME_LEN];
    field[..name.len()].copy_from_slice(name.as_bytes());
    Ok(field)
}

/// The bytes of a stored name up to its terminator.
pub fn decode_name(field: &[u8; NAME_LEN]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    &field[..end]
}

#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub struct DirEntry {
    block_id: Le32,
    name: [u8; NAME_LEN],
}

impl DirEntry {
    fn new(block: BlockNumber, name: [u8; NAME_LEN]) -> Self {
        Self {
            block_id: Le32::new(block as u32),
            name,
        }
    }

    pub fn block(&self) -> BlockNumber {
        self.block_id.get() as usize
    }

    pub fn name(&self) -> &[u8] {
        decode_name(&self.name)
    }

    /// A slot is in use when it carries a name. Only the root's `.` and `..`
    /// legitimately point at block 0, every other entry has a nonzero id.
    pub fn is_valid(&self) -> bool {
        self.name[0] != 0
    }

    pub fn is_dot(&self) -> bool {
        matches!(self.name(), b"." | b"..")
    }
}

/// A directory record: a fixed array of entries whose first two slots are
/// always `.` and `..`. `size` counts valid entries, not slots.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub struct Directory {
    kind: Le32,
    name: [u8; NAME_LEN],
    size: Le32,
    entries: [DirEntry; DIR_ENTRIES],
}

impl Directory {
    /// A fresh directory stored at `block` whose parent lives at `parent`.
    pub fn new(name: [u8; NAME_LEN], block: BlockNumber, parent: BlockNumber) -> Self {
        let mut dir = Self::new_zeroed();
        dir.kind = Le32::new(TAG_DIRECTORY);
        dir.name = name;
        dir.entries[0] = DirEntry::new(block, dot(b"."));
        dir.entries[1] = DirEntry::new(parent, dot(b".."));
        dir.size = Le32::new(2);
        dir
    }

    /// The root directory, which is its own parent.
    pub fn root() -> Self {
        Self::new(dot(b"/"), 0, 0)
    }

    pub fn name(&self) -> &[u8] {
        decode_name(&self.name)
    }

    pub fn len(&self) -> usize {
        self.size.get() as usize
    }

    pub fn is_full(&self) -> bool {
        self.len() >= DIR_ENTRIES
    }

    /// True when nothing but `.` and `..` remains.
    pub fn is_empty(&self) -> bool {
        self.len() <= 2
    }

    pub fn self_block(&self) -> BlockNumber {
        self.entries[0].block()
    }

    pub fn parent_block(&self) -> BlockNumber {
        self.entries[1].block()
    }

    /// Valid entries paired with their slot index.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.is_valid())
    }

    /// Linear scan for a valid entry called `name`.
    pub fn find(&self, name: &[u8]) -> Option<(usize, &DirEntry)> {
        self.entries().find(|(_, e)| e.name() == name)
    }

    /// Places a new entry in the first free slot and bumps `size`.
    pub fn insert(&mut self, block: BlockNumber, name: [u8; NAME_LEN]) -> Result<usize> {
        if self.is_full() {
            return Err(FsError::DirectoryFull);
        }
        let slot = self
            .entries
            .iter()
            .position(|e| !e.is_valid())
            .ok_or(FsError::DirectoryFull)?;
        self.entries[slot] = DirEntry::new(block, name);
        self.size = Le32::new(self.size.get() + 1);
        Ok(slot)
    }

    /// Points an existing slot at a different block, keeping its name.
    pub fn repoint(&mut self, slot: usize, block: BlockNumber) {
        self.entries[slot].block_id = Le32::new(block as u32);
    }

    /// Zeroes a slot and drops `size` by one.
    pub fn remove(&mut self, slot: usize) {
        debug_assert!(slot >= 2, "`.` and `..` are never removed");
        if self.entries[slot].is_valid() {
            self.entries[slot] = DirEntry::new_zeroed();
            self.size = Le32::new(self.size.get().saturating_sub(1));
        }
    }
}

fn dot(name: &[u8]) -> [u8; NAME_LEN] {
    let mut field = [0; NAME_LEN];
    field[..name.len()].copy_from_slice(name);
    field
}

/// Metadata for a regular file. The data block list is a zero-terminated
/// prefix of `data_blocks`.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
pub struct Inode {
    kind: Le32,
    name: [u8; NAME_LEN],
    size: Le32,
    data_blocks: [Le32; INODE_BLOCKS],
}

impl Inode {
    /// An empty file with no data blocks.
    pub fn new(name: [u8; NAME_LEN]) -> Self {
        let mut node = Self::new_zeroed();
        node.kind = Le32::new(TAG_FILE);
        node.name = name;
        node
    }

    pub fn name(&self) -> &[u8] {
        decode_name(&self.name)
    }

    /// Declared size of the file in bytes.
    pub fn size(&self) -> usize {
        self.size.get() as usize
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = Le32::new(size as u32);
    }

    /// The data block ids in file order, stopping at the first zero.
    pub fn blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.data_blocks
            .iter()
            .map(|b| b.get() as usize)
            .take_while(|&b| b != 0)
    }

    /// Appends a block id to the end of the list.
    pub fn push_block(&mut self, block: BlockNumber) -> Result<()> {
        debug_assert!(block != 0);
        let count = self.blocks().count();
        if count == INODE_BLOCKS {
            return Err(FsError::TooLarge);
        }
        self.data_blocks[count] = Le32::new(block as u32);
        Ok(())
    }
}

/// A size-prefixed chunk of file content.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy)]
pub struct DataBlock {
    size: Le32,
    data: [u8; DATA_CAPACITY],
}

impl DataBlock {
    /// Copies `chunk` into the payload. Chunks larger than the payload
    /// capacity are rejected.
    pub fn fill(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > DATA_CAPACITY {
            return Err(FsError::TooLarge);
        }
        self.data[..chunk.len()].copy_from_slice(chunk);
        self.size = Le32::new(chunk.len() as u32);
        Ok(())
    }

    /// The declared-size prefix of the payload, clamped to capacity.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len().min(DATA_CAPACITY)]
    }

    pub fn len(&self) -> usize {
        self.size.get() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> [u8; NAME_LEN] {
        encode_name(s).unwrap()
    }

    #[test]
    fn records_match_block_layout() {
        assert_eq!(size_of::<DirEntry>(), 32);
        assert_eq!(size_of::<Directory>(), 484);
        assert_eq!(size_of::<Inode>(), 512);
        assert_eq!(DATA_CAPACITY, 508);
    }

    #[test]
    fn new_directory_links_self_and_parent() {
        let dir = Directory::new(name("docs"), 7, 3);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.self_block(), 7);
        assert_eq!(dir.parent_block(), 3);
        assert_eq!(dir.find(b".").map(|(_, e)| e.block()), Some(7));
        assert_eq!(dir.find(b"..").map(|(_, e)| e.block()), Some(3));
        assert!(dir.is_empty());
    }

    #[test]
    fn directory_fills_up_at_fourteen_entries() {
        let mut dir = Directory::root();
        for i in 0..12 {
            dir.insert(10 + i, name(&format!("f{}", i))).unwrap();
        }
        assert!(dir.is_full());
        match dir.insert(99, name("overflow")) {
            Err(FsError::DirectoryFull) => (),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(dir.entries().count(), DIR_ENTRIES);
    }

    #[test]
    fn removed_slot_is_reused() {
        let mut dir = Directory::root();
        let a = dir.insert(5, name("a")).unwrap();
        dir.insert(6, name("b")).unwrap();
        dir.remove(a);
        assert_eq!(dir.len(), 3);
        assert!(dir.find(b"a").is_none());

        let c = dir.insert(7, name("c")).unwrap();
        assert_eq!(c, a);
        assert_eq!(dir.len(), 4);
    }

    #[test]
    fn inode_block_list_stops_at_terminator() {
        let mut node = Inode::new(name("notes"));
        node.push_block(4).unwrap();
        node.push_block(9).unwrap();
        assert_eq!(node.blocks().collect::<Vec<_>>(), vec![4, 9]);
    }

    #[test]
    fn inode_rejects_block_past_capacity() {
        let mut node = Inode::new(name("big"));
        for b in 0..INODE_BLOCKS {
            node.push_block(b + 2).unwrap();
        }
        assert_eq!(node.blocks().count(), INODE_BLOCKS);
        assert!(matches!(node.push_block(500), Err(FsError::TooLarge)));
    }

    #[test]
    fn names_are_validated() {
        assert!(encode_name("").is_err());
        assert!(encode_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(encode_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(encode_name("a\0b").is_err());
        assert_eq!(decode_name(&name("hello")), b"hello");
    }

    #[test]
    fn data_block_payload_tracks_size() {
        let mut block = DataBlock::new_zeroed();
        block.fill(b"abc").unwrap();
        assert_eq!(block.payload(), b"abc");
        assert!(block.fill(&[0; DATA_CAPACITY + 1]).is_err());
    }
}
