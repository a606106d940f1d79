use crate::fs::{BlockNumber, FsError, Result, BITMAP_BLOCK, BLOCK_SIZE, FIRST_FREE_BLOCK};
use crate::io::Region;
use crate::store::BlockStore;

use log::{debug, warn};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// The allocation map stored in block 1. Bit `n % 8` of byte `n / 8` tracks
/// block `n`: set means used, clear means free. One block of bitmap tracks up
/// to 4096 blocks.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct Bitmap {
    bits: [u8; BLOCK_SIZE],
}

impl Bitmap {
    pub fn get(&self, blocknr: BlockNumber) -> State {
        assert!(blocknr < BLOCK_SIZE * 8);
        match (self.bits[blocknr / 8] >> (blocknr % 8)) & 0b1 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < BLOCK_SIZE * 8);
        self.bits[blocknr / 8] |= 0b1 << (blocknr % 8);
    }

    pub fn set_free(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < BLOCK_SIZE * 8);
        self.bits[blocknr / 8] &= !(0b1 << (blocknr % 8));
    }
}

/// Implements a naive block allocation policy. Each call to the iterator
/// returns the next free block at or after the marker, scanning block numbers
/// in increasing order.
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: BlockNumber,
    bitmap: &'a Bitmap,
    /// One past the last allocatable block.
    cap: BlockNumber,
}

impl<'a> NextAvailableAllocation<'a> {
    pub fn new(bitmap: &'a Bitmap, cap: BlockNumber) -> Self {
        Self {
            marker: FIRST_FREE_BLOCK,
            bitmap,
            cap,
        }
    }
}

impl<'a> Iterator for NextAvailableAllocation<'a> {
    type Item = BlockNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.cap {
            let i = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(i) {
                return Some(i);
            }
        }
        None
    }
}

impl<R: Region> BlockStore<R> {
    pub fn bitmap(&self) -> Result<&Bitmap> {
        self.view(BITMAP_BLOCK)
    }

    fn bitmap_mut(&mut self) -> Result<&mut Bitmap> {
        self.view_mut(BITMAP_BLOCK)
    }

    /// Number of blocks the allocator could still hand out.
    pub fn free_blocks(&self) -> Result<usize> {
        Ok(NextAvailableAllocation::new(self.bitmap()?, self.block_count()).count())
    }

    /// Whether `block` is an allocatable block currently marked used.
    pub fn is_allocated(&self, block: BlockNumber) -> Result<bool> {
        if block < FIRST_FREE_BLOCK || block >= self.block_count() {
            return Ok(false);
        }
        Ok(self.bitmap()?.get(block) == State::Used)
    }

    /// Claims the lowest-numbered free block.
    ///
    /// # Errors
    ///
    /// Returns `OutOfSpace` when every block is in use.
    pub fn allocate(&mut self) -> Result<BlockNumber> {
        let cap = self.block_count();
        let block = NextAvailableAllocation::new(self.bitmap()?, cap)
            .next()
            .ok_or(FsError::OutOfSpace)?;
        self.bitmap_mut()?.set_reserved(block);
        debug!("allocated block {}", block);
        Ok(block)
    }

    /// Zeroes a block and returns it to the free pool.
    ///
    /// # Errors
    ///
    /// Releasing a reserved, out of range or already free block means some
    /// structure referenced a block it does not own.
    pub fn release(&mut self, block: BlockNumber) -> Result<()> {
        if !self.is_allocated(block)? {
            warn!("refusing to release unowned block {}", block);
            return Err(FsError::CorruptImage(format!(
                "block {} is not an allocated block",
                block
            )));
        }
        self.block_at_mut(block)?.iter_mut().for_each(|b| *b = 0);
        self.bitmap_mut()?.set_free(block);
        debug!("released block {}", block);
        Ok(())
    }

    /// Marks the reserved root and bitmap blocks as used.
    pub(crate) fn reserve_fixed_blocks(&mut self) -> Result<()> {
        let bitmap = self.bitmap_mut()?;
        for block in 0..FIRST_FREE_BLOCK {
            bitmap.set_reserved(block);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRegion;

    fn store(blocks: usize) -> BlockStore<MemoryRegion> {
        let mut store = BlockStore::new(MemoryRegion::new(blocks * BLOCK_SIZE), blocks).unwrap();
        store.reserve_fixed_blocks().unwrap();
        store
    }

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new_zeroed();

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
        assert_eq!(bmp.bits[0], 0b100);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new_zeroed();

        bmp.set_reserved(0);
        bmp.set_reserved(4095);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(4095), State::Used);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new_zeroed();

        bmp.set_reserved(10);
        bmp.set_reserved(11);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        // Neighbouring bits are untouched.
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn allocation_starts_after_reserved_blocks() {
        let mut store = store(8);
        assert_eq!(store.free_blocks().unwrap(), 6);
        assert_eq!(store.allocate().unwrap(), 2);
        assert_eq!(store.allocate().unwrap(), 3);
        assert_eq!(store.free_blocks().unwrap(), 4);
    }

    #[test]
    fn released_block_is_handed_out_again_zeroed() {
        let mut store = store(8);
        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        store.block_at_mut(a).unwrap()[17] = 0xAB;

        store.release(a).unwrap();
        assert_eq!(store.allocate().unwrap(), a);
        assert!(store.block_at(a).unwrap().iter().all(|&b| b == 0));
        assert_ne!(a, b);
    }

    #[test]
    fn exhausted_bitmap_reports_out_of_space() {
        let mut store = store(4);
        store.allocate().unwrap();
        store.allocate().unwrap();
        match store.allocate() {
            Err(FsError::OutOfSpace) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn reserved_and_free_blocks_cannot_be_released() {
        let mut store = store(8);
        assert!(store.release(0).is_err());
        assert!(store.release(1).is_err());
        assert!(store.release(5).is_err());
        assert!(store.release(80).is_err());
        assert_eq!(store.free_blocks().unwrap(), 6);
    }
}
