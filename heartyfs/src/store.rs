use crate::fs::{BlockNumber, FsConfig, FsError, Result, BLOCK_SIZE};
use crate::io::Region;
use crate::node::Kind;

use zerocopy::{AsBytes, FromBytes, Unaligned};

/// Splits a region into equal-size blocks and hands out typed views onto
/// them. All access is bounds-checked against the block count the store was
/// created with; bytes of the region past the last block are never touched.
pub struct BlockStore<R: Region> {
    region: R,
    block_count: usize,
}

impl<R: Region> BlockStore<R> {
    /// Wraps `region` as an image of `block_count` blocks.
    ///
    /// # Errors
    ///
    /// The block count must be within the supported range and the region must
    /// be large enough to hold every block.
    pub fn new(region: R, block_count: usize) -> Result<Self> {
        FsConfig { block_count }.validate()?;
        let needed = block_count * BLOCK_SIZE;
        if region.bytes().len() < needed {
            return Err(FsError::InvalidConfig(format!(
                "region holds {} bytes, image needs {}",
                region.bytes().len(),
                needed
            )));
        }
        Ok(Self {
            region,
            block_count,
        })
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn block_at(&self, block: BlockNumber) -> Result<&[u8]> {
        let range = self.range(block)?;
        Ok(&self.region.bytes()[range])
    }

    pub fn block_at_mut(&mut self, block: BlockNumber) -> Result<&mut [u8]> {
        let range = self.range(block)?;
        Ok(&mut self.region.bytes_mut()[range])
    }

    /// Interprets the start of a block as a `T`.
    pub fn view<T: FromBytes + Unaligned>(&self, block: BlockNumber) -> Result<&T> {
        T::ref_from_prefix(self.block_at(block)?)
            .ok_or_else(|| FsError::CorruptImage(format!("block {} too small for record", block)))
    }

    pub fn view_mut<T: FromBytes + AsBytes + Unaligned>(
        &mut self,
        block: BlockNumber,
    ) -> Result<&mut T> {
        T::mut_from_prefix(self.block_at_mut(block)?)
            .ok_or_else(|| FsError::CorruptImage(format!("block {} too small for record", block)))
    }

    /// The type tag at offset 0 of a directory or inode block.
    pub fn kind_of(&self, block: BlockNumber) -> Result<Kind> {
        let raw = self.block_at(block)?;
        let tag = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Kind::from_tag(block, tag)
    }

    /// Zeroes every block of the image.
    pub fn clear(&mut self) {
        let end = self.block_count * BLOCK_SIZE;
        self.region.bytes_mut()[..end].iter_mut().for_each(|b| *b = 0);
    }

    /// Makes every prior mutation durable.
    pub fn flush(&mut self) -> Result<()> {
        self.region.flush()?;
        Ok(())
    }

    pub fn into_region(self) -> R {
        self.region
    }

    fn range(&self, block: BlockNumber) -> Result<std::ops::Range<usize>> {
        if block >= self.block_count {
            return Err(FsError::OutOfRange(block));
        }
        let start = block * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}
