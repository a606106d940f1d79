use crate::fs::BLOCK_SIZE;
use crate::io::Region;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, SeekFrom};
use std::path::Path;

/// Emulates an in-place mapped disk image in userspace. The image file is read
/// into memory when the region is built and written back in full on every
/// flush.
pub struct FileRegion {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The in-memory copy of the image that the filesystem mutates.
    image: Vec<u8>,
}

impl FileRegion {
    /// Opens an existing image at the specified path. This method does not
    /// validate the image contents, it is up for clients to ensure images are
    /// appropriately initialized.
    pub fn open<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self> {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        FileRegionBuilder::from(file)
            .with_block_count(nblocks)
            .clear_medium(false)
            .build()
    }

    /// The number of blocks the image was built with.
    pub fn block_count(&self) -> usize {
        self.image.len() / BLOCK_SIZE
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }
}

impl Region for FileRegion {
    fn bytes(&self) -> &[u8] {
        &self.image
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        self.fd.write_all(&self.image)?;
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileRegionBuilder {
    fd: File,
    block_count: usize,
    clear: bool,
}

impl From<File> for FileRegionBuilder {
    fn from(fd: File) -> Self {
        FileRegionBuilder {
            fd,
            block_count: 0,
            clear: true,
        }
    }
}

impl FileRegionBuilder {
    /// Sets the number of blocks in the image.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Controls whether the image is zeroed before use. Defaults to true; pass
    /// false to reopen a previously formatted image.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor and, unless told
    /// otherwise, does destructive things to prepare the file for use.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be zeroed, or if it is shorter than the
    /// requested image when it is not being cleared.
    pub fn build(mut self) -> std::io::Result<FileRegion> {
        debug_assert!(self.block_count > 0);
        if self.clear {
            self.zero_blocks()?;
        }

        let mut image = vec![0x00; self.block_count * BLOCK_SIZE];
        self.fd.seek(SeekFrom::Start(0))?;
        self.fd.read_exact(&mut image)?;

        Ok(FileRegion { fd: self.fd, image })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.set_len(0)?;
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the image, buffering each write to prevent excessive syscalls.
        let zeroes = [0x00; BLOCK_SIZE];
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()?;
        Ok(())
    }
}
