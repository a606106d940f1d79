/// A fixed-size, addressable byte region holding an entire filesystem image.
///
/// The filesystem mutates the image in place through [`Region::bytes_mut`]
/// and only considers those mutations durable once [`Region::flush`] has
/// returned successfully. Whoever produces the region (a file, a mapping, a
/// heap buffer) is responsible for sizing it before it is handed over.
pub trait Region {
    /// The whole image, block 0 first.
    fn bytes(&self) -> &[u8];
    /// Mutable access to the whole image.
    fn bytes_mut(&mut self) -> &mut [u8];
    /// Persists every mutation made so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium could not be written.
    fn flush(&mut self) -> std::io::Result<()>;
}

/// A region that lives only in memory. Flushing is a no-op, which makes it
/// useful for tests and for staging an image before writing it elsewhere.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    image: Vec<u8>,
}

impl MemoryRegion {
    /// Allocates a zeroed region of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            image: vec![0x00; len],
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.image
    }
}

impl From<Vec<u8>> for MemoryRegion {
    fn from(image: Vec<u8>) -> Self {
        Self { image }
    }
}

impl Region for MemoryRegion {
    fn bytes(&self) -> &[u8] {
        &self.image
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
