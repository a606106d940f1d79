mod diskemu;
mod region;

pub use diskemu::{FileRegion, FileRegionBuilder};
pub use region::{MemoryRegion, Region};
