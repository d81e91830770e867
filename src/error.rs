use embedded_storage::nor_flash::NorFlashErrorKind;
use thiserror::Error;

use crate::consts::{
    ENTRY_SIZE,
    PAGE_SIZE,
};

/// Errors that abort decoding. Anything the decoder can still represent (CRC mismatches, unknown
/// item types, unreadable keys) is reported through the decoded structures instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The partition size has to be a multiple of the flash sector size (4k)
    #[error("partition size {0} is not a multiple of the page size {PAGE_SIZE}")]
    PartitionNotAligned(usize),

    #[error("page at 0x{address:08x} has {len} bytes, expected {PAGE_SIZE}")]
    PageNotAligned { address: usize, len: usize },

    #[error("entry {index} has {len} bytes, expected {ENTRY_SIZE}")]
    EntryNotAligned { index: usize, len: usize },

    /// The partition offset has to be aligned to the size of a flash sector (4k)
    #[error("partition offset 0x{0:08x} is not aligned to the page size {PAGE_SIZE}")]
    InvalidPartitionOffset(usize),

    /// The error kind reported by the provided `ReadNorFlash` implementation
    #[error("flash read at 0x{offset:08x} failed: {kind:?}")]
    Flash { offset: usize, kind: NorFlashErrorKind },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the length mismatches that mean the input cannot be an NVS image at all.
    pub fn is_not_aligned(&self) -> bool {
        matches!(
            self,
            Error::PartitionNotAligned(_)
                | Error::PageNotAligned { .. }
                | Error::EntryNotAligned { .. }
        )
    }
}
