#![doc = include_str ! ("../README.md")]

pub mod check;
pub mod consts;
pub mod crc;
pub mod entry;
pub mod error;
pub mod page;
pub mod partition;
pub mod raw;

pub use check::{
    Finding,
    FindingKind,
    Severity,
};
pub use consts::{
    ENTRIES_PER_PAGE,
    ENTRY_SIZE,
    PAGE_SIZE,
};
pub use entry::{
    Entry,
    EntryCrc,
    EntryData,
    EntryMetadata,
};
pub use error::Error;
pub use page::{
    HeaderCrc,
    Page,
    PageHeader,
};
pub use partition::{
    EntryStatistics,
    PageStatistics,
    Partition,
    Statistics,
};
pub use raw::{
    EntryState,
    ItemType,
    PageStatus,
};
