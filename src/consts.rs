// NVS page layout
pub const PAGE_SIZE: usize = 4096;
pub const ENTRY_SIZE: usize = 32;
pub const PAGE_HEADER_SIZE: usize = ENTRY_SIZE;
pub const ENTRY_STATE_BITMAP_SIZE: usize = ENTRY_SIZE;
pub const ENTRY_STATE_BITMAP_OFFSET: usize = PAGE_HEADER_SIZE;

/// Slots in a page including the two taken by the header and the entry-state bitmap.
pub const SLOTS_PER_PAGE: usize = PAGE_SIZE / ENTRY_SIZE;
/// The first two slots hold the header and the entry-state bitmap.
pub const ENTRIES_PER_PAGE: usize = SLOTS_PER_PAGE - 2;
/// Number of 2 bit codes stored in the bitmap, the last two describe no entry.
pub const ENTRY_STATE_BITMAP_CODES: usize = ENTRY_STATE_BITMAP_SIZE * 4;

/// Seed used for every CRC32 in the format.
pub const CRC_SEED: u32 = 0xFFFFFFFF;

// Page header fields
pub const PAGE_HEADER_STATUS_OFFSET: usize = 0;
pub const PAGE_HEADER_INDEX_OFFSET: usize = 4;
pub const PAGE_HEADER_VERSION_OFFSET: usize = 8;
pub const PAGE_HEADER_CRC_OFFSET: usize = 28;

// Entry fields
pub const ENTRY_NAMESPACE_OFFSET: usize = 0;
pub const ENTRY_TYPE_OFFSET: usize = 1;
pub const ENTRY_SPAN_OFFSET: usize = 2;
pub const ENTRY_CHUNK_INDEX_OFFSET: usize = 3;
pub const ENTRY_CRC_OFFSET: usize = 4;
pub const ENTRY_KEY_OFFSET: usize = 8;
pub const ENTRY_DATA_OFFSET: usize = 24;

/// Keys are stored in 16 byte, null-padded fields.
pub const KEY_FIELD_SIZE: usize = 16;
pub const DATA_FIELD_SIZE: usize = 8;

// Page states
pub const PAGE_STATE_EMPTY: u32 = 0xFFFFFFFF;
pub const PAGE_STATE_ACTIVE: u32 = 0xFFFFFFFE;
pub const PAGE_STATE_FULL: u32 = 0xFFFFFFFC;
pub const PAGE_STATE_ERASING: u32 = 0xFFFFFFF8;
pub const PAGE_STATE_CORRUPT: u32 = 0x00000000;

// Entry types from ESP-IDF
pub const ITEM_TYPE_U8: u8 = 0x01;
pub const ITEM_TYPE_I8: u8 = 0x11;
pub const ITEM_TYPE_U16: u8 = 0x02;
pub const ITEM_TYPE_I16: u8 = 0x12;
pub const ITEM_TYPE_U32: u8 = 0x04;
pub const ITEM_TYPE_I32: u8 = 0x14;
pub const ITEM_TYPE_U64: u8 = 0x08;
pub const ITEM_TYPE_I64: u8 = 0x18;
pub const ITEM_TYPE_STRING: u8 = 0x21;
pub const ITEM_TYPE_BLOB: u8 = 0x41; // Legacy single-page blob (version 1 format)
pub const ITEM_TYPE_BLOB_DATA: u8 = 0x42;
pub const ITEM_TYPE_BLOB_INDEX: u8 = 0x48;

/// Discriminants below this value are fixed-width primitives.
pub const ITEM_TYPE_PRIMITIVE_LIMIT: u8 = 0x20;

// Entry states
pub const ENTRY_STATE_EMPTY: u8 = 0b11;
pub const ENTRY_STATE_WRITTEN: u8 = 0b10;
pub const ENTRY_STATE_ERASED: u8 = 0b00;
pub const ENTRY_STATE_ILLEGAL: u8 = 0b01;

/// Namespace definitions live in namespace 0.
pub const NAMESPACE_DEFINITION_INDEX: u8 = 0;

const _: () = assert!(
    PAGE_HEADER_SIZE + ENTRY_STATE_BITMAP_SIZE + ENTRIES_PER_PAGE * ENTRY_SIZE == PAGE_SIZE,
    "Page structure size must equal flash sector size"
);
const _: () = assert!(ENTRIES_PER_PAGE == 126);
const _: () = assert!(ENTRY_STATE_BITMAP_CODES >= ENTRIES_PER_PAGE);
