use core::fmt;

use serde::{Serialize, Serializer};

use crate::consts::*;

/// Lifecycle state of a page, taken from the first 4 bytes of its header.
///
/// Every transition clears one more bit of the sentinel, so the state can be advanced in place on
/// NOR flash without erasing the sector.
#[derive(strum::Display, Serialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum PageStatus {
    // All bits set, default state after flash erase. Page has not been initialized yet.
    Empty,

    // Page is initialized, and will accept writes.
    Active,

    // Page is marked as full and will not accept new writes.
    Full,

    // Data is being moved from this page to a new one.
    Erasing,

    // Page was found to be in a corrupt and unrecoverable state.
    Corrupted,

    // Not one of the sentinels above.
    Invalid,
}

impl From<u32> for PageStatus {
    fn from(val: u32) -> Self {
        match val {
            PAGE_STATE_EMPTY => PageStatus::Empty,
            PAGE_STATE_ACTIVE => PageStatus::Active,
            PAGE_STATE_FULL => PageStatus::Full,
            PAGE_STATE_ERASING => PageStatus::Erasing,
            PAGE_STATE_CORRUPT => PageStatus::Corrupted,
            _ => PageStatus::Invalid,
        }
    }
}

/// State of a single entry slot as recorded in the 2 bit per entry bitmap.
#[derive(strum::FromRepr, strum::Display, Serialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[repr(u8)]
pub enum EntryState {
    Empty = ENTRY_STATE_EMPTY,
    Written = ENTRY_STATE_WRITTEN,
    Erased = ENTRY_STATE_ERASED,
    Invalid = ENTRY_STATE_ILLEGAL,
}

impl From<u8> for EntryState {
    /// Only the two least significant bits are considered.
    fn from(code: u8) -> Self {
        EntryState::from_repr(code & 0b11).unwrap_or(EntryState::Invalid)
    }
}

/// Item type discriminant stored in byte 1 of every entry.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum ItemType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    String,
    Blob,
    BlobData,
    BlobIndex,
    Unknown(u8),
}

impl From<u8> for ItemType {
    fn from(val: u8) -> Self {
        match val {
            ITEM_TYPE_U8 => ItemType::U8,
            ITEM_TYPE_I8 => ItemType::I8,
            ITEM_TYPE_U16 => ItemType::U16,
            ITEM_TYPE_I16 => ItemType::I16,
            ITEM_TYPE_U32 => ItemType::U32,
            ITEM_TYPE_I32 => ItemType::I32,
            ITEM_TYPE_U64 => ItemType::U64,
            ITEM_TYPE_I64 => ItemType::I64,
            ITEM_TYPE_STRING => ItemType::String,
            ITEM_TYPE_BLOB => ItemType::Blob,
            ITEM_TYPE_BLOB_DATA => ItemType::BlobData,
            ITEM_TYPE_BLOB_INDEX => ItemType::BlobIndex,
            other => ItemType::Unknown(other),
        }
    }
}

impl From<ItemType> for u8 {
    fn from(val: ItemType) -> Self {
        match val {
            ItemType::U8 => ITEM_TYPE_U8,
            ItemType::I8 => ITEM_TYPE_I8,
            ItemType::U16 => ITEM_TYPE_U16,
            ItemType::I16 => ITEM_TYPE_I16,
            ItemType::U32 => ITEM_TYPE_U32,
            ItemType::I32 => ITEM_TYPE_I32,
            ItemType::U64 => ITEM_TYPE_U64,
            ItemType::I64 => ITEM_TYPE_I64,
            ItemType::String => ITEM_TYPE_STRING,
            ItemType::Blob => ITEM_TYPE_BLOB,
            ItemType::BlobData => ITEM_TYPE_BLOB_DATA,
            ItemType::BlobIndex => ITEM_TYPE_BLOB_INDEX,
            ItemType::Unknown(other) => other,
        }
    }
}

impl ItemType {
    /// Width in bytes of a fixed-width primitive, taken from the low nibble of the discriminant.
    pub fn primitive_width(&self) -> Option<usize> {
        let code = u8::from(*self);
        match self {
            ItemType::Unknown(_) => None,
            _ if code < ITEM_TYPE_PRIMITIVE_LIMIT => Some((code & 0x0F) as usize),
            _ => None,
        }
    }

    /// Primitives with any bit of the high nibble set are signed.
    pub fn is_signed(&self) -> bool {
        self.primitive_width().is_some() && u8::from(*self) & 0xF0 != 0
    }

    /// Variable-length types whose payload follows the header entry in the same page.
    pub fn is_sized(&self) -> bool {
        matches!(self, ItemType::String | ItemType::Blob | ItemType::BlobData)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Unknown(code) => write!(f, "0x{code:02x}"),
            known => fmt::Debug::fmt(known, f),
        }
    }
}

impl Serialize for ItemType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
