use core::fmt;

use serde::Serialize;

use crate::consts::*;
use crate::crc::{
    crc32,
    crc32_entry,
};
use crate::error::Error;
use crate::raw::{
    EntryState,
    ItemType,
};

/// Stored and recomputed checksums of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryCrc {
    /// CRC stored at bytes 4..8.
    pub original: u32,
    /// CRC over bytes 0..4 and 8..32.
    pub computed: u32,
    /// Last 4 bytes of the data field, the payload CRC for String and blob data entries.
    pub data_original: u32,
    /// CRC over the payload carried by the children. Only set for entries spanning more than one
    /// slot.
    pub data_computed: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    pub namespace: u8,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Number of slots occupied including this one. A stored 0 or 0xFF reads as 1.
    pub span: u8,
    pub chunk_index: u8,
    pub crc: EntryCrc,
}

/// Decoded 8 byte data field, one variant per item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryData {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    /// Header of a String, legacy Blob or BlobData entry. The payload lives in the children.
    Sized { size: u16, crc: u32 },
    BlobIndex {
        size: u32,
        chunk_count: u8,
        chunk_start: u8,
    },
}

impl fmt::Display for EntryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::Sized { size, crc } => write!(f, "size: {size}, crc: 0x{crc:08x}"),
            Self::BlobIndex {
                size,
                chunk_count,
                chunk_start,
            } => write!(
                f,
                "size: {size}, chunk_count: {chunk_count}, chunk_start: {chunk_start}"
            ),
        }
    }
}

/// One 32 byte entry slot of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Slot index within the page, not counting the header and bitmap slots.
    pub index: usize,
    #[serde(serialize_with = "hex::serde::serialize")]
    pub raw: [u8; ENTRY_SIZE],
    pub state: EntryState,
    pub is_empty: bool,
    pub metadata: EntryMetadata,
    /// `None` if the key contains a byte outside of 7 bit ASCII.
    pub key: Option<String>,
    /// `None` if the key could not be read or the item type is unknown.
    pub data: Option<EntryData>,
    /// Continuation slots of a spanning entry, in slot order. Their own span and children carry
    /// no meaning.
    pub children: Vec<Entry>,
}

impl Entry {
    /// Decode a single entry slot. `entry_data` must be exactly one entry long.
    pub fn decode(index: usize, entry_data: &[u8], state: EntryState) -> Result<Entry, Error> {
        let raw: [u8; ENTRY_SIZE] =
            entry_data
                .try_into()
                .map_err(|_| Error::EntryNotAligned {
                    index,
                    len: entry_data.len(),
                })?;

        let item_type = ItemType::from(raw[ENTRY_TYPE_OFFSET]);
        let mut data_field = [0u8; DATA_FIELD_SIZE];
        data_field.copy_from_slice(&raw[ENTRY_DATA_OFFSET..]);

        let key = decode_key(&raw[ENTRY_KEY_OFFSET..ENTRY_KEY_OFFSET + KEY_FIELD_SIZE]);
        let data = key
            .as_ref()
            .and_then(|_| decode_data(item_type, &data_field));

        let crc = EntryCrc {
            original: read_u32(&raw, ENTRY_CRC_OFFSET),
            computed: crc32_entry(&raw).unwrap_or_default(),
            data_original: read_u32(&data_field, 4),
            data_computed: None,
        };

        Ok(Entry {
            index,
            raw,
            state,
            is_empty: raw.iter().all(|&b| b == 0xFF),
            metadata: EntryMetadata {
                namespace: raw[ENTRY_NAMESPACE_OFFSET],
                item_type,
                span: normalize_span(raw[ENTRY_SPAN_OFFSET]),
                chunk_index: raw[ENTRY_CHUNK_INDEX_OFFSET],
                crc,
            },
            key,
            data,
            children: Vec::new(),
        })
    }

    /// Attach the next continuation slot of a spanning entry.
    pub fn child_assign(&mut self, child: Entry) {
        self.children.push(child);
    }

    /// Compute the CRC over the payload carried by the children.
    ///
    /// The concatenated children are cut to the size announced in the header (sized types and blob
    /// indices) to drop the padding of the last slot. Entries without continuation slots are left untouched.
    pub fn compute_crc(&mut self) {
        if self.metadata.span <= 1 {
            return;
        }
        let payload = self.joined_children();
        self.metadata.crc.data_computed = Some(crc32(CRC_SEED, &payload));
    }

    /// The variable-length value carried by a String, Blob or BlobData entry, cut to its declared
    /// size.
    pub fn payload(&self) -> Option<Vec<u8>> {
        match (self.metadata.item_type.is_sized(), self.data) {
            (true, Some(EntryData::Sized { .. })) => Some(self.joined_children()),
            _ => None,
        }
    }

    /// The value of a String entry without its null terminator.
    pub fn as_str(&self) -> Option<String> {
        if self.metadata.item_type != ItemType::String {
            return None;
        }
        let payload = self.payload()?;
        let text = String::from_utf8(payload).ok()?;
        Some(text.trim_end_matches('\0').to_string())
    }

    pub fn is_crc_valid(&self) -> bool {
        self.metadata.crc.original == self.metadata.crc.computed
    }

    /// `None` if no payload CRC was computed for this entry.
    pub fn is_data_crc_valid(&self) -> Option<bool> {
        self.metadata
            .crc
            .data_computed
            .map(|computed| computed == self.metadata.crc.data_original)
    }

    /// True if the page ended before all continuation slots announced by `span` were read.
    pub fn is_truncated(&self) -> bool {
        self.children.len() + 1 < self.metadata.span as usize
    }

    fn joined_children(&self) -> Vec<u8> {
        let mut joined: Vec<u8> = self.children.iter().flat_map(|child| child.raw).collect();
        let size = match self.data {
            Some(EntryData::Sized { size, .. }) => size as usize,
            Some(EntryData::BlobIndex { size, .. }) => size as usize,
            _ => return joined,
        };
        joined.truncate(size.min(joined.len()));
        joined
    }
}

/// A span of 0 or 0xFF (erased flash) does not announce continuation slots.
pub(crate) fn normalize_span(span: u8) -> u8 {
    match span {
        0 | u8::MAX => 1,
        span => span,
    }
}

/// Keys are C strings padded with null bytes. Only trailing nulls are dropped.
fn decode_key(key_field: &[u8]) -> Option<String> {
    let len = key_field
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let key = &key_field[..len];
    if !key.is_ascii() {
        return None;
    }
    Some(key.iter().map(|&b| b as char).collect())
}

fn decode_data(item_type: ItemType, data_field: &[u8; DATA_FIELD_SIZE]) -> Option<EntryData> {
    if let Some(width) = item_type.primitive_width() {
        return decode_primitive(item_type, width, data_field);
    }
    match item_type {
        ItemType::String | ItemType::Blob | ItemType::BlobData => Some(EntryData::Sized {
            size: read_u16(data_field, 0),
            crc: read_u32(data_field, 4),
        }),
        ItemType::BlobIndex => Some(EntryData::BlobIndex {
            size: read_u32(data_field, 0),
            chunk_count: data_field[4],
            chunk_start: data_field[5],
        }),
        _ => None,
    }
}

/// Little endian value of `width` bytes, sign-extended from its own width for signed types.
fn decode_primitive(
    item_type: ItemType,
    width: usize,
    data_field: &[u8; DATA_FIELD_SIZE],
) -> Option<EntryData> {
    let mut buf = [0u8; DATA_FIELD_SIZE];
    buf[..width].copy_from_slice(&data_field[..width]);
    let value = u64::from_le_bytes(buf);

    let data = if item_type.is_signed() {
        let shift = 64 - 8 * width as u32;
        let value = ((value << shift) as i64) >> shift;
        match width {
            1 => EntryData::I8(value as i8),
            2 => EntryData::I16(value as i16),
            4 => EntryData::I32(value as i32),
            8 => EntryData::I64(value),
            _ => return None,
        }
    } else {
        match width {
            1 => EntryData::U8(value as u8),
            2 => EntryData::U16(value as u16),
            4 => EntryData::U32(value as u32),
            8 => EntryData::U64(value),
            _ => return None,
        }
    };
    Some(data)
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
