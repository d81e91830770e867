use log::{
    debug,
    trace,
};
use serde::Serialize;

use crate::consts::*;
use crate::crc::crc32_page_header;
use crate::entry::{
    Entry,
    read_u32,
};
use crate::error::Error;
use crate::raw::{
    EntryState,
    ItemType,
    PageStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderCrc {
    /// CRC stored at bytes 28..32.
    pub original: u32,
    /// CRC over bytes 4..28.
    pub computed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageHeader {
    pub status: PageStatus,
    /// Sequence number of the page, increasing with every page taken into use.
    pub page_index: u32,
    /// Format version, stored inverted (0xFF is version 0, 0xFE version 1).
    pub version: u8,
    pub crc: HeaderCrc,
}

impl PageHeader {
    fn decode(raw: &[u8; PAGE_HEADER_SIZE]) -> Self {
        PageHeader {
            status: PageStatus::from(read_u32(raw, PAGE_HEADER_STATUS_OFFSET)),
            page_index: read_u32(raw, PAGE_HEADER_INDEX_OFFSET),
            version: u8::MAX - raw[PAGE_HEADER_VERSION_OFFSET],
            crc: HeaderCrc {
                original: read_u32(raw, PAGE_HEADER_CRC_OFFSET),
                computed: crc32_page_header(raw).unwrap_or_default(),
            },
        }
    }

    pub fn is_crc_valid(&self) -> bool {
        self.crc.original == self.crc.computed
    }
}

/// One flash sector of the partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// True if the header is still in the erased state.
    pub is_empty: bool,
    /// Byte offset of the page within the partition.
    pub start_address: usize,
    #[serde(serialize_with = "hex::serde::serialize")]
    pub raw_header: [u8; PAGE_HEADER_SIZE],
    #[serde(serialize_with = "hex::serde::serialize")]
    pub raw_entry_state_bitmap: [u8; ENTRY_STATE_BITMAP_SIZE],
    pub header: PageHeader,
    /// Entries in slot order. Continuation slots of spanning entries are only reachable through
    /// their parent.
    pub entries: Vec<Entry>,
}

impl Page {
    /// Decode a page located at `start_address`. `page_data` must be exactly one page long.
    pub fn decode(start_address: usize, page_data: &[u8]) -> Result<Page, Error> {
        if page_data.len() != PAGE_SIZE {
            return Err(Error::PageNotAligned {
                address: start_address,
                len: page_data.len(),
            });
        }

        let mut raw_header = [0u8; PAGE_HEADER_SIZE];
        raw_header.copy_from_slice(&page_data[..PAGE_HEADER_SIZE]);
        let mut raw_entry_state_bitmap = [0u8; ENTRY_STATE_BITMAP_SIZE];
        raw_entry_state_bitmap.copy_from_slice(
            &page_data
                [ENTRY_STATE_BITMAP_OFFSET..ENTRY_STATE_BITMAP_OFFSET + ENTRY_STATE_BITMAP_SIZE],
        );

        let is_empty = raw_header.iter().all(|&b| b == 0xFF);
        let header = PageHeader::decode(&raw_header);
        trace!("decoding page @{start_address:#08x}: {header:?}");
        if !is_empty && !header.is_crc_valid() {
            debug!(
                "page @{start_address:#08x}: header CRC mismatch, stored 0x{:08x}, computed 0x{:08x}",
                header.crc.original, header.crc.computed
            );
        }

        let states = decode_entry_states(&raw_entry_state_bitmap);
        let entries = decode_entries(start_address, page_data, &states)?;

        Ok(Page {
            is_empty,
            start_address,
            raw_header,
            raw_entry_state_bitmap,
            header,
            entries,
        })
    }

    /// The state of every entry slot as recorded in the bitmap.
    pub fn entry_states(&self) -> [EntryState; ENTRIES_PER_PAGE] {
        decode_entry_states(&self.raw_entry_state_bitmap)
    }

    /// Primary entries whose bitmap state is `Written`.
    pub fn written_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Written)
    }
}

/// Four 2 bit codes per byte, least significant pair first. The last two codes of the bitmap
/// have no slot and are dropped.
fn decode_entry_states(
    bitmap: &[u8; ENTRY_STATE_BITMAP_SIZE],
) -> [EntryState; ENTRIES_PER_PAGE] {
    let codes_per_byte = ENTRY_STATE_BITMAP_CODES / ENTRY_STATE_BITMAP_SIZE;
    let mut states = [EntryState::Empty; ENTRIES_PER_PAGE];
    for (idx, state) in states.iter_mut().enumerate() {
        let bitmap_byte = bitmap[idx / codes_per_byte];
        let bit_offset = (idx % codes_per_byte) * 2;
        *state = EntryState::from(bitmap_byte >> bit_offset);
    }
    states
}

fn decode_entries(
    start_address: usize,
    page_data: &[u8],
    states: &[EntryState; ENTRIES_PER_PAGE],
) -> Result<Vec<Entry>, Error> {
    let mut entries = Vec::new();

    // slots 0 and 1 hold the header and the bitmap
    let mut slot = 2;
    while slot < SLOTS_PER_PAGE {
        let entry_idx = slot - 2;
        let mut entry = Entry::decode(entry_idx, slot_bytes(page_data, slot), states[entry_idx])?;
        let span = entry.metadata.span as usize;

        for child_slot in slot + 1..slot + span {
            if child_slot >= SLOTS_PER_PAGE {
                debug!(
                    "page @{start_address:#08x}, entry {entry_idx}: span {span} exceeds page boundary"
                );
                break;
            }
            let child_idx = child_slot - 2;
            let child = Entry::decode(child_idx, slot_bytes(page_data, child_slot), states[child_idx])?;
            entry.child_assign(child);
        }
        if span != 1 {
            entry.compute_crc();
        }

        if entry.state == EntryState::Written {
            log_anomalies(start_address, &entry);
        }
        entries.push(entry);
        slot += span;
    }

    Ok(entries)
}

fn slot_bytes(page_data: &[u8], slot: usize) -> &[u8] {
    &page_data[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE]
}

fn log_anomalies(start_address: usize, entry: &Entry) {
    let entry_idx = entry.index;
    if !entry.is_crc_valid() {
        debug!(
            "page @{start_address:#08x}, entry {entry_idx}: CRC mismatch, stored 0x{:08x}, computed 0x{:08x}",
            entry.metadata.crc.original, entry.metadata.crc.computed
        );
    }
    if entry.is_data_crc_valid() == Some(false) {
        debug!("page @{start_address:#08x}, entry {entry_idx}: data CRC mismatch");
    }
    if let ItemType::Unknown(code) = entry.metadata.item_type {
        debug!("page @{start_address:#08x}, entry {entry_idx}: unknown item type 0x{code:02x}");
    }
    if entry.key.is_none() {
        debug!("page @{start_address:#08x}, entry {entry_idx}: key is not ASCII");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::crc::{
        crc32,
        crc32_entry,
    };
    use crate::entry::EntryData;

    fn active_page() -> Vec<u8> {
        let mut page = vec![0xFFu8; PAGE_SIZE];
        page[0..4].copy_from_slice(&PAGE_STATE_ACTIVE.to_le_bytes());
        page[4..8].copy_from_slice(&7u32.to_le_bytes());
        page[8] = 0xFE;
        let crc = crc32_page_header(&page).unwrap();
        page[28..32].copy_from_slice(&crc.to_le_bytes());
        page
    }

    fn set_state(page: &mut [u8], entry_idx: usize, state: u8) {
        let byte = &mut page[ENTRY_STATE_BITMAP_OFFSET + entry_idx / 4];
        let shift = (entry_idx % 4) * 2;
        *byte = (*byte & !(0b11 << shift)) | (state << shift);
    }

    fn write_entry(page: &mut [u8], entry_idx: usize, item_type: u8, span: u8, key: &[u8], data: [u8; 8]) {
        let offset = (entry_idx + 2) * ENTRY_SIZE;
        let raw = &mut page[offset..offset + ENTRY_SIZE];
        raw.fill(0);
        raw[0] = 1;
        raw[1] = item_type;
        raw[2] = span;
        raw[3] = 0xFF;
        raw[8..8 + key.len()].copy_from_slice(key);
        raw[24..32].copy_from_slice(&data);
        let crc = crc32_entry(raw).unwrap();
        raw[4..8].copy_from_slice(&crc.to_le_bytes());
        set_state(page, entry_idx, ENTRY_STATE_WRITTEN);
    }

    #[test]
    fn erased_page() {
        let page = Page::decode(0x3000, &[0xFF; PAGE_SIZE]).unwrap();
        assert!(page.is_empty);
        assert_eq!(page.start_address, 0x3000);
        assert_eq!(page.header.status, PageStatus::Empty);
        assert_eq!(page.header.version, 0);
        assert_eq!(page.entries.len(), ENTRIES_PER_PAGE);
        assert!(page.entries.iter().all(|e| e.is_empty && e.state == EntryState::Empty));
        assert_eq!(page.written_entries().count(), 0);
    }

    #[test]
    fn header_fields() {
        let page = Page::decode(0, &active_page()).unwrap();
        assert!(!page.is_empty);
        assert_eq!(page.header.status, PageStatus::Active);
        assert_eq!(page.header.page_index, 7);
        assert_eq!(page.header.version, 1);
        assert!(page.header.is_crc_valid());
        assert_eq!(&page.raw_header[..], &active_page()[..32]);
    }

    #[test]
    fn header_crc_mismatch_is_recorded() {
        let mut data = active_page();
        data[4] = 8;
        let page = Page::decode(0, &data).unwrap();
        assert_eq!(page.header.page_index, 8);
        assert!(!page.header.is_crc_valid());
        assert_eq!(page.header.crc.computed, crc32(CRC_SEED, &data[4..28]));
    }

    #[test]
    fn bitmap_order() {
        let mut data = active_page();
        set_state(&mut data, 0, ENTRY_STATE_WRITTEN);
        set_state(&mut data, 1, ENTRY_STATE_ERASED);
        set_state(&mut data, 2, ENTRY_STATE_ILLEGAL);
        set_state(&mut data, 125, ENTRY_STATE_WRITTEN);
        assert_eq!(data[32], 0b11_01_00_10);

        let page = Page::decode(0, &data).unwrap();
        let states = page.entry_states();
        assert_eq!(states.len(), ENTRIES_PER_PAGE);
        assert_eq!(states[0], EntryState::Written);
        assert_eq!(states[1], EntryState::Erased);
        assert_eq!(states[2], EntryState::Invalid);
        assert_eq!(states[3], EntryState::Empty);
        assert_eq!(states[125], EntryState::Written);
        assert_eq!(page.entries[125].state, EntryState::Written);
    }

    #[test]
    fn spanning_entry_owns_its_children() {
        let mut data = active_page();
        write_entry(&mut data, 0, 0x01, 1, b"first", [9, 0, 0, 0, 0, 0, 0, 0]);

        let payload = b"hello";
        let mut header = [0xFFu8; 8];
        header[0..2].copy_from_slice(&5u16.to_le_bytes());
        header[4..8].copy_from_slice(&crc32(CRC_SEED, payload).to_le_bytes());
        write_entry(&mut data, 1, 0x21, 2, b"greeting", header);
        let child = (2 + 2) * ENTRY_SIZE;
        data[child..child + payload.len()].copy_from_slice(payload);
        set_state(&mut data, 2, ENTRY_STATE_WRITTEN);

        write_entry(&mut data, 3, 0x11, 1, b"last", [0xFF, 0, 0, 0, 0, 0, 0, 0]);

        let page = Page::decode(0, &data).unwrap();
        let written: Vec<_> = page.written_entries().collect();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0].data, Some(EntryData::U8(9)));

        let string = written[1];
        assert_eq!(string.index, 1);
        assert_eq!(string.children.len(), 1);
        assert_eq!(string.children[0].index, 2);
        assert_eq!(string.as_str().as_deref(), Some("hello"));
        assert_eq!(string.is_data_crc_valid(), Some(true));

        assert_eq!(written[2].index, 3);
        assert_eq!(written[2].data, Some(EntryData::I8(-1)));

        // 126 slots, one of them consumed as a child
        assert_eq!(page.entries.len(), ENTRIES_PER_PAGE - 1);
        let indices: Vec<usize> = page.entries.iter().map(|e| e.index).collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn span_past_page_end_is_truncated() {
        let mut data = active_page();
        write_entry(&mut data, 123, 0x42, 10, b"tail", [0x40, 0, 0xFF, 0xFF, 0, 0, 0, 0]);

        let page = Page::decode(0, &data).unwrap();
        let last = page.entries.last().unwrap();
        assert_eq!(last.index, 123);
        assert_eq!(last.metadata.span, 10);
        assert_eq!(last.children.len(), 2);
        assert_eq!(last.children[1].index, 125);
        assert!(last.is_truncated());
        assert!(last.metadata.crc.data_computed.is_some());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Page::decode(0x1000, &[0xFF; PAGE_SIZE - 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::PageNotAligned {
                address: 0x1000,
                len: 4095
            }
        ));
    }
}
