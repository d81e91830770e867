#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType,
    NorFlashError,
    NorFlashErrorKind,
    ReadNorFlash,
};

pub const FLASH_SECTOR_SIZE: usize = 4096;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub const WORD_SIZE: usize = 4;
pub const PAGE_HEADER_SIZE: usize = 32;
pub const ENTRY_STATE_MAP_OFFSET: usize = PAGE_HEADER_SIZE;
pub const ENTRY_STATE_MAP_SIZE: usize = 32;
pub const ITEM_OFFSET: usize = PAGE_HEADER_SIZE + ENTRY_STATE_MAP_SIZE;
pub const ITEM_SIZE: usize = 32;

pub const PAGE_STATE_EMPTY: u32 = 0xFFFFFFFF;
pub const PAGE_STATE_ACTIVE: u32 = 0xFFFFFFFE;
pub const PAGE_STATE_FULL: u32 = 0xFFFFFFFC;
pub const PAGE_STATE_ERASING: u32 = 0xFFFFFFF8;
pub const PAGE_STATE_CORRUPT: u32 = 0x00000000;

pub const STATE_EMPTY: u8 = 0b11;
pub const STATE_WRITTEN: u8 = 0b10;
pub const STATE_ERASED: u8 = 0b00;

/// zlib's crc32 with the seed used by NVS, independent of the crate under test.
pub fn nvs_crc32(data: &[u8]) -> u32 {
    unsafe { libz_sys::crc32(u32::MAX as _, data.as_ptr(), data.len() as _) as u32 }
}

pub fn entry_crc32(raw: &[u8]) -> u32 {
    let mut combined = Vec::with_capacity(28);
    combined.extend_from_slice(&raw[0..4]);
    combined.extend_from_slice(&raw[8..32]);
    nvs_crc32(&combined)
}

/// Builds a single page byte by byte with valid checksums unless told otherwise.
pub struct PageBuilder {
    pub buf: Vec<u8>,
}

impl PageBuilder {
    /// An erased page.
    pub fn erased() -> Self {
        Self {
            buf: vec![0xFFu8; FLASH_SECTOR_SIZE],
        }
    }

    /// An initialized page of format version 2 (stored as 0xFE).
    pub fn new(state: u32, page_index: u32) -> Self {
        let mut page = Self::erased();
        page.buf[0..4].copy_from_slice(&state.to_le_bytes());
        page.buf[4..8].copy_from_slice(&page_index.to_le_bytes());
        page.buf[8] = 0xFE;
        page.fix_header_crc();
        page
    }

    pub fn fix_header_crc(&mut self) -> &mut Self {
        let crc = nvs_crc32(&self.buf[4..28]);
        self.buf[28..32].copy_from_slice(&crc.to_le_bytes());
        self
    }

    pub fn set_state(&mut self, entry_idx: usize, state: u8) -> &mut Self {
        let byte = &mut self.buf[ENTRY_STATE_MAP_OFFSET + entry_idx / 4];
        let shift = (entry_idx % 4) * 2;
        *byte = (*byte & !(0b11 << shift)) | (state << shift);
        self
    }

    pub fn entry_offset(entry_idx: usize) -> usize {
        ITEM_OFFSET + entry_idx * ITEM_SIZE
    }

    pub fn raw_entry(&mut self, entry_idx: usize) -> &mut [u8] {
        let offset = Self::entry_offset(entry_idx);
        &mut self.buf[offset..offset + ITEM_SIZE]
    }

    /// Write a header entry and mark it as written.
    pub fn item(
        &mut self,
        entry_idx: usize,
        namespace: u8,
        item_type: u8,
        span: u8,
        chunk_index: u8,
        key: &str,
        data: [u8; 8],
    ) -> &mut Self {
        assert!(key.len() <= 16);
        let raw = self.raw_entry(entry_idx);
        raw[0] = namespace;
        raw[1] = item_type;
        raw[2] = span;
        raw[3] = chunk_index;
        raw[8..24].fill(0);
        raw[8..8 + key.len()].copy_from_slice(key.as_bytes());
        raw[24..32].copy_from_slice(&data);
        let crc = entry_crc32(raw);
        raw[4..8].copy_from_slice(&crc.to_le_bytes());
        self.set_state(entry_idx, STATE_WRITTEN)
    }

    pub fn namespace(&mut self, entry_idx: usize, name: &str, ns_idx: u8) -> &mut Self {
        let mut data = [0xFFu8; 8];
        data[0] = ns_idx;
        self.item(entry_idx, 0, 0x01, 1, 0xFF, name, data)
    }

    pub fn primitive(
        &mut self,
        entry_idx: usize,
        namespace: u8,
        item_type: u8,
        key: &str,
        value: u64,
    ) -> &mut Self {
        let width = (item_type & 0x0F) as usize;
        let mut data = [0xFFu8; 8];
        data[..width].copy_from_slice(&value.to_le_bytes()[..width]);
        self.item(entry_idx, namespace, item_type, 1, 0xFF, key, data)
    }

    /// Header entry followed by the payload in as many continuation slots as needed.
    pub fn sized(
        &mut self,
        entry_idx: usize,
        namespace: u8,
        item_type: u8,
        chunk_index: u8,
        key: &str,
        payload: &[u8],
    ) -> &mut Self {
        let children = payload.len().div_ceil(ITEM_SIZE);
        let mut data = [0xFFu8; 8];
        data[0..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        data[4..8].copy_from_slice(&nvs_crc32(payload).to_le_bytes());
        self.item(
            entry_idx,
            namespace,
            item_type,
            (children + 1) as u8,
            chunk_index,
            key,
            data,
        );

        for (i, chunk) in payload.chunks(ITEM_SIZE).enumerate() {
            let child_idx = entry_idx + 1 + i;
            let raw = self.raw_entry(child_idx);
            raw.fill(0xFF);
            raw[..chunk.len()].copy_from_slice(chunk);
            self.set_state(child_idx, STATE_WRITTEN);
        }
        self
    }

    /// A string entry, stored with its null terminator like ESP-IDF does.
    pub fn string(&mut self, entry_idx: usize, namespace: u8, key: &str, value: &str) -> &mut Self {
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        self.sized(entry_idx, namespace, 0x21, 0xFF, key, &payload)
    }

    pub fn blob_data(
        &mut self,
        entry_idx: usize,
        namespace: u8,
        key: &str,
        chunk_index: u8,
        payload: &[u8],
    ) -> &mut Self {
        self.sized(entry_idx, namespace, 0x42, chunk_index, key, payload)
    }

    pub fn blob_index(
        &mut self,
        entry_idx: usize,
        namespace: u8,
        key: &str,
        size: u32,
        chunk_count: u8,
        chunk_start: u8,
    ) -> &mut Self {
        let mut data = [0xFFu8; 8];
        data[0..4].copy_from_slice(&size.to_le_bytes());
        data[4] = chunk_count;
        data[5] = chunk_start;
        self.item(entry_idx, namespace, 0x48, 1, 0xFF, key, data)
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

pub fn concat_pages(pages: &[&PageBuilder]) -> Vec<u8> {
    pages.iter().flat_map(|page| page.buf.iter().copied()).collect()
}

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
}

impl Flash {
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            buf,
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(buf: Vec<u8>, fail_after_operation: usize) -> Self {
        Self {
            buf,
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug)]
pub struct FlashError(NorFlashErrorKind);

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        self.0
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        if self.operations.len() >= self.fail_after_operation {
            return Err(FlashError(NorFlashErrorKind::Other));
        }
        let offset_usize = offset as usize;
        if offset_usize + bytes.len() > self.buf.len() {
            return Err(FlashError(NorFlashErrorKind::OutOfBounds));
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        bytes.copy_from_slice(&self.buf[offset_usize..offset_usize + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}
