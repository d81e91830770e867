use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use embedded_storage::nor_flash::{
    NorFlashError,
    ReadNorFlash,
};
use log::debug;
use serde::Serialize;

use crate::consts::{
    NAMESPACE_DEFINITION_INDEX,
    PAGE_SIZE,
};
use crate::entry::EntryData;
use crate::error::Error;
use crate::page::Page;
use crate::raw::{
    EntryState,
    PageStatus,
};

/// A decoded NVS partition image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub name: String,
    #[serde(skip)]
    pub raw_data: Vec<u8>,
    /// Pages in physical order.
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub pages: PageStatistics,
    pub entries_per_page: Vec<EntryStatistics>,
    pub entries_overall: EntryStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageStatistics {
    pub empty: u16,
    pub active: u16,
    pub full: u16,
    pub erasing: u16,
    pub corrupted: u16,
    pub invalid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryStatistics {
    pub empty: u32,
    pub written: u32,
    pub erased: u32,
    pub illegal: u32,
}

impl EntryStatistics {
    fn add(&mut self, other: &EntryStatistics) {
        self.empty += other.empty;
        self.written += other.written;
        self.erased += other.erased;
        self.illegal += other.illegal;
    }
}

impl Partition {
    /// Decode a partition image held in memory.
    ///
    /// The size of `raw_data` has to be a multiple of the page size (4096). An empty buffer
    /// yields a partition without pages.
    pub fn decode(name: impl Into<String>, raw_data: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let name = name.into();
        let raw_data = raw_data.into();

        if !raw_data.len().is_multiple_of(PAGE_SIZE) {
            return Err(Error::PartitionNotAligned(raw_data.len()));
        }

        let pages = raw_data
            .chunks_exact(PAGE_SIZE)
            .enumerate()
            .map(|(page_idx, page_data)| Page::decode(page_idx * PAGE_SIZE, page_data))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("decoded partition '{name}': {} pages", pages.len());

        Ok(Partition {
            name,
            raw_data,
            pages,
        })
    }

    /// Read and decode a partition dump. The partition is named after the file stem.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw_data = fs::read(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::decode(name, raw_data)
    }

    /// Read `size` bytes at `offset` from `flash` page by page and decode them.
    ///
    /// `offset` has to be aligned to the page size and `size` a multiple of it.
    pub fn from_flash<F: ReadNorFlash>(
        name: impl Into<String>,
        flash: &mut F,
        offset: usize,
        size: usize,
    ) -> Result<Self, Error> {
        if !offset.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidPartitionOffset(offset));
        }
        if !size.is_multiple_of(PAGE_SIZE) {
            return Err(Error::PartitionNotAligned(size));
        }

        let mut raw_data = vec![0xFFu8; size];
        for (page_idx, page) in raw_data.chunks_exact_mut(PAGE_SIZE).enumerate() {
            let page_offset = offset + page_idx * PAGE_SIZE;
            let flash_offset =
                u32::try_from(page_offset).map_err(|_| Error::InvalidPartitionOffset(offset))?;
            flash.read(flash_offset, page).map_err(|e| Error::Flash {
                offset: page_offset,
                kind: e.kind(),
            })?;
        }

        Self::decode(name, raw_data)
    }

    /// Namespace names by index, taken from the namespace definitions (written U8 entries with a
    /// valid CRC in namespace 0).
    pub fn namespaces(&self) -> BTreeMap<u8, String> {
        self.pages
            .iter()
            .flat_map(|page| page.written_entries())
            .filter(|entry| {
                entry.metadata.namespace == NAMESPACE_DEFINITION_INDEX && entry.is_crc_valid()
            })
            .filter_map(|entry| match (&entry.key, entry.data) {
                (Some(name), Some(EntryData::U8(ns_idx))) => Some((ns_idx, name.clone())),
                _ => None,
            })
            .collect()
    }

    /// Count pages per status and entry slots per bitmap state.
    pub fn statistics(&self) -> Statistics {
        let mut statistics = Statistics::default();

        for page in &self.pages {
            match page.header.status {
                PageStatus::Empty => statistics.pages.empty += 1,
                PageStatus::Active => statistics.pages.active += 1,
                PageStatus::Full => statistics.pages.full += 1,
                PageStatus::Erasing => statistics.pages.erasing += 1,
                PageStatus::Corrupted => statistics.pages.corrupted += 1,
                PageStatus::Invalid => statistics.pages.invalid += 1,
            }

            let mut entries = EntryStatistics::default();
            for state in page.entry_states() {
                match state {
                    EntryState::Empty => entries.empty += 1,
                    EntryState::Written => entries.written += 1,
                    EntryState::Erased => entries.erased += 1,
                    EntryState::Invalid => entries.illegal += 1,
                }
            }
            statistics.entries_overall.add(&entries);
            statistics.entries_per_page.push(entries);
        }

        statistics
    }
}
