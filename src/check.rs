//! Integrity check over a decoded partition.
//!
//! Decoding never fails on corrupted content, it only records what it found. This module walks
//! the decoded tree and turns those records into a list of [`Finding`]s.

use std::collections::{
    BTreeMap,
    HashMap,
};
use std::fmt;

use serde::Serialize;

use crate::entry::{
    Entry,
    EntryData,
};
use crate::partition::Partition;
use crate::raw::{
    EntryState,
    ItemType,
    PageStatus,
};

#[derive(strum::Display, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// Something suspicious at a page, or an entry within that page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Position of the page within the partition.
    pub page: usize,
    /// Slot index of the entry within the page.
    pub entry: Option<usize>,
    pub kind: FindingKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    PageHeaderCrcMismatch { original: u32, computed: u32 },
    PageCorrupted,
    PageInvalidStatus { status: u32 },
    DuplicatePageIndex { page_index: u32, first_page: usize },
    NonEmptyPageWithEmptyHeader,
    EntryCrcMismatch { original: u32, computed: u32 },
    InvalidKey,
    UnknownItemType { code: u8 },
    SpanTruncated { span: u8, children: usize },
    ChildNotWritten { child: usize, state: EntryState },
    DataCrcMismatch { original: u32, computed: u32 },
    UnknownNamespace { namespace: u8 },
    MissingBlobChunk { key: String, chunk_index: u8 },
    BlobSizeMismatch { key: String, expected: u32, actual: u32 },
    OrphanBlobData { key: String, chunk_index: u8 },
}

impl FindingKind {
    pub fn severity(&self) -> Severity {
        match self {
            FindingKind::UnknownNamespace { .. } | FindingKind::OrphanBlobData { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageHeaderCrcMismatch { original, computed } => write!(
                f,
                "page header CRC mismatch: stored 0x{original:08x}, computed 0x{computed:08x}"
            ),
            Self::PageCorrupted => f.write_str("page is marked corrupted"),
            Self::PageInvalidStatus { status } => write!(f, "unknown page state 0x{status:08x}"),
            Self::DuplicatePageIndex {
                page_index,
                first_page,
            } => write!(f, "page index {page_index} already used by page {first_page}"),
            Self::NonEmptyPageWithEmptyHeader => {
                f.write_str("page header is erased but the entry state bitmap is not")
            }
            Self::EntryCrcMismatch { original, computed } => write!(
                f,
                "entry CRC mismatch: stored 0x{original:08x}, computed 0x{computed:08x}"
            ),
            Self::InvalidKey => f.write_str("key is not ASCII"),
            Self::UnknownItemType { code } => write!(f, "unknown item type 0x{code:02x}"),
            Self::SpanTruncated { span, children } => write!(
                f,
                "span {span} exceeds page boundary, only {children} continuation entries read"
            ),
            Self::ChildNotWritten { child, state } => {
                write!(f, "continuation entry {child} is {state}, expected Written")
            }
            Self::DataCrcMismatch { original, computed } => write!(
                f,
                "data CRC mismatch: stored 0x{original:08x}, computed 0x{computed:08x}"
            ),
            Self::UnknownNamespace { namespace } => {
                write!(f, "namespace index {namespace} is not defined")
            }
            Self::MissingBlobChunk { key, chunk_index } => {
                write!(f, "blob '{key}' is missing chunk {chunk_index}")
            }
            Self::BlobSizeMismatch {
                key,
                expected,
                actual,
            } => write!(f, "blob '{key}' announces {expected} bytes but chunks hold {actual}"),
            Self::OrphanBlobData { key, chunk_index } => {
                write!(f, "blob data '{key}' chunk {chunk_index} has no blob index")
            }
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Some(entry) => write!(
                f,
                "{}: page {}, entry {}: {}",
                self.severity, self.page, entry, self.kind
            ),
            None => write!(f, "{}: page {}: {}", self.severity, self.page, self.kind),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct BlobKey {
    namespace: u8,
    key: String,
}

struct BlobIndexInfo {
    page: usize,
    entry: usize,
    size: u32,
    chunk_count: u8,
    chunk_start: u8,
}

struct BlobChunkInfo {
    page: usize,
    entry: usize,
    size: u16,
}

#[derive(Default)]
struct Checker {
    findings: Vec<Finding>,
    blob_indices: BTreeMap<BlobKey, BlobIndexInfo>,
    blob_chunks: BTreeMap<BlobKey, BTreeMap<u8, BlobChunkInfo>>,
}

impl Checker {
    fn report(&mut self, page: usize, entry: Option<usize>, kind: FindingKind) {
        self.findings.push(Finding {
            severity: kind.severity(),
            page,
            entry,
            kind,
        });
    }

    fn check_entry(&mut self, page: usize, entry: &Entry, namespaces: &BTreeMap<u8, String>) {
        let at = Some(entry.index);
        let crc = entry.metadata.crc;

        if !entry.is_crc_valid() {
            self.report(
                page,
                at,
                FindingKind::EntryCrcMismatch {
                    original: crc.original,
                    computed: crc.computed,
                },
            );
            return;
        }
        let Some(key) = entry.key.clone() else {
            self.report(page, at, FindingKind::InvalidKey);
            return;
        };
        if let ItemType::Unknown(code) = entry.metadata.item_type {
            self.report(page, at, FindingKind::UnknownItemType { code });
            return;
        }

        let namespace = entry.metadata.namespace;
        if namespace != 0 && !namespaces.contains_key(&namespace) {
            self.report(page, at, FindingKind::UnknownNamespace { namespace });
        }

        if entry.is_truncated() {
            self.report(
                page,
                at,
                FindingKind::SpanTruncated {
                    span: entry.metadata.span,
                    children: entry.children.len(),
                },
            );
        }
        for child in &entry.children {
            if child.state != EntryState::Written {
                self.report(
                    page,
                    at,
                    FindingKind::ChildNotWritten {
                        child: child.index,
                        state: child.state,
                    },
                );
            }
        }
        if let (Some(false), Some(computed)) = (entry.is_data_crc_valid(), crc.data_computed) {
            self.report(
                page,
                at,
                FindingKind::DataCrcMismatch {
                    original: crc.data_original,
                    computed,
                },
            );
        }

        let blob_key = BlobKey { namespace, key };
        match (entry.metadata.item_type, entry.data) {
            (
                ItemType::BlobIndex,
                Some(EntryData::BlobIndex {
                    size,
                    chunk_count,
                    chunk_start,
                }),
            ) => {
                self.blob_indices.insert(
                    blob_key,
                    BlobIndexInfo {
                        page,
                        entry: entry.index,
                        size,
                        chunk_count,
                        chunk_start,
                    },
                );
            }
            (ItemType::BlobData, Some(EntryData::Sized { size, .. })) => {
                self.blob_chunks.entry(blob_key).or_default().insert(
                    entry.metadata.chunk_index,
                    BlobChunkInfo {
                        page,
                        entry: entry.index,
                        size,
                    },
                );
            }
            _ => {}
        }
    }

    fn check_blobs(&mut self) {
        let blob_indices = std::mem::take(&mut self.blob_indices);
        let mut blob_chunks = std::mem::take(&mut self.blob_chunks);

        for (blob_key, index) in &blob_indices {
            let mut chunks = blob_chunks.remove(blob_key).unwrap_or_default();
            let at = Some(index.entry);

            let mut complete = true;
            let mut actual = 0u32;
            let chunk_end = index.chunk_start as u16 + index.chunk_count as u16;
            for chunk_index in index.chunk_start as u16..chunk_end {
                // chunk indices past u8::MAX cannot be stored
                let Ok(chunk_index) = u8::try_from(chunk_index) else {
                    break;
                };
                match chunks.remove(&chunk_index) {
                    Some(chunk) => actual += chunk.size as u32,
                    None => {
                        complete = false;
                        self.report(
                            index.page,
                            at,
                            FindingKind::MissingBlobChunk {
                                key: blob_key.key.clone(),
                                chunk_index,
                            },
                        );
                    }
                }
            }
            if complete && actual != index.size {
                self.report(
                    index.page,
                    at,
                    FindingKind::BlobSizeMismatch {
                        key: blob_key.key.clone(),
                        expected: index.size,
                        actual,
                    },
                );
            }

            // chunks outside of the announced range belong to an older version of the blob
            if !chunks.is_empty() {
                blob_chunks.insert(blob_key.clone(), chunks);
            }
        }

        for (blob_key, chunks) in blob_chunks {
            for (chunk_index, chunk) in chunks {
                self.report(
                    chunk.page,
                    Some(chunk.entry),
                    FindingKind::OrphanBlobData {
                        key: blob_key.key.clone(),
                        chunk_index,
                    },
                );
            }
        }
    }
}

impl Partition {
    /// Inspect every page and written entry and report what does not add up.
    ///
    /// Erased and empty slots are legitimate history of an append-only store and are not
    /// inspected.
    pub fn check(&self) -> Vec<Finding> {
        let namespaces = self.namespaces();
        let mut checker = Checker::default();
        let mut page_indices: HashMap<u32, usize> = HashMap::new();

        for (page_pos, page) in self.pages.iter().enumerate() {
            if page.is_empty {
                if page
                    .entry_states()
                    .iter()
                    .any(|&state| state != EntryState::Empty)
                {
                    checker.report(page_pos, None, FindingKind::NonEmptyPageWithEmptyHeader);
                }
                continue;
            }

            let header = page.header;
            if !header.is_crc_valid() {
                checker.report(
                    page_pos,
                    None,
                    FindingKind::PageHeaderCrcMismatch {
                        original: header.crc.original,
                        computed: header.crc.computed,
                    },
                );
            }
            match header.status {
                PageStatus::Corrupted => checker.report(page_pos, None, FindingKind::PageCorrupted),
                PageStatus::Invalid => {
                    let mut status = [0u8; 4];
                    status.copy_from_slice(&page.raw_header[..4]);
                    checker.report(
                        page_pos,
                        None,
                        FindingKind::PageInvalidStatus {
                            status: u32::from_le_bytes(status),
                        },
                    );
                }
                _ => {}
            }
            if let Some(&first_page) = page_indices.get(&header.page_index) {
                checker.report(
                    page_pos,
                    None,
                    FindingKind::DuplicatePageIndex {
                        page_index: header.page_index,
                        first_page,
                    },
                );
            } else {
                page_indices.insert(header.page_index, page_pos);
            }

            for entry in page.written_entries() {
                checker.check_entry(page_pos, entry, &namespaces);
            }
        }

        checker.check_blobs();
        checker.findings
    }
}
