use crate::consts::{
    CRC_SEED,
    ENTRY_CRC_OFFSET,
    ENTRY_KEY_OFFSET,
    ENTRY_SIZE,
    PAGE_HEADER_CRC_OFFSET,
    PAGE_HEADER_INDEX_OFFSET,
};

/// CRC32 using the IEEE 802.3 polynomial, continuing from `init`.
///
/// Behaves like zlib's `crc32(init, data)` and the ESP ROM `crc32_le`. NVS always passes
/// [`CRC_SEED`] as `init`.
pub fn crc32(init: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(init);
    hasher.update(data);
    hasher.finalize()
}

/// Compute an NVS entry CRC over all bytes except the CRC field at offset 4..8.
///
/// Returns `None` if `entry` is shorter than one entry.
pub fn crc32_entry(entry: &[u8]) -> Option<u32> {
    if entry.len() < ENTRY_SIZE {
        return None;
    }
    let mut hasher = crc32fast::Hasher::new_with_initial(CRC_SEED);
    hasher.update(&entry[..ENTRY_CRC_OFFSET]);
    hasher.update(&entry[ENTRY_KEY_OFFSET..ENTRY_SIZE]);
    Some(hasher.finalize())
}

/// Compute the page header CRC over bytes 4..28 (sequence number, version and reserved bytes).
///
/// Returns `None` if `header` is shorter than the page header.
pub fn crc32_page_header(header: &[u8]) -> Option<u32> {
    header
        .get(PAGE_HEADER_INDEX_OFFSET..PAGE_HEADER_CRC_OFFSET)
        .map(|interesting_parts| crc32(CRC_SEED, interesting_parts))
}
