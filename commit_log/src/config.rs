use crate::segment::index::ENTRY_WIDTH;
use crate::segment::store::LEN_WIDTH;
use crate::Error;

/// Default store bound: 64 records of 25 payload bytes plus framing.
pub(crate) const DEFAULT_MAX_STORE_BYTES: u64 = 64 * (25 + LEN_WIDTH);

/// Default index bound: 64 entries.
pub(crate) const DEFAULT_MAX_INDEX_BYTES: u64 = 64 * ENTRY_WIDTH;

/// Bounds for a single segment, and the base offset used on cold start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Maximum bytes in one store file. `0` picks the default.
    pub max_store_bytes: u64,

    /// Maximum bytes in one index file. `0` picks the default; other
    /// values are rounded down to whole entries.
    pub max_index_bytes: u64,

    /// Base offset of the very first segment in an empty directory.
    pub initial_offset: u64,
}

/// Log-wide configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub segment: SegmentConfig,
}

impl Config {
    /// Apply defaults and round the index bound down to whole entries.
    pub(crate) fn normalized(mut self) -> Result<Self, Error> {
        if self.segment.max_store_bytes == 0 {
            self.segment.max_store_bytes = DEFAULT_MAX_STORE_BYTES;
        }
        if self.segment.max_index_bytes == 0 {
            self.segment.max_index_bytes = DEFAULT_MAX_INDEX_BYTES;
        }
        self.segment.max_index_bytes -= self.segment.max_index_bytes % ENTRY_WIDTH;
        if self.segment.max_index_bytes < ENTRY_WIDTH {
            return Err(Error::InvalidConfig(
                "max_index_bytes must fit at least one 12-byte entry",
            ));
        }
        Ok(self)
    }
}
