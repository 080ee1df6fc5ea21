//! Tuning constants of the engine.

/// Maximum payload of a single block-data record.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Maximum size of a block-data header (`TC_BLOCKDATALONG` + 4-byte length).
pub const MAX_HEADER_SIZE: usize = 5;

/// Largest block length encodable with the short `TC_BLOCKDATA` header.
pub const SHORT_BLOCK_MAX: usize = 0xFF;

/// Largest string length that fits a `TC_STRING` record; longer strings use `TC_LONGSTRING`.
pub const MAX_SHORT_UTF: u64 = 0xFFFF;

/// Initial bucket and entry capacity of the write-side handle tables.
pub const HANDLE_TABLE_CAPACITY: usize = 10;

/// Load factor of the write-side handle tables before the spine grows.
pub const HANDLE_TABLE_LOAD_FACTOR: f32 = 3.0;

/// Initial entry capacity of the read-side handle table.
pub const READ_HANDLE_CAPACITY: usize = 10;

/// Upper bound on the interface count of a proxy descriptor.
pub const MAX_PROXY_INTERFACES: i32 = 65535;

/// Elements preallocated for an array before its contents are read.
///
/// Larger arrays grow while reading, so a forged length cannot force a huge allocation up front.
pub const ARRAY_PREALLOC_LIMIT: usize = 1 << 16;

/// Upper bound on cached stream-to-local field matches; later matches are not cached.
pub const MAX_CACHED_FIELD_MATCHES: usize = 4096;

/// Environment variable holding the process-wide filter pattern.
pub const SERIAL_FILTER_ENV: &str = "OBJSTREAM_SERIAL_FILTER";
