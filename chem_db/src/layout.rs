//! Sets constants for the disk layout


use std::mem::size_of;

/// First bytes of the record file.
pub const RECORD_MAGIC: [u8; 4] = *b"CSDB";

/// First bytes of the screening index file.
pub const SCREEN_MAGIC: [u8; 4] = *b"CSIX";

/// Bumped whenever the on-disk framing changes. A mismatch at open is a hard error.
pub const FORMAT_VERSION: u32 = 1;

pub const MAGIC_START: usize = 0;
pub const MAGIC_SIZE: usize = 4;

pub const VERSION_START: usize = MAGIC_START + MAGIC_SIZE;
pub const VERSION_SIZE: usize = size_of::<u32>();

/// Running count of committed entries, rewritten after every append.
pub const COUNT_CURSOR_START: usize = VERSION_START + VERSION_SIZE;
pub const COUNT_CURSOR_SIZE: usize = size_of::<u64>();

pub const FILE_DATA_START: usize = COUNT_CURSOR_START + COUNT_CURSOR_SIZE;

pub const ENTRY_ID_SIZE: usize = size_of::<u64>();
pub const ENTRY_PAYLOAD_LEN_SIZE: usize = size_of::<u32>();
pub const ENTRY_HEADER_SIZE: usize = ENTRY_ID_SIZE + ENTRY_PAYLOAD_LEN_SIZE;
