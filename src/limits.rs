/// Longest accepted resource name.
pub const MAX_NAME_LEN: usize = 128;

/// Longest accepted requester name.
pub const MAX_REQUESTER_LEN: usize = 256;

/// Bookings the in-memory store will hold.
pub const MAX_BOOKINGS: usize = 100_000;

/// Rows in a single multi-row INSERT.
pub const MAX_BATCH_SIZE: usize = 256;

/// Entries in the resource catalog.
pub const MAX_RESOURCES: usize = 1_000;

/// Free-text search needle.
pub const MAX_SEARCH_LEN: usize = 256;
