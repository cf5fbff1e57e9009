pub const MAX_ROOMS: usize = 10_000;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_ATTRIBUTES_PER_ROOM: usize = 64;
pub const MAX_WINDOWS_PER_ROOM: usize = 7 * 24;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Candidate reservations in one booking request.
pub const MAX_BATCH_SIZE: usize = 366;

/// A single reservation may not be longer than this.
pub const MAX_SPAN_DAYS: i64 = 31;

/// Open-slot queries may not cover more than this.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

pub const MAX_REFERENCE_PATH_LEN: usize = 1024;
pub const MAX_TITLE_LEN: usize = 255;

/// Upper bound of one protocol line in bytes.
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Reservations and queries must fall within these calendar years.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

/// Largest WAL record accepted on replay, in bytes.
pub const MAX_WAL_RECORD_LEN: usize = 64 << 20;
