/// Rooms per store. Rooms are reference data, so this stays small.
pub const MAX_ROOMS: usize = 1_000;

/// Longest stay a guest can search for or book, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Restrictions (reservations + owner blocks) kept per room.
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;

pub const MAX_ROOM_NAME_LEN: usize = 256;

/// Calendar years the engine accepts.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

/// Block toggles accepted from one calendar submission.
pub const MAX_BLOCK_KEYS: usize = 10_000;
