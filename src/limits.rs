/// Max properties held by one store.
pub const MAX_PROPERTIES: usize = 100_000;

/// Max reservations (any status) kept per property.
pub const MAX_RESERVATIONS_PER_PROPERTY: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;

/// Longest accepted id, in bytes. UUIDs and ULIDs fit comfortably.
pub const MAX_ID_LEN: usize = 128;

pub const MAX_GUEST_NAME_LEN: usize = 256;

/// Upper bound for a property's `max_guests`.
pub const MAX_GUESTS_PER_PROPERTY: u32 = 64;

/// Longest single stay, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Dates outside `[MIN_VALID_YEAR, MAX_VALID_YEAR]` are rejected on the write path.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;

/// Max reservations in one imported snapshot.
pub const MAX_IMPORT_RESERVATIONS: usize = 1_000_000;
