use crate::model::Ms;

/// Upper bound for each buffer duration: one week.
pub const MAX_BUFFER_MINUTES: u32 = 7 * 24 * 60;

/// 0001-01-01T00:00 in civil milliseconds.
pub const MIN_VALID_TIMESTAMP_MS: Ms = -62_135_596_800_000;
/// 9999-12-31T23:59:59.999 in civil milliseconds.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_ASSIGNMENTS_PER_TABLE: usize = 100_000;
pub const MAX_TABLES: usize = 10_000;
