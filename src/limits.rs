use crate::model::Ms;

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_TENANT_ID_LEN: usize = 64;

pub const MAX_SERVICES_PER_BOOKING: usize = 16;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_CANCEL_REASON_LEN: usize = 500;
pub const MAX_BOOKING_DURATION_MINUTES: u32 = 12 * 60;
pub const MAX_BOOKINGS_PER_TENANT: usize = 1_000_000;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const BOOKING_NUMBER_ATTEMPTS: usize = 8;

/// Upper bound for one RPC request line.
pub const MAX_REQUEST_LINE_BYTES: usize = 64 * 1024;

/// Replay refuses frames longer than this; a larger length prefix is corruption.
pub const MAX_WAL_FRAME_BYTES: usize = 16 * 1024 * 1024;
