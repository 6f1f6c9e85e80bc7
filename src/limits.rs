use crate::model::Ms;

pub const MAX_STAFF: usize = 10_000;
pub const MAX_SERVICES: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_STAFF: usize = 200_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CATEGORY_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_CLIENT_ID_LEN: usize = 128;
pub const MAX_BREAKS_PER_DAY: usize = 16;

pub const MIN_STEP_MINUTES: u32 = 5;
pub const MAX_STEP_MINUTES: u32 = 240;
pub const MAX_SERVICE_MINUTES: u32 = 720;
pub const MAX_LEAD_MINUTES: u32 = 7 * 24 * 60;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
