use crate::model::Ms;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_LOCATIONS_PER_BUSINESS: usize = 4_096;
pub const MAX_STAFF_PER_BUSINESS: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_LOCATION: usize = 200_000;
pub const MAX_PARTICIPANTS_PER_APPOINTMENT: usize = 16;
pub const MAX_NAME_LEN: usize = 256;

/// Longest appointment, time off included: 31 days.
pub const MAX_APPOINTMENT_MINUTES: u32 = 31 * 24 * 60;

/// Widest `list_appointments` window: 62 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 62 * 24 * 3_600_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
