mod error;
mod grid;
mod overlap;
mod planner;
mod policy;
mod staff;

pub use error::ScheduleError;
pub use grid::{GridConfig, TimeGrid};
pub use overlap::{AppointmentOverlapIndex, OverlapRule};
pub use planner::{AssignmentMode, DayPlanner, DayRequest, DaySchedule};
pub use policy::{SlotAssignmentPolicy, validate_duration};
pub use staff::{BookingScope, EligibleStaffResolver, StaffOrdering};
