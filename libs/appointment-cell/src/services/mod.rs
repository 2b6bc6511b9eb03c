pub mod interval;
pub mod conflict;
pub mod slots;
pub mod lifecycle;
pub mod scheduling;

pub use conflict::ConflictDetectionService;
pub use lifecycle::AppointmentLifecycleService;
pub use scheduling::SchedulingAgent;
pub use slots::{AvailabilityService, SlotGenerator};
