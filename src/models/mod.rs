pub mod appointment;
pub mod contact;
pub mod integration;
pub mod interval;
pub mod profile;

pub use appointment::{Appointment, AppointmentMetadata, AppointmentStatus};
pub use contact::Contact;
pub use integration::{CalendarIntegration, ProviderKind};
pub use interval::{BusyInterval, Slot};
pub use profile::{AvailabilityProfile, ProviderPreference, ScheduleWindow, WeeklySchedule};
