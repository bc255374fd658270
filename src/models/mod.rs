pub mod enums;
pub mod intake;
pub mod medication;
pub mod trigger;

pub use enums::IntakeStatus;
pub use intake::IntakeRecord;
pub use medication::{MedicationSchedule, TimeSlot};
pub use trigger::{PendingTrigger, TriggerPayload};
