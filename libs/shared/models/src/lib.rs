pub mod appointment;
pub mod auth;
pub mod emr;
pub mod patient;
pub mod practice;

pub use appointment::{Appointment, AppointmentStatus};
pub use auth::User;
pub use emr::{CredentialRecord, EmrProvider, OwnerType};
pub use patient::Patient;
pub use practice::PracticeEmrSettings;
