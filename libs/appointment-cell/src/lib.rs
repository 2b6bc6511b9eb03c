pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod validation;

pub use error::{Entity, SchedulingError};
pub use models::*;
pub use services::*;
pub use store::{AppointmentStore, InMemoryStore, PostgrestStore, StoreError};
