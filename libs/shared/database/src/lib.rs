pub mod postgrest;

pub use postgrest::{DatabaseError, PostgrestClient};
