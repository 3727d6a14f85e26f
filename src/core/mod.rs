/// Core Module for otpgate
///
/// The persistence core and the infrastructure shared by the rest of the
/// crate: database access, the entity base with its validation pipeline,
/// error handling and log sinks.
pub mod db;
pub mod error;
pub mod log;
pub mod model;
pub mod rules;

// Re-export commonly used types for convenience
pub use error::{OtpgateError, Result};
