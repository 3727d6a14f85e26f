//! Domain entities of the OTP registration service.

pub mod otp_code;
pub mod service_attempt;
pub mod service_queue;
pub mod sms_mock;
pub mod user;
pub mod validation_attempt;

pub use otp_code::OtpCode;
pub use service_attempt::ServiceAttempt;
pub use service_queue::{JobStatus, ServiceQueue};
pub use sms_mock::SmsMock;
pub use user::User;
pub use validation_attempt::ValidationAttempt;

use chrono::{Duration, Local};

/// Format of every `created_at` / `last_attempt` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time as a column timestamp.
pub fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Local time `seconds` ago as a column timestamp.
pub fn seconds_ago(seconds: i64) -> String {
    (Local::now() - Duration::seconds(seconds))
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Implements the record accessors of [`crate::core::model::Model`] for a
/// struct with a `record` field.
macro_rules! record_accessors {
    () => {
        fn record(&self) -> &$crate::core::model::Record {
            &self.record
        }

        fn record_mut(&mut self) -> &mut $crate::core::model::Record {
            &mut self.record
        }
    };
}

pub(crate) use record_accessors;
