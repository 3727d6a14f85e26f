use super::{now, seconds_ago};
use crate::core::db::{Condition, Connection, Value};
use crate::core::model::{Model, Record};
use crate::core::Result;

/// Failed attempts allowed per user within [`ATTEMPT_WINDOW_SECS`].
pub const MAX_FAILED_ATTEMPTS: i64 = 3;
pub const ATTEMPT_WINDOW_SECS: i64 = 60;

/// One submitted OTP code and whether it matched
#[derive(Debug, Clone)]
pub struct ValidationAttempt {
    record: Record,
}

impl Model for ValidationAttempt {
    fn table_name() -> &'static str {
        "validation_attempts"
    }

    fn instantiate() -> Self {
        ValidationAttempt {
            record: Record::new([
                ("id", Value::Null),
                ("user_id", Value::Null),
                ("is_valid", Value::Integer(0)),
                ("created_at", Value::Null),
            ]),
        }
    }

    super::record_accessors!();

    fn before_save(&mut self, _db: &Connection, is_new_record: bool) -> Result<()> {
        if is_new_record {
            self.set("created_at", now());
        }
        Ok(())
    }
}

impl ValidationAttempt {
    pub fn new(user_id: Option<i64>) -> Self {
        let mut attempt = Self::instantiate();
        attempt.set("user_id", user_id);
        attempt
    }

    pub fn user_id(&self) -> Option<i64> {
        self.get("user_id").as_i64()
    }

    pub fn is_valid(&self) -> bool {
        self.get("is_valid").is_truthy()
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.set("is_valid", valid);
    }

    /// Whether `user_id` may submit another code: fewer than
    /// [`MAX_FAILED_ATTEMPTS`] failures in the last minute.
    pub fn valid_attempt(db: &Connection, user_id: Option<i64>) -> Result<bool> {
        let failures = Self::find(Condition::eq("user_id", user_id))
            .and_where(Condition::simple("!=", "is_valid", 1))
            .and_where(Condition::simple(">", "created_at", seconds_ago(ATTEMPT_WINDOW_SECS)))
            .count(db)?;
        Ok(failures < MAX_FAILED_ATTEMPTS)
    }
}
