use super::{now, ServiceQueue};
use crate::core::db::{Connection, Value};
use crate::core::model::{Model, Record};
use crate::core::Result;

/// Outcome of one run of a queued job
#[derive(Debug, Clone)]
pub struct ServiceAttempt {
    record: Record,
}

impl Model for ServiceAttempt {
    fn table_name() -> &'static str {
        "service_attempts"
    }

    fn instantiate() -> Self {
        ServiceAttempt {
            record: Record::new([
                ("id", Value::Null),
                ("queue_id", Value::Null),
                ("result", Value::from("")),
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

impl ServiceAttempt {
    pub fn queue_id(&self) -> Option<i64> {
        self.get("queue_id").as_i64()
    }

    /// `"Success"` or the reason the worker failed.
    pub fn result(&self) -> String {
        self.get("result").to_string()
    }

    pub fn create_attempt(db: &Connection, job: &ServiceQueue, result: &str) -> Result<ServiceAttempt> {
        let mut attempt = Self::instantiate();
        attempt.set("queue_id", job.id());
        attempt.set("result", result);
        attempt.save(db)?;
        Ok(attempt)
    }
}
