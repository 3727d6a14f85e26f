use super::now;
use crate::core::db::{Connection, Value};
use crate::core::model::{Model, Record};
use crate::core::Result;

/// An SMS that would have been sent
#[derive(Debug, Clone)]
pub struct SmsMock {
    record: Record,
}

impl Model for SmsMock {
    fn table_name() -> &'static str {
        "sms_mock"
    }

    fn instantiate() -> Self {
        SmsMock {
            record: Record::new([
                ("id", Value::Null),
                ("phone", Value::Null),
                ("message", Value::Null),
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

impl SmsMock {
    pub fn new(phone: impl Into<Value>, message: impl Into<Value>) -> Self {
        let mut sms = Self::instantiate();
        sms.set("phone", phone);
        sms.set("message", message);
        sms
    }

    pub fn phone(&self) -> String {
        self.get("phone").to_string()
    }

    pub fn message(&self) -> String {
        self.get("message").to_string()
    }
}
