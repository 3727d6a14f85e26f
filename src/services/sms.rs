use super::ServiceWorker;
use crate::core::db::{Connection, Value};
use crate::core::model::Model;
use crate::core::{OtpgateError, Result};
use crate::models::SmsMock;
use tracing::info;

/// Delivers SMS jobs by storing them in the `sms_mock` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmsServiceWorker;

impl SmsServiceWorker {
    /// Registry key of SMS jobs.
    pub const SERVICE: &'static str = "sms";

    pub fn send_sms(&self, db: &Connection, phone: &str, message: &str) -> Result<bool> {
        let mut sms = SmsMock::new(phone, message);
        let saved = sms.save(db)?;
        info!("SMS to {}: {}", phone, message);
        Ok(saved)
    }
}

impl ServiceWorker for SmsServiceWorker {
    fn process(&self, db: &Connection, params: &serde_json::Value) -> Result<bool> {
        let field = |name: &str| -> Result<String> {
            match params.get(name).map(Value::from_json).transpose()? {
                Some(value) if !value.is_null() => Ok(value.to_string()),
                _ => Err(OtpgateError::Worker(format!("Missing SMS parameter '{}'", name))),
            }
        };
        let phone = field("phone")?;
        let message = field("message")?;
        self.send_sms(db, &phone, &message)
    }
}
