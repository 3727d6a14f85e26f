use super::{now, seconds_ago, ServiceQueue, User, ValidationAttempt};
use crate::core::db::{Condition, Connection, SortOrder, Value};
use crate::core::model::{Model, Record};
use crate::core::Result;
use crate::services::SmsServiceWorker;
use rand::Rng;
use serde_json::json;
use tracing::info;

/// Seconds a user must wait between two generated codes.
pub const REGENERATE_AFTER_SECS: i64 = 60;

/// A six-digit one-time code sent to a user's phone
#[derive(Debug, Clone)]
pub struct OtpCode {
    record: Record,
}

impl Model for OtpCode {
    fn table_name() -> &'static str {
        "otp_codes"
    }

    fn instantiate() -> Self {
        OtpCode {
            record: Record::new([
                ("id", Value::Null),
                ("code", Value::Null),
                ("user_id", Value::Null),
                ("created_at", Value::Null),
            ]),
        }
    }

    super::record_accessors!();

    fn before_save(&mut self, _db: &Connection, is_new_record: bool) -> Result<()> {
        if is_new_record {
            let code: u32 = rand::thread_rng().gen_range(100_000..=999_999);
            self.set("code", code.to_string());
            self.set("created_at", now());
        }
        Ok(())
    }
}

impl OtpCode {
    pub fn new(user_id: Option<i64>) -> Self {
        let mut otp = Self::instantiate();
        otp.set("user_id", user_id);
        otp
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").as_i64()
    }

    pub fn code(&self) -> String {
        self.get("code").to_string()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.get("user_id").as_i64()
    }

    pub fn created_at(&self) -> String {
        self.get("created_at").to_string()
    }

    /// The user this code was issued to.
    pub fn user(&self, db: &Connection) -> Result<Option<User>> {
        User::find(Condition::eq("id", self.user_id())).one(db)
    }

    /// Issues a new code unless the user already received one within the
    /// last minute. A new code is queued for delivery by SMS.
    ///
    /// # Returns
    ///
    /// `true` when a code was generated and queued.
    pub fn attempt_generate(db: &Connection, user: &User, is_new_user: bool) -> Result<bool> {
        if !is_new_user {
            let recent = Self::find(Condition::eq("user_id", user.id()))
                .and_where(Condition::simple(">", "created_at", seconds_ago(REGENERATE_AFTER_SECS)))
                .order_by("id", SortOrder::Desc)
                .one(db)?;
            if recent.is_some() {
                return Ok(false);
            }
        }

        let mut otp = OtpCode::new(user.id());
        if !otp.save(db)? {
            return Ok(false);
        }
        ServiceQueue::enqueue_job(
            db,
            SmsServiceWorker::SERVICE,
            &json!({
                "message": format!("Please validate this OTP code {}", otp.code()),
                "phone": user.phone(),
            }),
        )?;
        info!("Generated OTP code {:?} for user {:?}", otp.id(), user.id());
        Ok(true)
    }

    /// Checks `code` against the latest matching code of `user` and records
    /// the attempt. A match queues a welcome SMS.
    pub fn validate_code(db: &Connection, code: &str, user: &User) -> Result<bool> {
        let mut attempt = ValidationAttempt::new(user.id());

        let latest = Self::find(Condition::eq("user_id", user.id()))
            .and_where(Condition::simple("=", "code", code))
            .order_by("id", SortOrder::Desc)
            .one(db)?;

        if latest.is_some_and(|otp| otp.code() == code) {
            attempt.set_valid(true);
            ServiceQueue::enqueue_job(
                db,
                SmsServiceWorker::SERVICE,
                &json!({
                    "message": "Welcome to SMSBump!",
                    "phone": user.phone(),
                }),
            )?;
        }
        attempt.save(db)?;
        Ok(attempt.is_valid())
    }
}
