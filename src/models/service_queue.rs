use super::{now, ServiceAttempt};
use crate::core::db::{Connection, Value};
use crate::core::model::{Model, Record};
use crate::core::{OtpgateError, Result};
use crate::services::WorkerRegistry;
use tracing::{debug, warn};

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    New,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn code(self) -> i64 {
        match self {
            JobStatus::New => 0,
            JobStatus::Processing => 1,
            JobStatus::Done => 2,
            JobStatus::Error => 3,
        }
    }

    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            0 => Some(JobStatus::New),
            1 => Some(JobStatus::Processing),
            2 => Some(JobStatus::Done),
            3 => Some(JobStatus::Error),
            _ => None,
        }
    }
}

impl From<JobStatus> for Value {
    fn from(status: JobStatus) -> Self {
        Value::Integer(status.code())
    }
}

/// A job waiting for a service worker
#[derive(Debug, Clone)]
pub struct ServiceQueue {
    record: Record,
}

impl Model for ServiceQueue {
    fn table_name() -> &'static str {
        "service_queue"
    }

    fn instantiate() -> Self {
        ServiceQueue {
            record: Record::new([
                ("id", Value::Null),
                ("service", Value::from("")),
                ("status", Value::from(JobStatus::New)),
                ("params", Value::from("")),
                ("created_at", Value::from("")),
                ("last_attempt", Value::from("")),
                ("count_retries", Value::Integer(0)),
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

impl ServiceQueue {
    pub fn id(&self) -> Option<i64> {
        self.get("id").as_i64()
    }

    /// Registry key of the worker that handles this job.
    pub fn service(&self) -> String {
        self.get("service").to_string()
    }

    /// Job parameters as stored: a JSON object in text form.
    pub fn params(&self) -> String {
        self.get("params").to_string()
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.get("status").as_i64().and_then(JobStatus::from_i64)
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.set("status", status);
    }

    pub fn count_retries(&self) -> i64 {
        self.get("count_retries").as_i64().unwrap_or(0)
    }

    pub fn last_attempt(&self) -> String {
        self.get("last_attempt").to_string()
    }

    /// Queues a NEW job for `service`.
    pub fn enqueue_job(db: &Connection, service: &str, params: &serde_json::Value) -> Result<ServiceQueue> {
        let mut job = Self::instantiate();
        job.set("service", service);
        job.set_status(JobStatus::New);
        job.set("last_attempt", now());
        job.set("params", serde_json::to_string(params)?);
        if !job.save(db)? {
            return Err(OtpgateError::Worker(format!("could not enqueue {} job", service)));
        }
        debug!("Enqueued {} job {:?}", service, job.id());
        Ok(job)
    }

    /// Runs the job once through its worker and records the attempt.
    ///
    /// The job is saved as PROCESSING first. Afterwards it becomes DONE when
    /// the worker reports success, ERROR once it has been tried more than
    /// `max_retries` times, and NEW otherwise so a later run picks it up.
    pub fn process_worker(&mut self, db: &Connection, workers: &WorkerRegistry, max_retries: i64) -> Result<JobStatus> {
        self.set_status(JobStatus::Processing);
        self.set("last_attempt", now());
        let retries = self.count_retries() + 1;
        self.set("count_retries", retries);
        self.save(db)?;

        let outcome = match workers.get(&self.service()) {
            Some(worker) => serde_json::from_str(&self.params())
                .map_err(OtpgateError::from)
                .and_then(|params| worker.process(db, &params)),
            None => Err(OtpgateError::Worker("Invalid worker class".to_string())),
        };
        let (succeeded, message) = match outcome {
            Ok(result) => (result, "Success".to_string()),
            Err(OtpgateError::Worker(message)) => (false, message),
            Err(e) => (false, e.to_string()),
        };
        if !succeeded {
            warn!("Job {:?} ({}) failed: {}", self.id(), self.service(), message);
        }

        ServiceAttempt::create_attempt(db, self, &message)?;
        let status = if succeeded {
            JobStatus::Done
        } else if self.count_retries() > max_retries {
            JobStatus::Error
        } else {
            JobStatus::New
        };
        self.set_status(status);
        self.save(db)?;
        Ok(status)
    }
}
