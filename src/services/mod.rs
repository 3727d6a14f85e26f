/// Service workers
///
/// Queued jobs name their worker by a registry key. The registry is built
/// once at startup; a job whose key is missing from it fails its attempt
/// instead of aborting the run.
pub mod sms;

pub use sms::SmsServiceWorker;

use crate::core::db::{Condition, Connection};
use crate::core::model::Model;
use crate::core::Result;
use crate::models::{JobStatus, ServiceQueue};
use std::collections::HashMap;
use tracing::info;

/// Something that can carry out a queued job.
pub trait ServiceWorker: Send + Sync {
    /// Handles one job.
    ///
    /// # Returns
    ///
    /// `true` when the job is complete. `false` or an error leaves it for a
    /// retry.
    fn process(&self, db: &Connection, params: &serde_json::Value) -> Result<bool>;
}

/// Workers by service key
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Box<dyn ServiceWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in worker.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SmsServiceWorker::SERVICE, SmsServiceWorker);
        registry
    }

    pub fn register(&mut self, service: &str, worker: impl ServiceWorker + 'static) {
        self.workers.insert(service.to_string(), Box::new(worker));
    }

    pub fn get(&self, service: &str) -> Option<&dyn ServiceWorker> {
        self.workers.get(service).map(|worker| worker.as_ref())
    }

    pub fn services(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("services", &self.services())
            .finish()
    }
}

/// Runs every NEW job once, oldest first.
///
/// # Returns
///
/// The number of jobs that reached DONE.
pub fn process_pending(db: &Connection, workers: &WorkerRegistry, max_retries: i64) -> Result<usize> {
    let jobs = ServiceQueue::find(Condition::eq("status", JobStatus::New))
        .order_by("id", crate::core::db::SortOrder::Asc)
        .all(db)?;
    let total = jobs.len();
    let mut done = 0;
    for mut job in jobs {
        if job.process_worker(db, workers, max_retries)? == JobStatus::Done {
            done += 1;
        }
    }
    info!("Processed {} queued jobs, {} done", total, done);
    Ok(done)
}
