//! In-process job queue with bounded retries and delayed redelivery.
//!
//! Each queue owns its job records and a due-time heap; one worker task per
//! queue pops due jobs and feeds them to a [`JobHandler`]. Producers that
//! need the outcome enqueue with `remove_on_complete` off and block on
//! [`JobQueue::wait_for_completion`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::util::lock::mutex_lock;

pub type JobId = Uuid;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown job kind `{0}`")]
    UnknownKind(String),
    #[error("invalid job payload: {0}")]
    Payload(String),
    #[error("job failed: {0}")]
    Failed(String),
    #[error("job `{0}` not found")]
    Missing(JobId),
    #[error("job `{0}` timed out")]
    TimedOut(JobId),
}

impl JobError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    pub fn payload(err: impl std::fmt::Display) -> Self {
        Self::Payload(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Active,
    Retrying,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub base: Duration,
}

impl Backoff {
    pub fn fixed(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base,
        }
    }

    pub fn exponential(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base,
        }
    }

    /// Delay before retry number `retry_index` (zero-based: the first retry
    /// waits the base delay).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.base,
            BackoffKind::Exponential => self.base * (1u32 << retry_index.min(16)),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobOptions {
    /// Total attempts including the first; clamped to at least one.
    pub attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    options: JobOptions,
}

/// What a handler sees for one attempt.
#[derive(Debug, Clone)]
pub struct JobEnvelope {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
    /// Zero-based attempt index.
    pub attempt: u32,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobEnvelope) -> Result<Option<Value>, JobError>;
}

struct Scheduled {
    due: Instant,
    seq: u64,
    id: JobId,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the BinaryHeap pops the earliest due time; seq breaks ties
    // in enqueue order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum NextStep {
    Idle,
    Sleep(Instant),
    Run(JobId),
}

pub struct JobQueue {
    name: &'static str,
    records: DashMap<JobId, JobRecord>,
    pending: Mutex<BinaryHeap<Scheduled>>,
    seq: AtomicU64,
    wake: Notify,
}

impl JobQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: DashMap::new(),
            pending: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            wake: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn enqueue<P>(
        &self,
        job_name: &str,
        payload: &P,
        options: JobOptions,
    ) -> Result<JobId, JobError>
    where
        P: Serialize,
    {
        let payload = serde_json::to_value(payload).map_err(JobError::payload)?;
        let id = Uuid::new_v4();
        let record = JobRecord {
            id,
            name: job_name.to_string(),
            payload,
            state: JobState::Queued,
            attempts_made: 0,
            max_attempts: options.attempts.max(1),
            last_error: None,
            result: None,
            options,
        };
        self.records.insert(id, record);
        self.schedule(id, Instant::now());
        debug!(queue = self.name, job = job_name, %id, "enqueued job");
        Ok(id)
    }

    fn schedule(&self, id: JobId, due: Instant) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut heap = mutex_lock(&self.pending, "application::jobs", "schedule");
            heap.push(Scheduled { due, seq, id });
        }
        self.wake.notify_one();
    }

    fn next_step(&self) -> NextStep {
        let mut heap = mutex_lock(&self.pending, "application::jobs", "next_step");
        match heap.peek() {
            None => NextStep::Idle,
            Some(scheduled) if scheduled.due <= Instant::now() => {
                let scheduled = heap.pop().expect("peeked entry present");
                NextStep::Run(scheduled.id)
            }
            Some(scheduled) => NextStep::Sleep(scheduled.due),
        }
    }

    /// Worker loop; runs until the owning task is aborted.
    pub async fn run(&self, handler: &dyn JobHandler) {
        loop {
            match self.next_step() {
                NextStep::Idle => self.wake.notified().await,
                NextStep::Sleep(due) => {
                    tokio::select! {
                        _ = sleep_until(due) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                NextStep::Run(id) => self.process(id, handler).await,
            }
        }
    }

    async fn process(&self, id: JobId, handler: &dyn JobHandler) {
        let envelope = {
            let Some(mut record) = self.records.get_mut(&id) else {
                // Removed while waiting in the heap; nothing to do.
                return;
            };
            record.state = JobState::Active;
            JobEnvelope {
                id,
                name: record.name.clone(),
                payload: record.payload.clone(),
                attempt: record.attempts_made,
            }
        };

        match handler.handle(&envelope).await {
            Ok(result) => {
                counter!("devhub_jobs_completed_total", "queue" => self.name).increment(1);
                let remove = {
                    let Some(mut record) = self.records.get_mut(&id) else {
                        return;
                    };
                    record.attempts_made += 1;
                    record.state = JobState::Done;
                    record.result = result;
                    record.options.remove_on_complete
                };
                if remove {
                    self.records.remove(&id);
                }
            }
            Err(err) => {
                let retry_at = {
                    let Some(mut record) = self.records.get_mut(&id) else {
                        return;
                    };
                    record.attempts_made += 1;
                    record.last_error = Some(err.to_string());
                    if record.attempts_made < record.max_attempts {
                        record.state = JobState::Retrying;
                        let delay = record.options.backoff.delay_for(record.attempts_made - 1);
                        Some((Instant::now() + delay, delay))
                    } else {
                        record.state = JobState::Failed;
                        None
                    }
                };
                match retry_at {
                    Some((due, delay)) => {
                        counter!("devhub_jobs_retried_total", "queue" => self.name).increment(1);
                        warn!(
                            queue = self.name,
                            job = %envelope.name,
                            %id,
                            attempt = envelope.attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "job attempt failed, retrying"
                        );
                        self.schedule(id, due);
                    }
                    None => {
                        counter!("devhub_jobs_failed_total", "queue" => self.name).increment(1);
                        warn!(
                            queue = self.name,
                            job = %envelope.name,
                            %id,
                            error = %err,
                            "job exhausted its attempts"
                        );
                        let remove = self
                            .records
                            .get(&id)
                            .map(|record| record.options.remove_on_fail)
                            .unwrap_or(false);
                        if remove {
                            self.records.remove(&id);
                        }
                    }
                }
            }
        }
    }

    /// Block until the job finishes or the timeout elapses, returning its
    /// result value. Terminal failures surface the last recorded error.
    pub async fn wait_for_completion(
        &self,
        id: JobId,
        timeout: Duration,
    ) -> Result<Value, JobError> {
        let deadline = Instant::now() + timeout;

        loop {
            let snapshot = match self.records.get(&id) {
                Some(record) => (record.state, record.result.clone(), record.last_error.clone()),
                None => return Err(JobError::Missing(id)),
            };

            match snapshot {
                (JobState::Done, result, _) => return Ok(result.unwrap_or(Value::Null)),
                (JobState::Failed, _, last_error) => {
                    let message =
                        last_error.unwrap_or_else(|| "job failed without error text".to_string());
                    return Err(JobError::Failed(message));
                }
                _ => {
                    if Instant::now() >= deadline {
                        return Err(JobError::TimedOut(id));
                    }
                    sleep(WAIT_POLL_INTERVAL).await;
                }
            }
        }
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobRecord> {
        self.records.get(&id).map(|record| record.clone())
    }

    /// Drop a finished job record, typically after reading its result.
    pub fn remove(&self, id: JobId) {
        self.records.remove(&id);
    }
}
