//! Bounded user-filter matching.
//!
//! The user filter is an arbitrary caller-supplied pattern, so each evaluation
//! runs on a per-request worker thread and is awaited with a hard timeout. A
//! timed-out, failed, or uncompilable evaluation counts as a non-match; it
//! never fails the request.
//!
//! The worker is spawned on first use. An evaluation that times out or kills
//! its thread retires that worker, and the next candidate gets a fresh one, so
//! a stuck evaluation only costs its own record. A retired thread exits as
//! soon as its in-flight evaluation returns; evaluations are never forcibly
//! cancelled. At most one live worker belongs to a matcher at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use tokio::sync::oneshot;

const WORKER_THREAD_NAME: &str = "qstate-user-match";
const MAX_PATTERN_SIZE_BYTES: usize = 1024 * 1024;

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type Job = Box<dyn FnOnce() + Send>;

/// Outcome of a single bounded evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The evaluation finished in time with the given result.
    Completed(bool),
    /// The evaluation did not finish within the budget.
    TimedOut,
    /// The worker went away before replying.
    WorkerLost,
}

impl MatchOutcome {
    /// Returns true only for a completed, positive match.
    #[must_use]
    pub const fn is_match(self) -> bool {
        matches!(self, Self::Completed(true))
    }
}

/// Single background thread that runs evaluations in submission order.
///
/// Clones share the thread. It exits once every clone is dropped and the
/// current evaluation has returned.
#[derive(Debug, Clone)]
pub struct MatchWorker {
    jobs: mpsc::Sender<Job>,
    timeout: Duration,
}

impl MatchWorker {
    /// Spawns a worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(timeout: Duration) -> std::io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                while let Ok(job) = queue.recv() {
                    job();
                }
            })?;
        Ok(Self { jobs, timeout })
    }

    /// Runs `evaluate` on the worker and waits at most the configured timeout.
    pub async fn evaluate<F>(&self, evaluate: F) -> MatchOutcome
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = reply.send(evaluate());
        });
        if self.jobs.send(job).is_err() {
            return MatchOutcome::WorkerLost;
        }

        match tokio::time::timeout(self.timeout, result).await {
            Ok(Ok(matched)) => MatchOutcome::Completed(matched),
            Ok(Err(_)) => MatchOutcome::WorkerLost,
            Err(_) => MatchOutcome::TimedOut,
        }
    }
}

enum Filter {
    All,
    Rejected,
    Bounded {
        predicate: Predicate,
        worker: Mutex<Option<MatchWorker>>,
        timeout: Duration,
    },
}

/// Per-request user filter.
///
/// Holds at most one live [`MatchWorker`]; it is released when the matcher
/// drops. Evaluations that time out are counted, see [`Self::timed_out`].
pub struct BoundedMatcher {
    filter: Filter,
    timed_out: AtomicUsize,
}

impl std::fmt::Debug for BoundedMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.filter {
            Filter::All => "all",
            Filter::Rejected => "rejected",
            Filter::Bounded { .. } => "bounded",
        };
        f.debug_struct("BoundedMatcher")
            .field("filter", &kind)
            .field("timed_out", &self.timed_out())
            .finish()
    }
}

impl BoundedMatcher {
    const fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            timed_out: AtomicUsize::new(0),
        }
    }

    /// Creates a matcher for an optional user pattern.
    ///
    /// No pattern (or an empty one) matches everything without spawning a
    /// worker. The pattern must match the whole candidate. A pattern that does
    /// not compile matches nothing.
    #[must_use]
    pub fn from_pattern(pattern: Option<&str>, timeout: Duration) -> Self {
        let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
            return Self::with_filter(Filter::All);
        };

        match compile_full_match(pattern) {
            Ok(regex) => {
                let regex = Arc::new(regex);
                Self::from_predicate(move |candidate| regex.is_match(candidate), timeout)
            }
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "User filter does not compile; no query will match");
                Self::with_filter(Filter::Rejected)
            }
        }
    }

    /// Creates a matcher from an arbitrary predicate evaluated under the timeout.
    ///
    /// The worker thread is spawned by the first evaluation.
    #[must_use]
    pub fn from_predicate<P>(predicate: P, timeout: Duration) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::with_filter(Filter::Bounded {
            predicate: Arc::new(predicate),
            worker: Mutex::new(None),
            timeout,
        })
    }

    /// Number of evaluations that timed out so far.
    #[must_use]
    pub fn timed_out(&self) -> usize {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Returns whether `candidate` passes the filter.
    pub async fn matches(&self, candidate: &str) -> bool {
        let Filter::Bounded {
            predicate,
            worker,
            timeout,
        } = &self.filter
        else {
            return matches!(self.filter, Filter::All);
        };

        let Some(current) = checkout(worker, *timeout) else {
            return false;
        };
        let predicate = Arc::clone(predicate);
        let owned = candidate.to_string();
        let outcome = current.evaluate(move || (*predicate)(&owned)).await;

        match outcome {
            MatchOutcome::TimedOut => {
                retire(worker);
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_user_filter_timeout();
                tracing::debug!(
                    candidate = %candidate,
                    "User filter evaluation timed out; treating as non-match"
                );
            }
            MatchOutcome::WorkerLost => {
                retire(worker);
                tracing::warn!(
                    candidate = %candidate,
                    "User filter worker lost; treating as non-match"
                );
            }
            MatchOutcome::Completed(_) => {}
        }
        outcome.is_match()
    }
}

/// Returns the live worker, spawning one if the slot is empty.
fn checkout(slot: &Mutex<Option<MatchWorker>>, timeout: Duration) -> Option<MatchWorker> {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(worker) = slot.as_ref() {
        return Some(worker.clone());
    }
    match MatchWorker::spawn(timeout) {
        Ok(worker) => {
            *slot = Some(worker.clone());
            Some(worker)
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to spawn user filter worker; treating as non-match");
            None
        }
    }
}

fn retire(slot: &Mutex<Option<MatchWorker>>) {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take();
}

fn compile_full_match(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .size_limit(MAX_PATTERN_SIZE_BYTES)
        .build()
}
