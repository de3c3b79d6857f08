//! Runs a fixed set of scripts across a bounded pool of workers.
//!
//! Workers pull scripts from a shared cursor in ordinal order. Under
//! `continue_on_error = false` the first failed outcome closes the cursor:
//! scripts already pulled finish normally, everything else is recorded as
//! skipped. Outcomes travel over a channel to a single collector that owns
//! the ordinal slot table, so every slot is written by exactly one writer.

use crate::executor::{ScriptExecutor, ScriptVerdict};
use crate::outcome::{RunResult, ScriptOutcome, ScriptStatus};
use crate::policy::ExecutionPolicy;
use crate::script::{ResolutionError, ScriptDefinition};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Execute `scripts` under `policy`, returning once every script has a
/// terminal outcome. Never fails: run-level problems surface as
/// [`RunResult::error`], executor faults and panics as failed outcomes.
pub async fn run(
    mut scripts: Vec<ScriptDefinition>,
    policy: &ExecutionPolicy,
    executor: Arc<dyn ScriptExecutor>,
) -> RunResult {
    let started_at = OffsetDateTime::now_utc();

    if let Err(err) = policy.validate() {
        warn!(%err, "rejecting run: invalid policy");
        return RunResult::rejected(err, started_at);
    }
    if scripts.is_empty() {
        warn!("rejecting run: no scripts resolved");
        return RunResult::rejected(ResolutionError::NoScripts, started_at);
    }

    scripts.sort_by_key(|script| script.ordinal);
    let total = scripts.len();
    let workers = policy.concurrency.min(total);
    info!(
        scripts = total,
        workers,
        continue_on_error = policy.continue_on_error,
        "starting run"
    );

    let queue = Arc::new(WorkQueue::new(scripts));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut pool = JoinSet::new();
    for worker in 0..workers {
        pool.spawn(worker_loop(
            worker,
            Arc::clone(&queue),
            Arc::clone(&executor),
            tx.clone(),
            policy.continue_on_error,
        ));
    }
    drop(tx);

    let mut slots: Vec<Option<ScriptOutcome>> = (0..total).map(|_| None).collect();
    while let Some((slot, outcome)) = rx.recv().await {
        record(&mut slots, slot, outcome);
    }
    while let Some(joined) = pool.join_next().await {
        if let Err(err) = joined {
            error!(%err, "worker terminated abnormally");
        }
    }

    let finished_at = OffsetDateTime::now_utc();
    let dispatched = queue.dispatched();
    let outcomes: Vec<ScriptOutcome> = slots
        .into_iter()
        .enumerate()
        .map(|(slot, outcome)| {
            let script = queue.script(slot);
            match outcome {
                Some(outcome) => outcome,
                // dispatched but never reported: the worker itself died
                None if slot < dispatched => ScriptOutcome::failed(
                    script,
                    "worker terminated before recording an outcome",
                    finished_at,
                    finished_at,
                ),
                None => {
                    debug!(script = %script.name, ordinal = script.ordinal, "skipping script");
                    ScriptOutcome::skipped(script)
                }
            }
        })
        .collect();

    let result = RunResult::completed(outcomes, started_at, finished_at);
    info!(success = result.success, summary = %result.summary(), "run finished");
    result
}

fn record(slots: &mut [Option<ScriptOutcome>], slot: usize, outcome: ScriptOutcome) {
    match slots.get_mut(slot) {
        Some(entry @ None) => *entry = Some(outcome),
        Some(Some(existing)) => {
            error!(
                slot,
                script = %existing.name,
                "duplicate outcome for script; keeping the first"
            );
        }
        None => error!(slot, "outcome for unknown slot"),
    }
}

/// Ordered dispatch cursor plus the cancellation flag. The flag is flipped
/// while holding the cursor lock, so once `cancel` returns no further
/// script can be pulled.
struct WorkQueue {
    scripts: Vec<ScriptDefinition>,
    cursor: Mutex<usize>,
    cancelled: AtomicBool,
}

impl WorkQueue {
    fn new(scripts: Vec<ScriptDefinition>) -> Self {
        Self {
            scripts,
            cursor: Mutex::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    fn pull(&self) -> Option<usize> {
        let mut cursor = self.lock_cursor();
        if self.cancelled.load(Ordering::Acquire) || *cursor >= self.scripts.len() {
            return None;
        }
        let slot = *cursor;
        *cursor += 1;
        Some(slot)
    }

    /// Returns true for the call that actually cancelled the queue.
    fn cancel(&self) -> bool {
        let _cursor = self.lock_cursor();
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    fn dispatched(&self) -> usize {
        *self.lock_cursor()
    }

    fn script(&self, slot: usize) -> &ScriptDefinition {
        &self.scripts[slot]
    }

    fn lock_cursor(&self) -> MutexGuard<'_, usize> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<WorkQueue>,
    executor: Arc<dyn ScriptExecutor>,
    tx: mpsc::UnboundedSender<(usize, ScriptOutcome)>,
    continue_on_error: bool,
) {
    while let Some(slot) = queue.pull() {
        let script = queue.script(slot);
        debug!(worker, script = %script.name, ordinal = script.ordinal, "dispatching script");

        let outcome = execute_isolated(Arc::clone(&queue), Arc::clone(&executor), slot).await;
        match &outcome.error {
            Some(reason) => warn!(worker, script = %outcome.name, %reason, "script failed"),
            None => info!(worker, script = %outcome.name, "script succeeded"),
        }

        if outcome.status == ScriptStatus::Failed && !continue_on_error && queue.cancel() {
            info!(
                script = %outcome.name,
                "stopping dispatch after first failure"
            );
        }

        if tx.send((slot, outcome)).is_err() {
            break;
        }
    }
    debug!(worker, "worker idle, exiting");
}

/// Run one script on its own task so a panicking executor becomes a failed
/// outcome instead of taking the worker down.
async fn execute_isolated(
    queue: Arc<WorkQueue>,
    executor: Arc<dyn ScriptExecutor>,
    slot: usize,
) -> ScriptOutcome {
    let started_at = OffsetDateTime::now_utc();
    let task_queue = Arc::clone(&queue);
    let mut task = AbortOnDrop(tokio::spawn(async move {
        executor.execute(task_queue.script(slot)).await
    }));
    let joined = (&mut task.0).await;
    let finished_at = OffsetDateTime::now_utc();

    let script = queue.script(slot);
    match joined {
        Ok(Ok(ScriptVerdict::Passed)) => ScriptOutcome::succeeded(script, started_at, finished_at),
        Ok(Ok(ScriptVerdict::Failed(reason))) => {
            ScriptOutcome::failed(script, reason, started_at, finished_at)
        }
        Ok(Err(fault)) => ScriptOutcome::failed(
            script,
            format!("executor fault: {fault}"),
            started_at,
            finished_at,
        ),
        Err(err) => ScriptOutcome::failed(script, describe_join_error(err), started_at, finished_at),
    }
}

/// Aborts the script task when the owning worker is dropped, so a
/// cancelled run does not leave executors (and their drivers) running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "executor task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("executor panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("executor panicked: {message}")
    } else {
        "executor panicked".to_string()
    }
}
