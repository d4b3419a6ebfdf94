//! The scheduler engine: poll loop, dispatch, and task administration.
//!
//! The engine owns no task state of its own: every read and write goes
//! through the [`TaskStore`], and the rows fetched during a tick are
//! per-tick snapshots. A pause that races an in-flight dispatch therefore
//! takes effect from the next tick, not the current one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::payload::ActionPayload;
use crate::schedule::{calc_next_run, first_run};
use crate::store::TaskStore;
use crate::{ScheduleType, ScheduledTask, TaskStatus};

/// Default seconds between poll ticks.
pub const DEFAULT_POLL_INTERVAL_S: u64 = 30;

/// Host callback that speaks a phrase through the TTS pipeline.
pub type SpeakFn = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Host callback that invokes a named plugin with `(plugin, query,
/// refresh_only)` and returns its spoken-response text, if any.
pub type InvokePluginFn =
    Arc<dyn Fn(&str, &str, bool) -> anyhow::Result<Option<String>> + Send + Sync>;

/// How a failed dispatch is classified.
enum DispatchError {
    /// Unrecoverable configuration: malformed payload, missing required
    /// fields, unknown action type. Terminates the schedule.
    Permanent(String),
    /// The callback itself failed; the task stays schedulable.
    Transient(String),
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// In-process task scheduler backed by SQLite.
///
/// Supports three schedule types ('cron', 'interval', 'once') and two action
/// types ('speak', 'plugin'). Administrative calls write through the store
/// synchronously; execution happens on a background poll loop.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use voxa_cron::{TaskScheduler, TaskStore};
/// # async fn demo() -> voxa_cron::Result<()> {
/// let store = Arc::new(TaskStore::open(std::path::Path::new("tasks.db"))?);
/// let scheduler = TaskScheduler::new(
///     store,
///     Arc::new(|text| { println!("speak: {text}"); Ok(()) }),
///     Arc::new(|plugin, _query, _refresh| Ok(Some(format!("ran {plugin}")))),
///     30,
/// );
/// scheduler.start();
///
/// let task_id = scheduler.add_task(
///     "morning-weather",
///     "cron",
///     "0 9 * * *",
///     "plugin",
///     &serde_json::json!({"plugin": "weather", "query": "weather"}),
/// )?;
/// tracing::info!("registered {task_id}");
///
/// scheduler.close(std::time::Duration::from_secs(5)).await;
/// # Ok(())
/// # }
/// ```
pub struct TaskScheduler {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

/// State shared between the public API and the background loop.
struct Inner {
    store: Arc<TaskStore>,
    speak: SpeakFn,
    invoke_plugin: InvokePluginFn,
    poll_interval: Duration,
}

impl TaskScheduler {
    /// Create a scheduler over an open store and the two host callbacks.
    /// `poll_interval_s` is clamped to a minimum of 1 second.
    pub fn new(
        store: Arc<TaskStore>,
        speak: SpeakFn,
        invoke_plugin: InvokePluginFn,
        poll_interval_s: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                speak,
                invoke_plugin,
                poll_interval: Duration::from_secs(poll_interval_s.max(1)),
            }),
            worker: Mutex::new(None),
        }
    }

    // ─── lifecycle ──────────────────────────────────────────

    /// Start the background poll loop. A no-op if the loop is already
    /// running; after `stop`, spawns a fresh loop.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Scheduler already running; start() ignored");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.poll_loop(stop_rx).await });
        *worker = Some(Worker { stop_tx, handle });
        info!(
            "Task scheduler started (poll_interval={}s)",
            self.inner.poll_interval.as_secs()
        );
    }

    /// Signal the poll loop to exit and wait for it to finish.
    ///
    /// The wait is bounded by `timeout`: a loop stuck in a slow callback is
    /// left to wind down on its own and a warning is logged. Returns whether
    /// the loop is known to have exited.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let worker = self.worker.lock().unwrap().take();
        let Some(Worker { stop_tx, handle }) = worker else {
            return true;
        };
        let _ = stop_tx.send(true);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                info!("Task scheduler stopped");
                true
            }
            Ok(Err(e)) => {
                error!("Scheduler loop aborted: {e}");
                true
            }
            Err(_) => {
                warn!("Scheduler loop did not exit within {timeout:?}");
                false
            }
        }
    }

    /// Stop the loop and release the task store. If the loop fails to stop
    /// within `timeout`, the store is left open, since the live loop may
    /// still be using it.
    pub async fn close(&self, timeout: Duration) {
        if self.stop(timeout).await {
            self.inner.store.close();
        } else {
            warn!("Skipping task store close: scheduler loop still running");
        }
    }

    /// Whether the background loop is currently running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    // ─── public API ─────────────────────────────────────────

    /// Validate and persist a new task. Returns the generated task id.
    ///
    /// Fails fast on an unknown action or schedule type, a payload that does
    /// not validate against the action type, or a schedule value that does
    /// not parse. The caller's payload value is not modified; the normalized
    /// form is what gets stored.
    pub fn add_task(
        &self,
        name: &str,
        schedule_type: &str,
        schedule_value: &str,
        action_type: &str,
        action_payload: &Value,
    ) -> Result<String> {
        let payload = ActionPayload::from_value(action_type, action_payload)?;
        let next = first_run(schedule_type, schedule_value, Utc::now())?;
        let id = self.inner.store.add(
            name,
            schedule_type,
            schedule_value,
            action_type,
            &payload.to_json(),
            next,
        )?;
        info!("Task registered: '{name}' ({id}) next_run={next:?}");
        Ok(id)
    }

    /// Pause a task. It keeps its `next_run` but is skipped by the loop.
    pub fn pause_task(&self, task_id: &str) -> Result<()> {
        self.inner.store.set_status(task_id, TaskStatus::Paused)?;
        info!("Task paused: {task_id}");
        Ok(())
    }

    /// Resume a paused task; it becomes eligible on the next tick.
    pub fn resume_task(&self, task_id: &str) -> Result<()> {
        self.inner.store.set_status(task_id, TaskStatus::Active)?;
        info!("Task resumed: {task_id}");
        Ok(())
    }

    /// Cancel a task permanently.
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.inner.store.set_status(task_id, TaskStatus::Completed)?;
        info!("Task cancelled: {task_id}");
        Ok(())
    }
}

impl Inner {
    async fn poll_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            self.tick(&stop_rx);
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!("Scheduler loop exited");
    }

    /// One pass: fetch due tasks and dispatch each in turn. A stop request
    /// aborts the remainder of the batch.
    fn tick(&self, stop_rx: &watch::Receiver<bool>) {
        let due = match self.store.due_tasks(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                error!("Scheduler: error fetching due tasks: {e}");
                return;
            }
        };
        for task in &due {
            if *stop_rx.borrow() {
                debug!("Stop requested; aborting remaining due tasks");
                break;
            }
            self.run_task(task);
        }
    }

    /// Execute one task and persist the outcome.
    fn run_task(&self, task: &ScheduledTask) {
        debug!("Running task '{}' ({})", task.name, task.id);
        let (result, next_run, status) = match self.dispatch(task) {
            Ok(result) => self.reschedule(task, result),
            Err(DispatchError::Permanent(msg)) => {
                error!(
                    "Task '{}' has a permanent configuration error: {msg}",
                    task.name
                );
                (msg, None, TaskStatus::Completed)
            }
            Err(DispatchError::Transient(msg)) => {
                error!("Task '{}' failed: {msg}", task.name);
                if ScheduleType::parse(&task.schedule_type) == Some(ScheduleType::Once) {
                    // One-shot work is not lost to a transient blip: keep the
                    // original next_run and retry on a later tick.
                    (msg, task.next_run, TaskStatus::Active)
                } else {
                    self.reschedule(task, msg)
                }
            }
        };
        if let Err(e) = self.store.record_run(&task.id, &result, next_run, status) {
            error!("Scheduler: failed to update task '{}' after run: {e}", task.id);
        }
    }

    /// Compute the follow-up run for a dispatched task. A schedule value
    /// that no longer parses terminates the schedule; rescheduling it would
    /// retry a bad configuration forever.
    fn reschedule(
        &self,
        task: &ScheduledTask,
        result: String,
    ) -> (String, Option<DateTime<Utc>>, TaskStatus) {
        match calc_next_run(&task.schedule_type, &task.schedule_value, Utc::now()) {
            Ok(next) => {
                let status = if next.is_some() {
                    TaskStatus::Active
                } else {
                    TaskStatus::Completed
                };
                (result, next, status)
            }
            Err(e) => {
                error!(
                    "Scheduler: failed to compute next run for task '{}': {e}",
                    task.id
                );
                let msg = format!("schedule error: {e}");
                let combined = if result.is_empty() {
                    msg
                } else {
                    format!("{result}\n{msg}")
                };
                (combined, None, TaskStatus::Completed)
            }
        }
    }

    /// Execute one task's action through the host callbacks.
    fn dispatch(&self, task: &ScheduledTask) -> std::result::Result<String, DispatchError> {
        let payload = ActionPayload::from_json(&task.action_type, &task.action_payload)
            .map_err(|e| DispatchError::Permanent(e.to_string()))?;
        match payload {
            ActionPayload::Speak(p) => {
                (self.speak)(&p.text).map_err(|e| DispatchError::Transient(e.to_string()))?;
                let preview: String = p.text.chars().take(80).collect();
                Ok(format!("spoke: {preview}"))
            }
            ActionPayload::Plugin(p) => {
                let output = (self.invoke_plugin)(&p.plugin, &p.query, p.refresh_only)
                    .map_err(|e| DispatchError::Transient(e.to_string()))?;
                Ok(output.unwrap_or_default())
            }
        }
    }
}
