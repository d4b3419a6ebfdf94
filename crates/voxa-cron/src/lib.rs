//! voxa-cron: Persistent task scheduling for the voxa assistant.
//!
//! Stores time-triggered actions (speak a phrase through TTS, or invoke a
//! named plugin) in SQLite and executes them from a background poll loop,
//! independently of the interactive voice session. The host supplies the two
//! action callbacks; durable state, next-run computation, dispatch, and
//! failure classification all live here.

pub mod error;
pub mod payload;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
pub use payload::{ActionPayload, PluginPayload, SpeakPayload};
pub use scheduler::{InvokePluginFn, SpeakFn, TaskScheduler};
pub use store::TaskStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task ID, assigned at creation.
    pub id: String,
    /// Human-readable label (not unique).
    pub name: String,
    /// One of "cron", "interval", "once".
    pub schedule_type: String,
    /// Interpreted per `schedule_type`: a cron expression, a seconds count,
    /// or an absolute ISO 8601 timestamp.
    pub schedule_value: String,
    /// One of "speak", "plugin".
    pub action_type: String,
    /// Raw JSON payload, validated against `action_type`.
    pub action_payload: String,
    /// Next scheduled execution time; None means the task will never run again.
    pub next_run: Option<DateTime<Utc>>,
    /// Last execution time.
    pub last_run: Option<DateTime<Utc>>,
    /// Result text of the last execution, truncated on write.
    pub last_result: Option<String>,
    /// Current eligibility status.
    pub status: TaskStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Task eligibility status. Only `Active` tasks are ever selected as due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TaskStatus::Active),
            "paused" => Some(TaskStatus::Paused),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

/// How a task's `schedule_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Cron,
    Interval,
    Once,
}

impl ScheduleType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::Once => "once",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(ScheduleType::Cron),
            "interval" => Some(ScheduleType::Interval),
            "once" => Some(ScheduleType::Once),
            _ => None,
        }
    }
}

/// What a due task does when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Speak,
    Plugin,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Speak => "speak",
            ActionType::Plugin => "plugin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "speak" => Some(ActionType::Speak),
            "plugin" => Some(ActionType::Plugin),
            _ => None,
        }
    }
}
