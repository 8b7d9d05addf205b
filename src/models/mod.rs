use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ─── Job schedule ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Info,
    Warning,
    Error,
}

// ─── Job ───────────────────────────────────────────────

/// One row per (user, backup-name, source method).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub method: String,
    pub interval: Interval,
    /// Weekday name when `interval = weekly`, day-of-month (1-31) when
    /// `interval = monthly`, unused when `daily`.
    pub on_value: Option<String>,
    pub last_run: Option<NaiveDate>,
    pub active: bool,
    pub input_data: serde_json::Value,
    pub storx_token: String,
    pub task_memory: serde_json::Value,
    pub message: Option<String>,
    pub message_status: Option<MessageStatus>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Whether `now` is a due moment for this job's schedule.
    pub fn schedule_matches(&self, now: DateTime<Utc>) -> bool {
        match self.interval {
            Interval::Daily => true,
            Interval::Weekly => {
                let today = now.format("%A").to_string().to_lowercase();
                self.on_value.as_deref().map(|v| v.to_lowercase()) == Some(today)
            }
            Interval::Monthly => {
                let day = now.format("%-d").to_string();
                self.on_value.as_deref() == Some(day.as_str())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateJob {
    pub user_id: String,
    pub name: String,
    pub method: String,
    pub interval: Interval,
    pub on_value: Option<String>,
    pub input_data: serde_json::Value,
    pub storx_token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJob {
    pub active: Option<bool>,
    pub interval: Option<Interval>,
    pub on_value: Option<Option<String>>,
    pub input_data: Option<serde_json::Value>,
    pub storx_token: Option<String>,
}

// ─── Task ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// One row per scheduled execution of a job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub cron_job_id: Uuid,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub last_heart_beat: Option<DateTime<Utc>>,
    pub execution_seconds: Option<f64>,
    pub retry_count: i32,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a processor run, handed to `JobStore::finalize_task`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed,
}

// ─── API response wrapper ──────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}
