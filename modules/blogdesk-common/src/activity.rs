//! Durable activity log records.
//!
//! The task runner is the only writer; observers read them newest-first to
//! reconcile after a live stream ends or when no stream was observed at all.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BlogdeskError;

/// Default number of records returned by a recent-activity query.
pub const DEFAULT_RECENT_LIMIT: u32 = 50;

/// Upper bound on any single page of activity records.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Scrape,
    Evaluate,
    Generate,
    Pipeline,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Evaluate => "evaluate",
            Self::Generate => "generate",
            Self::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = BlogdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(Self::Scrape),
            "evaluate" => Ok(Self::Evaluate),
            "generate" => Ok(Self::Generate),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(BlogdeskError::InvalidValue {
                field: "type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Running,
    Success,
    Error,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityStatus {
    type Err = BlogdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(BlogdeskError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A stored activity record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub status: ActivityStatus,
    pub message: String,
    #[serde(default = "empty_details")]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A record to append. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub activity_type: ActivityType,
    pub status: ActivityStatus,
    pub message: String,
    pub details: serde_json::Value,
}

impl NewActivity {
    pub fn new(
        activity_type: ActivityType,
        status: ActivityStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            activity_type,
            status,
            message: message.into(),
            details: empty_details(),
        }
    }

    pub fn running(activity_type: ActivityType, message: impl Into<String>) -> Self {
        Self::new(activity_type, ActivityStatus::Running, message)
    }

    pub fn success(activity_type: ActivityType, message: impl Into<String>) -> Self {
        Self::new(activity_type, ActivityStatus::Success, message)
    }

    pub fn error(activity_type: ActivityType, message: impl Into<String>) -> Self {
        Self::new(activity_type, ActivityStatus::Error, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

fn empty_details() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Filters for a newest-first activity read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub activity_type: Option<ActivityType>,
    pub status: Option<ActivityStatus>,
}

impl ActivityQuery {
    pub fn recent(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, activity_type: ActivityType) -> Self {
        self.activity_type = Some(activity_type);
        self
    }

    pub fn with_status(mut self, status: ActivityStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Requested limit clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> u32 {
        clamp_page_size(self.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
    }

    pub fn matches(&self, record: &ActivityLogRecord) -> bool {
        self.activity_type.map_or(true, |t| t == record.activity_type)
            && self.status.map_or(true, |s| s == record.status)
    }
}

pub fn clamp_page_size(size: u32) -> u32 {
    size.clamp(1, MAX_PAGE_SIZE)
}

/// One page of an offset/limit listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPage {
    pub items: Vec<ActivityLogRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl ActivityPage {
    pub fn new(items: Vec<ActivityLogRecord>, total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = if total == 0 {
            1
        } else {
            total.div_ceil(page_size as u64) as u32
        };
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}
