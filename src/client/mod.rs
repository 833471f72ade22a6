//! Outbound report store capability
//!
//! The session only talks to [`ReportService`]; [`http::PortalClient`] is the
//! ReportPortal implementation used by the CLI.

pub mod http;
#[cfg(test)]
pub(crate) mod recording;

use crate::runner::state::{ItemKind, ItemStatus, LogLevel, RemoteId};
use crate::utils::config::LaunchAttribute;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::PortalClient;

/// Launch mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaunchMode {
    Default,
    Debug,
}

/// Parameters for creating a launch
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub name: String,
    pub description: String,
    pub attributes: Vec<LaunchAttribute>,
    pub mode: LaunchMode,
    pub rerun: bool,
    pub rerun_of: Option<String>,
    pub start_time: i64,
}

/// Result of closing a launch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchSummary {
    pub link: String,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartItem {
    pub name: String,
    pub kind: ItemKind,
    pub launch_id: RemoteId,
    pub parent_id: Option<RemoteId>,
    pub has_stats: bool,
    pub start_time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishItem {
    pub launch_id: RemoteId,
    pub status: ItemStatus,
    pub end_time: i64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub time: i64,
}

/// Binary evidence uploaded with a log entry
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn screenshot(content: Vec<u8>) -> Self {
        Self {
            name: "failed.png".to_string(),
            mime: "image/png".to_string(),
            content,
        }
    }

    pub fn video(content: Vec<u8>) -> Self {
        Self {
            name: "TestVideo.mp4".to_string(),
            mime: "video/mp4".to_string(),
            content,
        }
    }
}

/// Remote hierarchical report store
#[async_trait]
pub trait ReportService: Send + Sync {
    /// Create a launch and return its id
    async fn create_launch(&self, request: &LaunchRequest) -> Result<RemoteId>;

    /// Close a launch with its aggregated status
    async fn finish_launch(
        &self,
        launch_id: &RemoteId,
        status: ItemStatus,
        end_time: i64,
    ) -> Result<LaunchSummary>;

    /// Create a suite, test or step item
    async fn start_item(&self, item: &StartItem) -> Result<RemoteId>;

    async fn finish_item(&self, item_id: &RemoteId, finish: &FinishItem) -> Result<()>;

    /// Attach a log line, optionally with a file, to an item
    async fn send_log(
        &self,
        launch_id: &RemoteId,
        item_id: &RemoteId,
        entry: &LogEntry,
        attachment: Option<&Attachment>,
    ) -> Result<()>;
}

/// Current time in epoch milliseconds, the unit the report store expects
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
