//! In-memory [`ReportService`] that records every call in order

use super::{
    Attachment, FinishItem, LaunchRequest, LaunchSummary, LogEntry, ReportService, StartItem,
};
use crate::runner::state::{ItemStatus, LogLevel, RemoteId};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateLaunch {
        name: String,
        rerun_of: Option<String>,
    },
    FinishLaunch {
        id: RemoteId,
        status: ItemStatus,
    },
    Start {
        id: RemoteId,
        name: String,
        parent: Option<RemoteId>,
    },
    Finish {
        id: RemoteId,
        status: ItemStatus,
        message: Option<String>,
    },
    Log {
        item: RemoteId,
        level: LogLevel,
        message: String,
        attachment: Option<String>,
    },
}

#[derive(Default)]
pub struct RecordingService {
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u32>,
    fail_launch: bool,
    /// Item names whose start call fails
    failing_starts: Mutex<HashSet<String>>,
}

impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn fail_start_of(&self, name: &str) {
        self.failing_starts.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Remote id assigned to the first item started with this name
    pub fn id_of(&self, name: &str) -> Option<RemoteId> {
        self.calls().into_iter().find_map(|call| match call {
            Call::Start { id, name: n, .. } if n == name => Some(id),
            _ => None,
        })
    }

    /// Parent of the first item started with this name
    pub fn parent_of(&self, name: &str) -> Option<RemoteId> {
        self.calls().into_iter().find_map(|call| match call {
            Call::Start { parent, name: n, .. } if n == name => parent,
            _ => None,
        })
    }

    pub fn finish_status(&self, name: &str) -> Option<ItemStatus> {
        let id = self.id_of(name)?;
        self.calls().into_iter().find_map(|call| match call {
            Call::Finish { id: i, status, .. } if i == id => Some(status),
            _ => None,
        })
    }

    pub fn finish_count(&self, name: &str) -> usize {
        let Some(id) = self.id_of(name) else { return 0 };
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Finish { id: i, .. } if *i == id))
            .count()
    }

    /// Position of the finish call for this item in the call log
    pub fn finish_position(&self, name: &str) -> Option<usize> {
        let id = self.id_of(name)?;
        self.calls()
            .iter()
            .position(|call| matches!(call, Call::Finish { id: i, .. } if *i == id))
    }

    pub fn starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Start { .. }))
            .count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn allocate(&self, prefix: &str) -> RemoteId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{}{}", prefix, next)
    }
}

#[async_trait]
impl ReportService for RecordingService {
    async fn create_launch(&self, request: &LaunchRequest) -> Result<RemoteId> {
        if self.fail_launch {
            anyhow::bail!("connection refused");
        }
        self.push(Call::CreateLaunch {
            name: request.name.clone(),
            rerun_of: request.rerun_of.clone(),
        });
        Ok(self.allocate("launch-"))
    }

    async fn finish_launch(
        &self,
        launch_id: &RemoteId,
        status: ItemStatus,
        _end_time: i64,
    ) -> Result<LaunchSummary> {
        self.push(Call::FinishLaunch {
            id: launch_id.clone(),
            status,
        });
        Ok(LaunchSummary {
            link: format!("http://rp/ui/#demo/launches/all/{}", launch_id),
            number: 7,
        })
    }

    async fn start_item(&self, item: &StartItem) -> Result<RemoteId> {
        if self.failing_starts.lock().unwrap().contains(&item.name) {
            anyhow::bail!("start of '{}' rejected", item.name);
        }
        let id = self.allocate("item-");
        self.push(Call::Start {
            id: id.clone(),
            name: item.name.clone(),
            parent: item.parent_id.clone(),
        });
        Ok(id)
    }

    async fn finish_item(&self, item_id: &RemoteId, finish: &FinishItem) -> Result<()> {
        self.push(Call::Finish {
            id: item_id.clone(),
            status: finish.status,
            message: finish.message.clone(),
        });
        Ok(())
    }

    async fn send_log(
        &self,
        _launch_id: &RemoteId,
        item_id: &RemoteId,
        entry: &LogEntry,
        attachment: Option<&Attachment>,
    ) -> Result<()> {
        self.push(Call::Log {
            item: item_id.clone(),
            level: entry.level,
            message: entry.message.clone(),
            attachment: attachment.map(|a| a.name.clone()),
        });
        Ok(())
    }
}
