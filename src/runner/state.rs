use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Identifier assigned by the remote report store
pub type RemoteId = String;

/// Kind of a report item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemKind {
    Suite,
    Test,
    Step,
}

impl ItemKind {
    /// Suites and tests count towards launch statistics, steps do not
    pub fn default_has_stats(self) -> bool {
        !matches!(self, ItemKind::Step)
    }
}

/// Final status of a report item or launch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Passed,
    Failed,
    Skipped,
}

impl ItemStatus {
    /// Map an engine-side step status ("success", "failed", ...) to a report status
    pub fn from_engine(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "success" | "passed" => Some(ItemStatus::Passed),
            "failed" | "failure" => Some(ItemStatus::Failed),
            "skipped" | "pending" => Some(ItemStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Passed => "PASSED",
            ItemStatus::Failed => "FAILED",
            ItemStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Pass/fail aggregate that never goes back to passed once failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusLatch {
    failed: bool,
}

impl StatusLatch {
    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn status(&self) -> ItemStatus {
        if self.failed {
            ItemStatus::Failed
        } else {
            ItemStatus::Passed
        }
    }
}

/// Log severity understood by the report store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Handle to a report item whose remote id may not be known yet.
///
/// Cloned into queued effects. The create effect resolves the id; effects
/// queued after it read the id once they run.
#[derive(Debug, Clone)]
pub struct ItemRef {
    inner: Arc<ItemSlot>,
}

#[derive(Debug)]
struct ItemSlot {
    title: String,
    kind: ItemKind,
    id: OnceLock<RemoteId>,
    finish_requested: AtomicBool,
}

impl ItemRef {
    pub fn new(title: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            inner: Arc::new(ItemSlot {
                title: title.into(),
                kind,
                id: OnceLock::new(),
                finish_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn kind(&self) -> ItemKind {
        self.inner.kind
    }

    pub fn id(&self) -> Option<&RemoteId> {
        self.inner.id.get()
    }

    pub fn resolve(&self, id: RemoteId) {
        if self.inner.id.set(id).is_err() {
            log::warn!("item '{}' resolved twice, keeping first id", self.title());
        }
    }

    /// Marks the item as closing. Returns `false` if it was already marked,
    /// so every item is finished at most once.
    pub fn request_finish(&self) -> bool {
        !self.inner.finish_requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_finishing(&self) -> bool {
        self.inner.finish_requested.load(Ordering::SeqCst)
    }

    pub fn same_item(&self, other: &ItemRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_never_reverts() {
        let mut latch = StatusLatch::default();
        assert_eq!(latch.status(), ItemStatus::Passed);
        latch.fail();
        assert_eq!(latch.status(), ItemStatus::Failed);
        latch.fail();
        assert!(latch.is_failed());
    }

    #[test]
    fn test_engine_status_mapping() {
        assert_eq!(ItemStatus::from_engine("success"), Some(ItemStatus::Passed));
        assert_eq!(ItemStatus::from_engine("failed"), Some(ItemStatus::Failed));
        assert_eq!(ItemStatus::from_engine("queued"), None);
    }

    #[test]
    fn test_item_finishes_once() {
        let item = ItemRef::new("step", ItemKind::Step);
        assert!(item.request_finish());
        assert!(!item.request_finish());
        assert!(item.is_finishing());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&ItemStatus::Skipped).unwrap();
        assert_eq!(json, "\"SKIPPED\"");
        let json = serde_json::to_string(&ItemKind::Suite).unwrap();
        assert_eq!(json, "\"SUITE\"");
    }
}
