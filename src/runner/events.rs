use super::state::{ItemStatus, LogLevel};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest step title sent to the report store
pub const MAX_STEP_TITLE: usize = 300;

/// A grouping step (page-object method, BDD keyword, ...) that encloses
/// other steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetaStep {
    #[serde(default)]
    pub actor: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Title to show; derived from actor/name/args when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Identity of a meta-step: two meta-steps are the same frame iff their
/// actor, name and joined arguments match
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaStepKey {
    pub actor: String,
    pub name: String,
    pub args: String,
}

impl MetaStep {
    pub fn new(actor: &str, name: &str, args: &[&str]) -> Self {
        Self {
            actor: actor.to_string(),
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            display: None,
        }
    }

    pub fn key(&self) -> MetaStepKey {
        MetaStepKey {
            actor: self.actor.clone(),
            name: self.name.clone(),
            args: self.args.join(","),
        }
    }

    pub fn title(&self) -> String {
        if let Some(display) = &self.display {
            return display.clone();
        }
        let call = if self.args.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.args.join(", "))
        };
        if self.actor.is_empty() {
            call
        } else {
            format!("{} {}", self.actor, call)
        }
    }
}

/// A single executed step as reported by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    pub display: String,
    /// Enclosing meta-steps, outermost first
    #[serde(default)]
    pub meta_steps: Vec<MetaStep>,
    /// Engine-side status ("success", "failed") if the engine knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StepDescriptor {
    pub fn new(display: &str) -> Self {
        Self {
            display: display.to_string(),
            meta_steps: Vec::new(),
            status: None,
        }
    }

    pub fn within(mut self, meta_steps: Vec<MetaStep>) -> Self {
        self.meta_steps = meta_steps;
        self
    }

    /// Display string cut to [`MAX_STEP_TITLE`] characters
    pub fn title(&self) -> String {
        self.display.chars().take(MAX_STEP_TITLE).collect()
    }

    pub fn engine_status(&self) -> Option<ItemStatus> {
        self.status.as_deref().and_then(ItemStatus::from_engine)
    }
}

/// Lifecycle notifications from the test execution engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LifecycleEvent {
    // Worker pool (controller process only)
    WorkerPoolStarting,
    WorkerPoolFinished,

    // Run
    AllTestsStarting,
    AllTestsFinished,

    // Suite
    SuiteStarting { title: String },
    SuiteFinished { title: String },

    // Test
    TestStarting { title: String },
    TestSkipped { title: String },
    TestPassed { title: String },
    TestFailed { title: String, error: String },
    TestFinished { title: String },

    // Step
    StepStarting { step: StepDescriptor },
    StepFinished { step: StepDescriptor },
    StepFailed { step: StepDescriptor },
    StepPassed { step: StepDescriptor },

    /// Runner output forwarded to the current step or test
    Log { level: LogLevel, message: String },
}

impl LifecycleEvent {
    /// Tag used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::WorkerPoolStarting => "workerPoolStarting",
            LifecycleEvent::WorkerPoolFinished => "workerPoolFinished",
            LifecycleEvent::AllTestsStarting => "allTestsStarting",
            LifecycleEvent::AllTestsFinished => "allTestsFinished",
            LifecycleEvent::SuiteStarting { .. } => "suiteStarting",
            LifecycleEvent::SuiteFinished { .. } => "suiteFinished",
            LifecycleEvent::TestStarting { .. } => "testStarting",
            LifecycleEvent::TestSkipped { .. } => "testSkipped",
            LifecycleEvent::TestPassed { .. } => "testPassed",
            LifecycleEvent::TestFailed { .. } => "testFailed",
            LifecycleEvent::TestFinished { .. } => "testFinished",
            LifecycleEvent::StepStarting { .. } => "stepStarting",
            LifecycleEvent::StepFinished { .. } => "stepFinished",
            LifecycleEvent::StepFailed { .. } => "stepFailed",
            LifecycleEvent::StepPassed { .. } => "stepPassed",
            LifecycleEvent::Log { .. } => "log",
        }
    }
}

/// Reads one JSON-encoded [`LifecycleEvent`] per line. Blank lines are skipped.
pub struct EventStream<R> {
    reader: R,
    line: String,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin> EventStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }

    /// Next event, or `None` at end of input
    pub async fn next_event(&mut self) -> Result<Option<LifecycleEvent>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event = serde_json::from_str(trimmed)
                .with_context(|| format!("Invalid lifecycle event on line {}", self.line_no))?;
            return Ok(Some(event));
        }
    }
}
