//! Per-process reporting context
//!
//! [`ReportingSession`] owns everything one reporting process knows: the
//! launch coordinator, the effect queue, the open suite/test/step items and
//! the meta-step frame stack. Lifecycle events are dispatched to handler
//! methods that only touch this context; remote writes are queued so they
//! reach the report store in event order.

use super::artifacts::{ArtifactBinder, PendingLog};
use super::events::{LifecycleEvent, StepDescriptor};
use super::launch::{LaunchCoordinator, LaunchRole};
use super::queue::EffectQueue;
use super::reconciler::{FrameStack, MetaStepFrame};
use super::state::{ItemKind, ItemRef, ItemStatus, LogLevel, RemoteId, StatusLatch};
use crate::client::{now_millis, FinishItem, LaunchSummary, LogEntry, ReportService, StartItem};
use crate::error::ReporterError;
use crate::utils::config::ReporterConfig;
use std::sync::Arc;

/// A step and the result the engine reported for it so far. A failure only
/// reaches frames, suite and launch once the step settles as FAILED.
#[derive(Debug, Clone)]
struct ActiveStep {
    item: ItemRef,
    outcome: Option<ItemStatus>,
}

pub struct ReportingSession {
    service: Arc<dyn ReportService>,
    queue: EffectQueue,
    launch: LaunchCoordinator,
    binder: ArtifactBinder,
    suite: Option<ItemRef>,
    suite_status: StatusLatch,
    test: Option<ItemRef>,
    step: Option<ActiveStep>,
    /// Step the engine finished most recently; kept until the next step
    /// starts so a late pass/fail still reaches it
    last_step: Option<ActiveStep>,
    /// Last failed step of the current test; receives failure evidence
    failed_step: Option<ItemRef>,
    frames: FrameStack,
    summary: Option<LaunchSummary>,
}

impl ReportingSession {
    pub fn new(
        service: Arc<dyn ReportService>,
        config: &ReporterConfig,
        binder: ArtifactBinder,
    ) -> anyhow::Result<Self> {
        let launch = LaunchCoordinator::new(service.clone(), config)?;
        Ok(Self {
            service,
            queue: EffectQueue::new(),
            launch,
            binder,
            suite: None,
            suite_status: StatusLatch::default(),
            test: None,
            step: None,
            last_step: None,
            failed_step: None,
            frames: FrameStack::new(),
            summary: None,
        })
    }

    pub fn launch(&self) -> &LaunchCoordinator {
        &self.launch
    }

    /// Summary of the launch once this process closed it
    pub fn summary(&self) -> Option<&LaunchSummary> {
        self.summary.as_ref()
    }

    /// Report writes that failed so far
    pub fn failed_writes(&self) -> usize {
        self.queue.failures()
    }

    /// Dispatch one lifecycle event. Only fatal errors are returned;
    /// everything else is logged and reporting continues.
    pub async fn handle(&mut self, event: LifecycleEvent) -> Result<(), ReporterError> {
        log::debug!("event: {}", event.name());
        match event {
            LifecycleEvent::WorkerPoolStarting => self.launch.start_pool().await?,
            LifecycleEvent::WorkerPoolFinished => self.on_pool_finished().await,
            LifecycleEvent::AllTestsStarting => self.launch.start_run().await?,
            LifecycleEvent::AllTestsFinished => self.on_all_finished().await,
            LifecycleEvent::SuiteStarting { title } => self.on_suite_starting(&title),
            LifecycleEvent::SuiteFinished { title } => self.on_suite_finished(&title),
            LifecycleEvent::TestStarting { title } => self.on_test_starting(&title),
            LifecycleEvent::TestSkipped { title } => self.on_test_skipped(&title),
            LifecycleEvent::TestPassed { title } => self.on_test_passed(&title),
            LifecycleEvent::TestFailed { title, error } => {
                self.on_test_failed(&title, &error).await
            }
            LifecycleEvent::TestFinished { title } => self.on_test_finished(&title),
            LifecycleEvent::StepStarting { step } => self.on_step_starting(&step),
            LifecycleEvent::StepFinished { step } => self.on_step_finished(&step),
            LifecycleEvent::StepFailed { step } => self.on_step_failed(&step),
            LifecycleEvent::StepPassed { step } => self.on_step_passed(&step),
            LifecycleEvent::Log { level, message } => self.on_log(level, message),
        }
        Ok(())
    }

    /// End of input: close whatever is still open, flush the queue and close
    /// the launch if this process owns it.
    pub async fn shutdown(&mut self) {
        self.close_suite();
        self.finalize_launch().await;
    }

    // ---- run / pool -------------------------------------------------------

    async fn on_pool_finished(&mut self) {
        if self.launch.role() == Some(LaunchRole::PoolController) {
            self.close_suite();
            self.finalize_launch().await;
        } else {
            self.queue.drain().await;
        }
    }

    async fn on_all_finished(&mut self) {
        match self.launch.role() {
            Some(LaunchRole::Standalone) => {
                self.close_suite();
                self.finalize_launch().await;
            }
            Some(LaunchRole::Participant) => {
                // Workers close their own suite only; the launch belongs to the controller
                self.close_suite();
                self.queue.drain().await;
            }
            Some(LaunchRole::PoolController) | None => self.queue.drain().await,
        }
    }

    async fn finalize_launch(&mut self) {
        self.queue.drain().await;
        match self.launch.finalize().await {
            Ok(Some(summary)) => self.summary = Some(summary),
            Ok(None) => {}
            Err(e) => log::error!("{:#}", e),
        }
    }

    // ---- suite ------------------------------------------------------------

    fn on_suite_starting(&mut self, title: &str) {
        if self.active_launch("suiteStarting").is_none() {
            return;
        }
        // Suites do not nest; a suite left open is closed before the next one
        self.close_suite();

        let suite = ItemRef::new(title, ItemKind::Suite);
        self.start_item(&suite, None);
        self.suite = Some(suite);
        self.suite_status = StatusLatch::default();
    }

    fn on_suite_finished(&mut self, title: &str) {
        if self.suite.as_ref().map_or(true, |s| s.is_finishing()) {
            log::debug!("suite '{}' finished without an open suite item", title);
            return;
        }
        self.close_suite();
    }

    /// Close the open suite and everything below it
    fn close_suite(&mut self) {
        self.close_test();
        if let Some(suite) = self.suite.clone() {
            log::debug!(
                "suite '{}' finished {}",
                suite.title(),
                self.suite_status.status()
            );
            self.finish_item(&suite, self.suite_status.status(), None);
        }
    }

    // ---- test -------------------------------------------------------------

    fn on_test_starting(&mut self, title: &str) {
        if self.active_launch("testStarting").is_none() {
            return;
        }
        self.close_test();

        let test = ItemRef::new(title, ItemKind::Test);
        let parent = self.open_suite();
        self.start_item(&test, parent.as_ref());
        self.test = Some(test);
        self.step = None;
        self.last_step = None;
        self.failed_step = None;
    }

    fn on_test_skipped(&mut self, title: &str) {
        if self.active_launch("testSkipped").is_none() {
            return;
        }
        let test = ItemRef::new(title, ItemKind::Test);
        let parent = self.open_suite();
        self.start_item(&test, parent.as_ref());
        self.finish_item(&test, ItemStatus::Skipped, None);
        log::debug!("test '{}' skipped", title);
    }

    fn on_test_passed(&mut self, title: &str) {
        match self.open_test() {
            Some(test) => {
                log::debug!("test '{}' passed", title);
                self.close_open_steps();
                self.finish_item(&test, ItemStatus::Passed, None);
            }
            None => log::debug!("test '{}' passed in another process", title),
        }
    }

    async fn on_test_failed(&mut self, title: &str, error: &str) {
        // Failures relayed from workers count even without a local test item
        self.launch.record_failure();
        self.suite_status.fail();

        let Some(test) = self.open_test() else {
            log::debug!("test '{}' failed in another process", title);
            return;
        };
        log::debug!("test '{}' failed", title);

        let logs = self
            .binder
            .bind_failure(self.failed_step.as_ref(), &test, error)
            .await;
        for pending in logs {
            self.send_log(pending);
        }

        self.close_open_steps();
        self.finish_item(&test, ItemStatus::Failed, Some(error.to_string()));
    }

    fn on_test_finished(&mut self, title: &str) {
        log::debug!("test '{}' finished", title);
        self.close_test();
        self.test = None;
        self.step = None;
        self.last_step = None;
        self.failed_step = None;
    }

    /// Forced cleanup of the current test: open steps first, then the test
    /// itself if no pass/fail event closed it
    fn close_test(&mut self) {
        self.close_open_steps();
        if let Some(test) = self.open_test() {
            let status = if self.failed_step.is_some() {
                ItemStatus::Failed
            } else {
                ItemStatus::Passed
            };
            log::debug!(
                "test '{}' closed without a result, using {}",
                test.title(),
                status
            );
            self.finish_item(&test, status, None);
        }
    }

    // ---- step -------------------------------------------------------------

    fn on_step_starting(&mut self, descriptor: &StepDescriptor) {
        let Some(test) = self.open_test() else {
            log::debug!("step '{}' outside of a test, ignored", descriptor.display);
            return;
        };
        // Steps still waiting for an end or a result settle before the next opens
        self.close_active_step();
        self.close_last_step();

        let parent = self.reconcile_frames(descriptor, &test);
        let item = ItemRef::new(descriptor.title(), ItemKind::Step);
        self.start_item(&item, Some(&parent));
        self.step = Some(ActiveStep {
            item,
            outcome: None,
        });
    }

    /// Bring the frame stack in line with the step's meta-step chain and
    /// return the item the step should be nested under
    fn reconcile_frames(&mut self, descriptor: &StepDescriptor, test: &ItemRef) -> ItemRef {
        let plan = self.frames.plan(&descriptor.meta_steps);
        if !plan.is_noop() {
            log::debug!(
                "meta-steps: keep {}, close {}, open {}",
                plan.keep,
                plan.close,
                plan.open.len()
            );
        }

        for frame in self.frames.truncate_to(plan.keep) {
            self.finish_frame(&frame);
        }

        for meta in &plan.open {
            let parent = self.frames.innermost().cloned().unwrap_or_else(|| test.clone());
            let item = ItemRef::new(meta.title(), ItemKind::Step);
            log::debug!(
                "meta-step '{}' started, nested: {}",
                item.title(),
                parent.kind() == ItemKind::Step
            );
            self.start_item(&item, Some(&parent));
            self.frames.push(MetaStepFrame::new(meta, item));
        }

        self.frames.innermost().cloned().unwrap_or_else(|| test.clone())
    }

    fn on_step_passed(&mut self, descriptor: &StepDescriptor) {
        let Some((step, ended)) = self.record_outcome(descriptor, ItemStatus::Passed) else {
            log::debug!("step '{}' passed but is not tracked", descriptor.display);
            return;
        };
        // A pass cancels an earlier failure of the same step
        if self
            .failed_step
            .as_ref()
            .map_or(false, |f| f.same_item(&step.item))
        {
            self.failed_step = None;
        }
        if ended {
            self.settle_step(&step, ItemStatus::Passed);
        }
    }

    fn on_step_failed(&mut self, descriptor: &StepDescriptor) {
        let Some((step, ended)) = self.record_outcome(descriptor, ItemStatus::Failed) else {
            log::debug!("step '{}' failed but is not tracked", descriptor.display);
            return;
        };
        self.failed_step = Some(step.item.clone());
        if ended {
            self.settle_step(&step, ItemStatus::Failed);
        }
    }

    /// Store a result on the open step, or on the step the engine already
    /// finished. The flag tells whether the engine finished it.
    fn record_outcome(
        &mut self,
        descriptor: &StepDescriptor,
        status: ItemStatus,
    ) -> Option<(ActiveStep, bool)> {
        let title = descriptor.title();
        if let Some(step) = self.step.as_mut().filter(|s| s.item.title() == title) {
            step.outcome = Some(status);
            return Some((step.clone(), false));
        }
        let step = self
            .last_step
            .as_mut()
            .filter(|s| s.item.title() == title)?;
        step.outcome = Some(status);
        Some((step.clone(), true))
    }

    fn on_step_finished(&mut self, descriptor: &StepDescriptor) {
        let Some(mut step) = self.step.take() else {
            log::debug!("step '{}' finished but no step is open", descriptor.display);
            return;
        };
        match descriptor.engine_status().or(step.outcome) {
            Some(status) => {
                if status == ItemStatus::Failed {
                    self.failed_step = Some(step.item.clone());
                }
                step.outcome = Some(status);
                self.settle_step(&step, status);
            }
            None => log::debug!("step '{}' finished before its result", step.item.title()),
        }
        self.last_step = Some(step);
    }

    /// Close a step with its final status; a FAILED step latches its frames,
    /// the suite and the launch
    fn settle_step(&mut self, step: &ActiveStep, status: ItemStatus) {
        if step.item.is_finishing() {
            return;
        }
        if status == ItemStatus::Failed {
            self.frames.fail_all();
            self.suite_status.fail();
            self.launch.record_failure();
        }
        self.finish_item(&step.item, status, None);
    }

    fn close_active_step(&mut self) {
        if let Some(step) = self.step.take() {
            self.settle_step(&step, step.outcome.unwrap_or(ItemStatus::Passed));
        }
    }

    fn close_last_step(&mut self) {
        if let Some(step) = self.last_step.take() {
            self.settle_step(&step, step.outcome.unwrap_or(ItemStatus::Passed));
        }
    }

    /// Close the open step, the failed step and every meta-step frame,
    /// innermost first
    fn close_open_steps(&mut self) {
        self.close_active_step();
        self.close_last_step();
        if let Some(failed) = self.failed_step.clone() {
            self.finish_item(&failed, ItemStatus::Failed, None);
        }
        if !self.frames.is_empty() {
            log::debug!("closing {} open meta-steps", self.frames.len());
        }
        for frame in self.frames.drain_all() {
            self.finish_frame(&frame);
        }
    }

    fn finish_frame(&self, frame: &MetaStepFrame) {
        log::debug!("finishing '{}' step", frame.item.title());
        self.finish_item(&frame.item, frame.status.status(), None);
    }

    // ---- logs -------------------------------------------------------------

    fn on_log(&mut self, level: LogLevel, message: String) {
        let target = self
            .step
            .as_ref()
            .map(|s| s.item.clone())
            .or_else(|| self.open_test());
        if let Some(target) = target {
            self.send_log(PendingLog {
                target,
                entry: LogEntry {
                    level,
                    message,
                    time: now_millis(),
                },
                attachment: None,
            });
        }
    }

    // ---- queued remote writes ----------------------------------------------

    fn open_suite(&self) -> Option<ItemRef> {
        self.suite.clone().filter(|s| !s.is_finishing())
    }

    fn open_test(&self) -> Option<ItemRef> {
        self.test.clone().filter(|t| !t.is_finishing())
    }

    fn active_launch(&self, event: &'static str) -> Option<RemoteId> {
        let id = self.launch.launch_id().cloned();
        if id.is_none() {
            log::warn!("{}", ReporterError::NoActiveLaunch(event));
        }
        id
    }

    fn start_item(&self, item: &ItemRef, parent: Option<&ItemRef>) {
        let Some(launch_id) = self.active_launch("start item") else {
            return;
        };
        let service = self.service.clone();
        let item = item.clone();
        let parent = parent.cloned();
        let start_time = now_millis();
        let has_stats = item.kind().default_has_stats();

        self.queue.enqueue(
            format!("start {:?} '{}'", item.kind(), item.title()),
            move || async move {
                let parent_id = match &parent {
                    Some(p) => Some(
                        p.id()
                            .cloned()
                            .ok_or_else(|| ReporterError::Unresolved(p.title().to_string()))?,
                    ),
                    None => None,
                };
                let request = StartItem {
                    name: item.title().to_string(),
                    kind: item.kind(),
                    launch_id,
                    parent_id,
                    has_stats,
                    start_time,
                };
                let id = service.start_item(&request).await?;
                log::debug!("{}: '{}' is started", id, item.title());
                item.resolve(id);
                Ok(())
            },
        );
    }

    fn finish_item(&self, item: &ItemRef, status: ItemStatus, message: Option<String>) {
        if !item.request_finish() {
            log::debug!("'{}' already closed", item.title());
            return;
        }
        let Some(launch_id) = self.active_launch("finish item") else {
            return;
        };
        let service = self.service.clone();
        let item = item.clone();
        let end_time = now_millis();

        self.queue.enqueue(
            format!("finish {:?} '{}' {}", item.kind(), item.title(), status),
            move || async move {
                let id = item
                    .id()
                    .cloned()
                    .ok_or_else(|| ReporterError::Unresolved(item.title().to_string()))?;
                let finish = FinishItem {
                    launch_id,
                    status,
                    end_time,
                    message,
                };
                service.finish_item(&id, &finish).await
            },
        );
    }

    fn send_log(&self, pending: PendingLog) {
        let Some(launch_id) = self.active_launch("log") else {
            return;
        };
        let service = self.service.clone();

        self.queue.enqueue(
            format!("log to '{}'", pending.target.title()),
            move || async move {
                let id = pending
                    .target
                    .id()
                    .cloned()
                    .ok_or_else(|| ReporterError::Unresolved(pending.target.title().to_string()))?;
                service
                    .send_log(&launch_id, &id, &pending.entry, pending.attachment.as_ref())
                    .await
            },
        );
    }
}
