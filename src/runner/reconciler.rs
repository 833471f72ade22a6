//! Meta-step frame stack reconciliation
//!
//! The engine reports each step together with the chain of meta-steps that
//! encloses it. The report store needs those meta-steps as real nested
//! items, so before a step opens, the currently open frames are compared with
//! the step's chain:
//!
//! * the longest common prefix is reused as is,
//! * open frames past that prefix are closed innermost first,
//! * chain entries past that prefix are opened outermost first.

use super::events::{MetaStep, MetaStepKey};
use super::state::{ItemRef, StatusLatch};

/// An open meta-step item
#[derive(Debug, Clone)]
pub struct MetaStepFrame {
    pub key: MetaStepKey,
    pub item: ItemRef,
    pub status: StatusLatch,
}

impl MetaStepFrame {
    pub fn new(meta: &MetaStep, item: ItemRef) -> Self {
        Self {
            key: meta.key(),
            item,
            status: StatusLatch::default(),
        }
    }
}

/// What to do with the frame stack for an incoming step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Number of frames reused from the bottom of the stack
    pub keep: usize,
    /// Number of frames to close, taken from the top of the stack
    pub close: usize,
    /// Meta-steps to open, outermost first
    pub open: Vec<MetaStep>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.close == 0 && self.open.is_empty()
    }
}

/// Compare a step's meta-step chain with the open frames
pub fn reconcile(chain: &[MetaStep], stack: &[MetaStepFrame]) -> Reconciliation {
    let keep = chain
        .iter()
        .zip(stack)
        .take_while(|(meta, frame)| meta.key() == frame.key)
        .count();

    Reconciliation {
        keep,
        close: stack.len() - keep,
        open: chain[keep..].to_vec(),
    }
}

/// Open meta-step frames, outermost at index 0
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<MetaStepFrame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[MetaStepFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn plan(&self, chain: &[MetaStep]) -> Reconciliation {
        reconcile(chain, &self.frames)
    }

    /// Innermost open frame item
    pub fn innermost(&self) -> Option<&ItemRef> {
        self.frames.last().map(|f| &f.item)
    }

    pub fn push(&mut self, frame: MetaStepFrame) {
        self.frames.push(frame);
    }

    /// Remove every frame above `keep`, innermost first
    pub fn truncate_to(&mut self, keep: usize) -> Vec<MetaStepFrame> {
        let mut closed = Vec::new();
        while self.frames.len() > keep {
            if let Some(frame) = self.frames.pop() {
                closed.push(frame);
            }
        }
        closed
    }

    /// Remove every frame, innermost first
    pub fn drain_all(&mut self) -> Vec<MetaStepFrame> {
        self.truncate_to(0)
    }

    /// Latch every open frame as failed
    pub fn fail_all(&mut self) {
        for frame in &mut self.frames {
            frame.status.fail();
        }
    }
}
