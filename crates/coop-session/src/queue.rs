//! Deferred actions executed on the session's owning thread.
//!
//! Transport callbacks never touch session state directly. They push a
//! closure onto an [`ActionQueue`] and the owner drains it once per tick via
//! [`drain`]. Each action runs behind its own failure boundary: an error or a
//! panic is logged and the remaining actions still run.

use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, Sender};

use crate::error::SessionError;

/// A unit of deferred work against context `C`.
pub type Action<C> = Box<dyn FnOnce(&mut C) -> Result<(), SessionError> + Send>;

/// Multi-producer queue of actions, consumed by one owner.
pub struct ActionQueue<C> {
    sender: Sender<Action<C>>,
    receiver: Receiver<Action<C>>,
}

impl<C> ActionQueue<C> {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// A cloneable handle for producers on any thread.
    pub fn sender(&self) -> ActionSender<C> {
        ActionSender {
            sender: self.sender.clone(),
        }
    }

    pub fn push<F>(&self, action: F)
    where
        F: FnOnce(&mut C) -> Result<(), SessionError> + Send + 'static,
    {
        // The queue owns a receiver, so the channel cannot be disconnected.
        let _ = self.sender.send(Box::new(action));
    }

    /// Take everything queued right now. Actions pushed while the batch runs
    /// wait for the next drain.
    pub fn take_batch(&self) -> Vec<Action<C>> {
        let queued = self.receiver.len();
        self.receiver.try_iter().take(queued).collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<C> Default for ActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of an [`ActionQueue`].
pub struct ActionSender<C> {
    sender: Sender<Action<C>>,
}

impl<C> Clone for ActionSender<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C> ActionSender<C> {
    /// Enqueue an action. Returns `false` once the queue has been dropped.
    pub fn push<F>(&self, action: F) -> bool
    where
        F: FnOnce(&mut C) -> Result<(), SessionError> + Send + 'static,
    {
        self.sender.send(Box::new(action)).is_ok()
    }
}

/// Outcome counts of one drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failed: usize,
    pub panicked: usize,
}

/// Run a batch in order, isolating failures per action.
pub fn drain<C>(context: &mut C, batch: Vec<Action<C>>) -> DrainReport {
    let mut report = DrainReport::default();
    for action in batch {
        report.executed += 1;
        match panic::catch_unwind(AssertUnwindSafe(|| action(context))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                report.failed += 1;
                tracing::warn!(error = %e, "Deferred action failed");
            }
            Err(payload) => {
                report.panicked += 1;
                tracing::error!(reason = panic_message(payload.as_ref()), "Deferred action panicked");
            }
        }
    }
    if report.failed + report.panicked > 0 {
        tracing::debug!(?report, "Action queue drained with failures");
    }
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
