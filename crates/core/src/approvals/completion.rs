use std::sync::{Arc, Mutex};

use crate::domain::approval::CompletionSignal;

/// Receives the terminal outcome of a request so the originating subsystem can
/// react (post the expense, unlock the budget, ...).
pub trait CompletionListener: Send + Sync {
    fn on_completed(&self, signal: &CompletionSignal);
}

#[derive(Clone, Default)]
pub struct InMemoryCompletionListener {
    signals: Arc<Mutex<Vec<CompletionSignal>>>,
}

impl InMemoryCompletionListener {
    pub fn signals(&self) -> Vec<CompletionSignal> {
        match self.signals.lock() {
            Ok(signals) => signals.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CompletionListener for InMemoryCompletionListener {
    fn on_completed(&self, signal: &CompletionSignal) {
        match self.signals.lock() {
            Ok(mut signals) => signals.push(signal.clone()),
            Err(poisoned) => poisoned.into_inner().push(signal.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCompletionListener;

impl CompletionListener for NoopCompletionListener {
    fn on_completed(&self, _signal: &CompletionSignal) {}
}
