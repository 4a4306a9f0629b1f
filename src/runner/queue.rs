use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::matrix::RunUnit;
use crate::runner::cancel::CancelFlag;

/// Units a worker runs back to back, in order.
pub type Batch = Vec<RunUnit>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Batch>,
    /// Batches handed out and not yet finished. Their workers may still
    /// enqueue retries.
    in_flight: usize,
    closed: bool,
}

/// FIFO queue of pending batches shared by all workers.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(batches: impl IntoIterator<Item = Batch>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: batches.into_iter().collect(),
                ..QueueState::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Take the next batch, waiting while other batches are in flight.
    /// Returns `None` once the queue is drained, closed, or cancelled.
    pub async fn next(&self, cancel: &CancelFlag) -> Option<Batch> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.closed || cancel.is_cancelled() {
                    return None;
                }
                if let Some(batch) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(batch);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }
            tokio::select! {
                () = notified => {}
                () = cancel.cancelled() => {}
            }
        }
    }

    /// Enqueue a retry at the back.
    pub fn push_back(&self, batch: Batch) {
        self.state.lock().pending.push_back(batch);
        self.notify.notify_waiters();
    }

    /// Return unstarted units to the front, e.g. after a worker crash.
    pub fn push_front(&self, batch: Batch) {
        self.state.lock().pending.push_front(batch);
        self.notify.notify_waiters();
    }

    /// Mark a batch taken with [`next`](Self::next) as done.
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Stop handing out work.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.closed && !state.pending.is_empty()
    }

    /// Units still waiting to be dispatched.
    pub fn pending_units(&self) -> usize {
        self.state.lock().pending.iter().map(Vec::len).sum()
    }
}
