//! Windowed batch collection keyed by suggestion id.
//!
//! The proposer bounds every per-round wait: responses for one sid are
//! buffered from the first arrival until `take_cutoff` elapses, then
//! the whole buffer is emitted and the key closes. Without the bound a
//! slow quorum could wedge the proposer indefinitely.

use std::collections::{HashMap, HashSet};
use std::task::Poll;
use std::time::Duration;

use tokio_util::time::delay_queue::{DelayQueue, Key};

/// Collects items into per-key windows bounded by a shared cutoff.
///
/// The first item for an unseen key opens a window and starts its
/// timer; further items for the key append to the buffer; when the
/// timer fires the buffer is emitted once and the key is closed for
/// good. Items for a closed key are dropped.
pub struct Windows<T> {
    cutoff: Duration,
    open: HashMap<String, (Key, Vec<T>)>,
    closed: HashSet<String>,
    timers: DelayQueue<String>,
}

impl<T> Windows<T> {
    /// Create a collector whose windows last `cutoff`.
    #[must_use]
    pub fn new(cutoff: Duration) -> Self {
        Self {
            cutoff,
            open: HashMap::new(),
            closed: HashSet::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Route an item to its key's window.
    ///
    /// Opens the window (and starts its timer) on the key's first
    /// item; silently drops items for keys whose window has already
    /// emitted.
    pub fn push(&mut self, key: String, item: T) {
        if self.closed.contains(&key) {
            return;
        }
        match self.open.get_mut(&key) {
            Some((_, items)) => items.push(item),
            None => {
                let timer = self.timers.insert(key.clone(), self.cutoff);
                self.open.insert(key, (timer, vec![item]));
            }
        }
    }

    /// Number of windows currently collecting.
    #[must_use]
    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    /// Wait for the next window to expire and emit its buffer.
    ///
    /// Pending while no open window exists, so this is meant to be
    /// polled from a `select!` loop alongside the message source that
    /// feeds [`push`](Self::push); a fresh `select!` iteration after a
    /// push re-registers the new timer.
    pub async fn next_window(&mut self) -> (String, Vec<T>) {
        futures::future::poll_fn(|cx| match self.timers.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let key = expired.into_inner();
                let items = match self.open.remove(&key) {
                    Some((_, items)) => items,
                    None => Vec::new(),
                };
                self.closed.insert(key.clone());
                Poll::Ready((key, items))
            }
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await
    }
}
