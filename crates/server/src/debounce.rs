//! Coalesces bursts of change notifications into one settled event per path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Minimum quiet period before a touched path is forwarded.
pub const SETTLE_WINDOW: Duration = Duration::from_secs(5);

/// Last-touch time of every path with an unsettled change.
#[derive(Debug)]
pub struct DebounceLedger {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl DebounceLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Removes and returns every path idle for at least the window.
    pub fn settle(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut settled = Vec::new();
        self.pending.retain(|path, last| {
            if now.saturating_duration_since(*last) >= window {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });
        settled.sort();
        settled
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Runs until `touches` closes. The settle timer fires `2 * window` after
/// the first touch into an idle ledger and re-arms while paths stay pending.
///
/// `settled` should be a capacity-one channel: each handoff waits for the
/// consumer, so a path is never queued twice while its first settled event
/// is still unprocessed.
pub async fn run_debouncer(
    mut touches: UnboundedReceiver<PathBuf>,
    settled: Sender<PathBuf>,
    window: Duration,
) {
    let mut ledger = DebounceLedger::new(window);
    let mut deadline: Option<Instant> = None;
    let interval = window * 2;

    loop {
        let timer_at = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            maybe_path = touches.recv() => {
                let Some(path) = maybe_path else {
                    break;
                };
                let now = Instant::now();
                ledger.touch(path, now);
                if deadline.is_none() {
                    deadline = Some(now + interval);
                }
            }
            _ = sleep_until(timer_at), if deadline.is_some() => {
                let now = Instant::now();
                for path in ledger.settle(now) {
                    debug!("settled {}", path.display());
                    if settled.send(path).await.is_err() {
                        return;
                    }
                }
                deadline = if ledger.is_empty() {
                    None
                } else {
                    Some(now + interval)
                };
            }
        }
    }

    if !ledger.is_empty() {
        debug!("dropping {} unsettled paths", ledger.len());
    }
}
