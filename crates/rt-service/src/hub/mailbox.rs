//! Coordinator mailbox monitoring.
//!
//! | Level    | Depth     |
//! |----------|-----------|
//! | Normal   | < 100     |
//! | Warning  | 100-500   |
//! | Critical | > 500     |

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const MAILBOX_NORMAL: usize = 100;
pub const MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth of the hub coordinator.
///
/// Senders call [`record_enqueue`](Self::record_enqueue) before handing a
/// message to the channel, and the coordinator calls
/// [`record_dequeue`](Self::record_dequeue) once it has handled it.
#[derive(Debug, Default)]
pub struct MailboxMonitor {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::set_hub_mailbox_depth(new_depth);

        match level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "rt.hub.mailbox",
                    depth = new_depth,
                    threshold = MAILBOX_WARNING,
                    "Hub mailbox depth critical"
                );
            }
            // Log once when crossing into warning
            MailboxLevel::Warning if new_depth == MAILBOX_NORMAL + 1 => {
                debug!(target: "rt.hub.mailbox", depth = new_depth, "Hub mailbox depth elevated");
            }
            _ => {}
        }
    }

    /// A send that was counted by `record_enqueue` never reached the channel.
    pub fn record_send_failed(&self) {
        self.decrement();
    }

    pub fn record_dequeue(&self) {
        self.decrement();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(&self) {
        // Saturating: never wrap below zero
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}
