//! Per-connection outbound FIFO.

use tokio::sync::mpsc;
use tracing::warn;

use crate::common::{Delivery, OutboundMessage};

/// Receiving half, owned by the [`Sender`](super::Sender).
///
/// Every item is the full set of lines of one `enqueue` call, so lines of
/// concurrent calls can never interleave.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Vec<OutboundMessage>>;

/// Cloneable handle used to queue replies.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Vec<OutboundMessage>>,
}

impl OutboundQueue {
    /// Create a queue and the receiver the sender drains.
    pub fn new() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `text` for `target` as regular messages.
    ///
    /// Returns the number of lines queued.
    pub fn enqueue(&self, target: &str, text: &str) -> usize {
        self.enqueue_as(target, text, Delivery::Message)
    }

    /// Queue `text` for `target` as notices.
    pub fn enqueue_notice(&self, target: &str, text: &str) -> usize {
        self.enqueue_as(target, text, Delivery::Notice)
    }

    /// Queue `text`, one message per embedded line, preserving order.
    ///
    /// Empty lines are skipped since the protocol cannot carry them.
    pub fn enqueue_as(&self, target: &str, text: &str, delivery: Delivery) -> usize {
        let batch: Vec<OutboundMessage> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| OutboundMessage {
                target: target.to_string(),
                text: line.to_string(),
                delivery,
            })
            .collect();

        let count = batch.len();
        if count == 0 {
            return 0;
        }
        if self.tx.send(batch).is_err() {
            warn!("Outbound queue closed, dropping reply to {}", target);
            return 0;
        }
        count
    }
}
