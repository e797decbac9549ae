//! Channel wiring between the transport and the bot core.

use tokio::sync::{mpsc, watch};

use crate::common::LineEvent;

/// Channels owned by the transport session.
pub struct TransportChannels {
    /// Parsed inbound events, in arrival order.
    pub event_tx: mpsc::UnboundedSender<LineEvent>,
    /// Physical lines produced by the outbound sender.
    pub line_rx: mpsc::UnboundedReceiver<String>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Channels owned by the dispatcher and the outbound sender.
pub struct CoreChannels {
    pub event_rx: mpsc::UnboundedReceiver<LineEvent>,
    /// Handed to the sender's [`ChannelSink`](crate::outbound::ChannelSink).
    pub line_tx: mpsc::UnboundedSender<String>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    pub shutdown_tx: watch::Sender<bool>,
}

/// Every channel of one bot instance.
pub struct ChannelBundle {
    pub transport: TransportChannels,
    pub core: CoreChannels,
    pub control: ControlChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            transport: TransportChannels {
                event_tx,
                line_rx,
                shutdown_rx: shutdown_rx.clone(),
            },
            core: CoreChannels {
                event_rx,
                line_tx,
                shutdown_rx,
            },
            control: ControlChannels { shutdown_tx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
