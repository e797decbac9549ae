//! Outbound sender with message splitting and flood pacing.
//!
//! Servers are free to implement their own flood protection and there is
//! no way to observe how fast they drain their read buffer, so the sender
//! budgets the bytes written over a sliding horizon: many short lines can
//! go out back to back, while large replies have to wait for credit.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::common::error::{TransportError, TransportResult};
use crate::common::{OutboundLine, OutboundMessage};
use crate::config::FloodConfig;
use crate::outbound::queue::OutboundReceiver;

/// The transport's send primitive.
pub trait LineSink: Send + Sync {
    /// Send one already length-bounded line.
    fn send_line(&self, line: &OutboundLine) -> TransportResult<()>;
}

/// Sink that forwards wire lines to the transport's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl LineSink for ChannelSink {
    fn send_line(&self, line: &OutboundLine) -> TransportResult<()> {
        self.tx
            .send(line.to_wire())
            .map_err(|_| TransportError::SinkClosed)
    }
}

/// Split `text` into fragments of at most `max` bytes.
///
/// Each cut happens at the last whitespace at or before `max`; the
/// whitespace starts the next fragment, so concatenating the fragments
/// reproduces `text`. Without such whitespace the text is hard cut at the
/// limit (rounded down to a character boundary).
pub fn split_text(text: &str, max: usize) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut rest = text;

    while rest.len() > max {
        let cut = split_point(rest, max);
        let (head, tail) = rest.split_at(cut);
        fragments.push(head);
        rest = tail;
    }
    fragments.push(rest);
    fragments
}

fn split_point(text: &str, max: usize) -> usize {
    let whitespace = text
        .char_indices()
        .take_while(|(i, _)| *i <= max)
        .filter(|(i, c)| *i > 0 && c.is_whitespace())
        .map(|(i, _)| i)
        .last();

    if let Some(i) = whitespace {
        return i;
    }

    // Hard cut; a single character wider than `max` still has to move forward.
    (1..=max)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or_else(|| text.chars().next().map(char::len_utf8).unwrap_or(text.len()))
}

/// Sliding record of recent sends used to estimate flood pressure.
#[derive(Debug)]
pub struct FloodWindow {
    entries: VecDeque<(Instant, usize)>,
    horizon: Duration,
    budget: usize,
}

impl FloodWindow {
    pub fn new(horizon: Duration, budget: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            horizon,
            budget,
        }
    }

    /// Bytes sent within the horizon before `now`.
    pub fn pressure(&self, now: Instant) -> usize {
        self.entries
            .iter()
            .filter(|(at, _)| now.duration_since(*at) <= self.horizon)
            .map(|(_, size)| size)
            .sum()
    }

    /// Whether sending `size` more bytes now would exceed the budget.
    pub fn would_flood(&self, now: Instant, size: usize) -> bool {
        self.pressure(now) + size > self.budget
    }

    /// Record a send and forget everything older than the horizon.
    pub fn record(&mut self, now: Instant, size: usize) {
        self.entries.push_back((now, size));
        while let Some((at, _)) = self.entries.front() {
            if now.duration_since(*at) > self.horizon {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Single consumer of the outbound queue.
pub struct Sender<S: LineSink> {
    rx: OutboundReceiver,
    sink: S,
    max_payload: usize,
    delay: Duration,
    window: FloodWindow,
}

impl<S: LineSink> Sender<S> {
    pub fn new(rx: OutboundReceiver, sink: S, config: &FloodConfig) -> Self {
        Self {
            rx,
            sink,
            max_payload: config.max_payload,
            delay: config.delay(),
            window: FloodWindow::new(config.horizon(), config.byte_budget),
        }
    }

    /// Drain the queue until every queue handle is dropped or the sink closes.
    pub async fn run(mut self) {
        info!("Outbound sender started");
        while let Some(batch) = self.rx.recv().await {
            for message in batch {
                if let Err(e) = self.deliver(message).await {
                    error!("Outbound sender stopping: {}", e);
                    return;
                }
            }
        }
        info!("Outbound queue closed, sender ended");
    }

    /// Split one queued message and send every fragment in order.
    async fn deliver(&mut self, message: OutboundMessage) -> TransportResult<()> {
        let fragments = split_text(&message.text, self.max_payload);
        if fragments.len() > 1 {
            debug!(
                "Splitting {} bytes for {} into {} fragments",
                message.text.len(),
                message.target,
                fragments.len()
            );
        }

        for fragment in fragments {
            let line = OutboundLine {
                target: message.target.clone(),
                text: fragment.to_string(),
                delivery: message.delivery,
            };
            self.send_paced(&line).await?;
        }
        Ok(())
    }

    /// Wait until the window has room for `line`, then send it.
    async fn send_paced(&mut self, line: &OutboundLine) -> TransportResult<()> {
        let size = line.text.len();
        while self.window.would_flood(Instant::now(), size) {
            debug!(
                "Flood pressure {} + {} over budget, waiting {:?}",
                self.window.pressure(Instant::now()),
                size,
                self.delay
            );
            tokio::time::sleep(self.delay).await;
        }

        self.sink.send_line(line)?;
        self.window.record(Instant::now(), size);
        info!(target: "messages", ">>> {} - {}", line.target, line.text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::outbound::OutboundQueue;

    /// Sink recording every line with its send time.
    #[derive(Clone, Default)]
    struct RecordingSink {
        lines: Arc<Mutex<Vec<(Instant, OutboundLine)>>>,
    }

    impl RecordingSink {
        fn texts(&self) -> Vec<String> {
            self.lines.lock().iter().map(|(_, l)| l.text.clone()).collect()
        }
    }

    impl LineSink for RecordingSink {
        fn send_line(&self, line: &OutboundLine) -> TransportResult<()> {
            self.lines.lock().push((Instant::now(), line.clone()));
            Ok(())
        }
    }

    fn words(count: usize) -> String {
        "abcdefghi ".repeat(count)
    }

    #[test]
    fn test_short_text_is_not_split() {
        assert_eq!(split_text("hello world", 450), vec!["hello world"]);
        assert_eq!(split_text("", 450), vec![""]);
    }

    #[test]
    fn test_split_cuts_at_last_whitespace() {
        let fragments = split_text("aaaa bbbb cccc", 10);
        assert_eq!(fragments, vec!["aaaa bbbb", " cccc"]);
    }

    #[test]
    fn test_split_whitespace_exactly_at_limit() {
        let fragments = split_text("aaaaaaaaaa bbb", 10);
        assert_eq!(fragments, vec!["aaaaaaaaaa", " bbb"]);
    }

    #[test]
    fn test_split_hard_cut_without_whitespace() {
        let text = "x".repeat(25);
        let fragments = split_text(&text, 10);
        assert_eq!(fragments.iter().map(|f| f.len()).collect::<Vec<_>>(), vec![10, 10, 5]);
    }

    #[test]
    fn test_split_leading_whitespace_only_makes_progress() {
        let text = format!(" {}", "y".repeat(20));
        let fragments = split_text(&text, 10);
        assert_eq!(fragments.concat(), text);
        assert!(fragments.iter().all(|f| !f.is_empty() && f.len() <= 10));
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(12); // 24 bytes
        let fragments = split_text(&text, 9);
        assert!(fragments.iter().all(|f| f.len() <= 9));
        assert_eq!(fragments.concat(), text);
    }

    #[test]
    fn test_split_concatenation_reproduces_text() {
        for len in [451, 452, 900, 1337, 2000] {
            let text: String = words(300).chars().take(len).collect();
            let fragments = split_text(&text, 450);
            assert_eq!(fragments.concat(), text);
            assert!(fragments.iter().all(|f| f.len() <= 450));
        }
    }

    #[test]
    fn test_thousand_chars_make_three_fragments() {
        let text = words(100);
        assert_eq!(text.len(), 1000);

        let fragments = split_text(&text, 450);
        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.len() <= 450));
        // Every fragment after the first starts at a whitespace boundary
        assert!(fragments[1..].iter().all(|f| f.starts_with(' ')));
        assert_eq!(fragments.concat(), text);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_window_pressure_and_prune() {
        let mut window = FloodWindow::new(Duration::from_secs(4), 450);
        window.record(Instant::now(), 300);
        assert!(window.would_flood(Instant::now(), 200));
        assert!(!window.would_flood(Instant::now(), 150));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(window.pressure(Instant::now()), 0);
        window.record(Instant::now(), 10);
        assert_eq!(window.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_paces_large_replies() {
        let (queue, rx) = OutboundQueue::new();
        let sink = RecordingSink::default();
        let config = FloodConfig::default();
        let sender = Sender::new(rx, sink.clone(), &config);

        let start = Instant::now();
        queue.enqueue("#chan", &words(100));
        drop(queue);
        sender.run().await;

        let lines = sink.lines.lock().clone();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines.iter().map(|(_, l)| l.text.as_str()).collect::<String>(),
            words(100)
        );
        // First fragment goes out at once, later ones wait for the window
        assert_eq!(lines[0].0, start);
        assert!(lines[1].0 > start);
        assert!(lines[2].0 > lines[1].0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_chains_small_messages() {
        let (queue, rx) = OutboundQueue::new();
        let sink = RecordingSink::default();
        let sender = Sender::new(rx, sink.clone(), &FloodConfig::default());

        let start = Instant::now();
        queue.enqueue("#chan", "one");
        queue.enqueue("#chan", "two");
        queue.enqueue_notice("bob", "three");
        drop(queue);
        sender.run().await;

        let lines = sink.lines.lock().clone();
        assert_eq!(sink.texts(), vec!["one", "two", "three"]);
        assert!(lines.iter().all(|(at, _)| *at == start));
        assert_eq!(lines[2].1.delivery, crate::common::Delivery::Notice);
    }

    #[tokio::test]
    async fn test_channel_sink_renders_wire_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.send_line(&OutboundLine {
            target: "#chan".to_string(),
            text: "hi".to_string(),
            delivery: crate::common::Delivery::Message,
        })
        .unwrap();
        assert_eq!(rx.recv().await.unwrap(), "PRIVMSG #chan :hi");

        drop(rx);
        let err = sink
            .send_line(&OutboundLine {
                target: "#chan".to_string(),
                text: "lost".to_string(),
                delivery: crate::common::Delivery::Message,
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::SinkClosed));
    }
}
