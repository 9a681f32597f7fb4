//! Ordered, backpressure-aware queue in front of the stream's send half.
//!
//! The send half of the gRPC stream is not safe for concurrent writers, so
//! every producer funnels through this bounded MPSC queue and a single
//! consumer (the session's connection task) drains it in submission order.
//! Frames still queued when the session dies are dropped; the platform is
//! authoritative and re-requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::frame::OutboundFrame;

/// The session closed the receiving side; the frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxClosed;

impl std::fmt::Display for OutboxClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "outbox closed")
    }
}

impl std::error::Error for OutboxClosed {}

struct Shared {
    epoch: Instant,
    last_submit_millis: AtomicU64,
}

/// Producer handle. Cloneable; all clones feed the same queue.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundFrame>,
    shared: Arc<Shared>,
}

/// Consumer handle held by the session's connection task.
pub struct OutboxReceiver {
    rx: mpsc::Receiver<OutboundFrame>,
}

/// Create an outbox with the given bounded capacity.
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        epoch: Instant::now(),
        last_submit_millis: AtomicU64::new(0),
    });
    (Outbox { tx, shared }, OutboxReceiver { rx })
}

impl Outbox {
    /// Enqueue a frame, waiting for capacity if the queue is full. Returns
    /// once the frame is accepted; wire order is submission order.
    pub async fn submit(&self, frame: OutboundFrame) -> Result<(), OutboxClosed> {
        self.tx.send(frame).await.map_err(|_| OutboxClosed)?;
        self.touch();
        Ok(())
    }

    /// How long since the last accepted submission. Drives keepalive
    /// emission: an outbox that has been busy does not need heartbeats.
    pub fn idle_for(&self) -> Duration {
        let last = self.shared.last_submit_millis.load(Ordering::Acquire);
        self.shared
            .epoch
            .elapsed()
            .saturating_sub(Duration::from_millis(last))
    }

    fn touch(&self) {
        let now = self.shared.epoch.elapsed().as_millis() as u64;
        self.shared.last_submit_millis.store(now, Ordering::Release);
    }
}

impl OutboxReceiver {
    /// Receive the next frame; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    /// Hand the raw receiver to a stream adapter.
    pub fn into_inner(self) -> mpsc::Receiver<OutboundFrame> {
        self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OutboundFrame;

    #[tokio::test]
    async fn frames_drain_in_submission_order() {
        let (outbox, mut rx) = outbox(8);
        for n in 0..5 {
            outbox
                .submit(OutboundFrame::KeepAlive {
                    timestamp_millis: n,
                })
                .await
                .unwrap();
        }
        for n in 0..5 {
            match rx.recv().await.unwrap() {
                OutboundFrame::KeepAlive { timestamp_millis } => assert_eq!(timestamp_millis, n),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn submit_fails_once_receiver_is_gone() {
        let (outbox, rx) = outbox(1);
        drop(rx);
        let err = outbox
            .submit(OutboundFrame::KeepAlive {
                timestamp_millis: 0,
            })
            .await
            .unwrap_err();
        assert_eq!(err, OutboxClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_tracking_resets_on_submit() {
        let (outbox, _rx) = outbox(4);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(outbox.idle_for() >= Duration::from_secs(10));
        outbox
            .submit(OutboundFrame::KeepAlive {
                timestamp_millis: 1,
            })
            .await
            .unwrap();
        assert!(outbox.idle_for() < Duration::from_secs(1));
    }
}
