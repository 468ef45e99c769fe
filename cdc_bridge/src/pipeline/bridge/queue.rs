use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    conversions::cdc_event::CdcEvent,
    pipeline::consumer::{EventHandler, HandlerError},
};

/// How many events may wait for the puller before the broker side is slowed down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backlog {
    /// Never blocks the broker. A puller that stops pulling lets the queue grow.
    #[default]
    Unbounded,
    /// Suspends the consumer's event handler while `n` events are pending.
    Bounded(usize),
}

pub(crate) enum EventSender {
    Unbounded(mpsc::UnboundedSender<CdcEvent>),
    Bounded(mpsc::Sender<CdcEvent>),
}

pub(crate) enum EventReceiver {
    Unbounded(mpsc::UnboundedReceiver<CdcEvent>),
    Bounded(mpsc::Receiver<CdcEvent>),
}

pub(crate) fn event_queue(backlog: Backlog) -> (EventSender, EventReceiver) {
    match backlog {
        Backlog::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventSender::Unbounded(tx), EventReceiver::Unbounded(rx))
        }
        Backlog::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (EventSender::Bounded(tx), EventReceiver::Bounded(rx))
        }
    }
}

impl EventReceiver {
    /// Cancel safe: an event is either returned or stays queued.
    pub(crate) async fn recv(&mut self) -> Option<CdcEvent> {
        match self {
            EventReceiver::Unbounded(rx) => rx.recv().await,
            EventReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    pub(crate) fn close(&mut self) {
        match self {
            EventReceiver::Unbounded(rx) => rx.close(),
            EventReceiver::Bounded(rx) => rx.close(),
        }
    }
}

/// Consumer side of the bridge: pushes every event into the queue, waking
/// the puller if it is parked.
pub(crate) struct QueueHandler {
    sender: EventSender,
    cancel: CancellationToken,
}

impl QueueHandler {
    pub(crate) fn new(sender: EventSender, cancel: CancellationToken) -> QueueHandler {
        QueueHandler { sender, cancel }
    }
}

#[async_trait]
impl EventHandler for QueueHandler {
    async fn on_event(&self, event: CdcEvent) -> Result<(), HandlerError> {
        let offset = event.offset();
        let delivered = match &self.sender {
            EventSender::Unbounded(tx) => tx.send(event).is_ok(),
            EventSender::Bounded(tx) => tokio::select! {
                res = tx.send(event) => res.is_ok(),
                _ = self.cancel.cancelled() => false,
            },
        };

        if !delivered {
            debug!(offset, "bridge stream closed, dropping event");
        }
        Ok(())
    }
}
