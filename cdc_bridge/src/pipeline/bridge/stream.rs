use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{stream::BoxStream, Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::consumer::ConsumerHandle;

use super::{queue::EventReceiver, BridgeError, BridgeEvent, BridgeState};

pub(crate) struct PullLoop {
    receiver: EventReceiver,
    consumer: ConsumerHandle,
    cancel: CancellationToken,
    poll_interval: Duration,
    state: watch::Sender<BridgeState>,
    counter: u64,
    finished: bool,
}

impl PullLoop {
    pub(crate) fn new(
        receiver: EventReceiver,
        consumer: ConsumerHandle,
        cancel: CancellationToken,
        poll_interval: Duration,
        state: watch::Sender<BridgeState>,
    ) -> PullLoop {
        PullLoop {
            receiver,
            consumer,
            cancel,
            poll_interval,
            state,
            counter: 0,
            finished: false,
        }
    }

    async fn next(&mut self) -> Option<Result<BridgeEvent, BridgeError>> {
        if self.finished {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                debug!("bridge stream cancelled");
                return self.shutdown().await;
            }

            // queued events come back immediately, otherwise park for at most
            // one poll interval so cancellation is noticed
            match tokio::time::timeout(self.poll_interval, self.receiver.recv()).await {
                Ok(Some(event)) => {
                    let event = BridgeEvent::new(self.counter, event);
                    self.counter += 1;
                    return Some(Ok(event));
                }
                Ok(None) => {
                    debug!("consumer stopped delivering events");
                    return self.shutdown().await;
                }
                Err(_) => continue,
            }
        }
    }

    async fn shutdown(&mut self) -> Option<Result<BridgeEvent, BridgeError>> {
        self.finished = true;
        self.state.send_replace(BridgeState::Draining);

        // unblocks a handler waiting on a full queue
        self.cancel.cancel();
        self.receiver.close();

        let res = self.consumer.disconnect().await;
        self.state.send_replace(BridgeState::Closed);
        info!(
            group_id = %self.consumer.group_id(),
            delivered = self.counter,
            "cdc bridge closed"
        );

        match res {
            Ok(()) => None,
            Err(e) => {
                warn!("cdc bridge ended with error: {e}");
                Some(Err(e.into()))
            }
        }
    }
}

pin_project! {
    /// Pull side of the bridge. Yields events in broker order and ends after
    /// cancellation, or with a final `Err` if the consumer failed. Dropping
    /// the stream stops the consumer as well.
    #[must_use = "streams do nothing unless polled"]
    pub struct BridgeStream {
        #[pin]
        inner: BoxStream<'static, Result<BridgeEvent, BridgeError>>,
        cancel: CancellationToken,
        state: watch::Receiver<BridgeState>,
        group_id: String,
    }
}

impl BridgeStream {
    pub(crate) fn new(
        pull: PullLoop,
        cancel: CancellationToken,
        state: watch::Receiver<BridgeState>,
        group_id: String,
    ) -> BridgeStream {
        let inner = futures::stream::unfold(pull, |mut pull| async move {
            pull.next().await.map(|item| (item, pull))
        })
        // unfold must not be polled again once it has ended
        .fuse()
        .boxed();

        BridgeStream {
            inner,
            cancel,
            state,
            group_id,
        }
    }

    /// Token that ends the stream when cancelled, e.g. on client disconnect.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Cancels the stream and waits until the consumer has disconnected.
    pub async fn close(mut self) -> Result<(), BridgeError> {
        self.cancel.cancel();
        while let Some(item) = self.inner.next().await {
            item?;
        }
        Ok(())
    }
}

impl Stream for BridgeStream {
    type Item = Result<BridgeEvent, BridgeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}
