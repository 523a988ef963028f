//! Delivery loop between a bus client and a [`Subscriber`].
//!
//! The bus client pushes [`Delivery`] values into an mpsc channel and waits
//! on each delivery's ack receiver. The loop handles every delivery on its
//! own task, so a slow message never blocks the ones behind it.

use std::sync::Arc;
use std::time::Duration;

use courier_core::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::subscriber::Subscriber;
use crate::network::ShutdownController;

/// Default time in-flight deliveries get to finish after shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Settlement reported back to the bus client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Handled; commit the offset or delete the message.
    Ack,
    /// Failed; redeliver or dead-letter per the client's policy.
    Nack,
}

/// One consumed message and the channel its settlement goes back on.
///
/// If the delivery is dropped unsettled (its task panicked or was aborted
/// during shutdown), the receiver sees a closed channel; clients should treat
/// that as [`Ack::Nack`].
#[derive(Debug)]
pub struct Delivery {
    pub message: Message,
    ack: oneshot::Sender<Ack>,
}

impl Delivery {
    #[must_use]
    pub fn new(message: Message) -> (Self, oneshot::Receiver<Ack>) {
        let (ack, rx) = oneshot::channel();
        (Self { message, ack }, rx)
    }

    fn settle(self, ack: Ack) {
        if self.ack.send(ack).is_err() {
            debug!(message_uuid = %self.message.uuid, "ack receiver gone");
        }
    }
}

/// Runs a [`Subscriber`] over a stream of deliveries until shutdown.
pub struct Consumer<Req, Resp> {
    subscriber: Subscriber<Req, Resp>,
    shutdown: Arc<ShutdownController>,
    drain_timeout: Duration,
}

impl<Req, Resp> Consumer<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// `shutdown` is usually the controller of the process's
    /// [`HttpModule`](crate::network::HttpModule), so one signal stops both.
    #[must_use]
    pub fn new(subscriber: Subscriber<Req, Resp>, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            subscriber,
            shutdown,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Consumes until shutdown is triggered or every sender is dropped, then
    /// waits up to the drain timeout for in-flight deliveries and aborts the
    /// rest.
    pub async fn run(self, mut deliveries: mpsc::Receiver<Delivery>) {
        let mut tasks = JoinSet::new();
        let stop = self.shutdown.shutdown_signal();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;
                () = &mut stop => break,
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(result) = joined {
                        log_join(result);
                    }
                }
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => self.spawn(&mut tasks, delivery),
                    None => break,
                },
            }
        }

        info!(in_flight = tasks.len(), "consumer stopping");
        let drain = async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(aborted = tasks.len(), "consumer drain timeout expired");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    fn spawn(&self, tasks: &mut JoinSet<()>, delivery: Delivery) {
        let subscriber = self.subscriber.clone();
        let guard = self.shutdown.in_flight_guard();
        tasks.spawn(async move {
            let _guard = guard;
            let ack = match subscriber.handle(&delivery.message).await {
                Ok(()) => Ack::Ack,
                Err(_) => Ack::Nack,
            };
            delivery.settle(ack);
        });
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(error = %err, "delivery task panicked");
        }
    }
}
