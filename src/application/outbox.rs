//! Per-connection outbox: the queue a socket writer drains.
//!
//! Events travel through a bounded channel and are pushed without waiting,
//! so one slow socket can never stall a room broadcast. Close requests
//! travel on a separate watch channel: they still get through when the
//! event queue is full, and the receiver yields them ahead of any queued
//! events.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::domain::realtime::{CloseReason, Delivery, OutboundEvent};

/// Creates an outbox holding at most `capacity` undelivered events.
///
/// A capacity of zero is treated as one.
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = watch::channel(None);
    (
        Outbox {
            events: events_tx,
            close: close_tx,
        },
        OutboxReceiver {
            events: events_rx,
            close: close_rx,
            finished: false,
        },
    )
}

/// Sending half, held by the registry.
#[derive(Debug)]
pub struct Outbox {
    events: mpsc::Sender<OutboundEvent>,
    close: watch::Sender<Option<CloseReason>>,
}

impl Outbox {
    /// Queues an event without waiting.
    pub fn try_push(&self, event: OutboundEvent) -> Result<(), TrySendError<OutboundEvent>> {
        self.events.try_send(event)
    }

    /// Requests a close. The first reason wins; returns whether this call
    /// recorded it.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.close.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Receiving half, drained by the socket writer.
#[derive(Debug)]
pub struct OutboxReceiver {
    events: mpsc::Receiver<OutboundEvent>,
    close: watch::Receiver<Option<CloseReason>>,
    finished: bool,
}

impl OutboxReceiver {
    /// Next delivery. A pending close is returned before queued events and
    /// ends the stream; `None` afterwards or once the sender is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        if let Some(reason) = self.pending_close() {
            return Some(Delivery::Close(reason));
        }
        tokio::select! {
            biased;
            Ok(()) = self.close.changed() => self.pending_close().map(Delivery::Close),
            event = self.events.recv() => event.map(Delivery::Event),
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        if let Some(reason) = self.pending_close() {
            return Some(Delivery::Close(reason));
        }
        self.events.try_recv().ok().map(Delivery::Event)
    }

    /// A handle that resolves when a close is requested, independent of
    /// how far the writer has drained.
    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal(self.close.clone())
    }

    fn pending_close(&mut self) -> Option<CloseReason> {
        let reason = *self.close.borrow_and_update();
        if reason.is_some() {
            self.finished = true;
        }
        reason
    }
}

/// Observes close requests for one connection.
#[derive(Debug, Clone)]
pub struct CloseSignal(watch::Receiver<Option<CloseReason>>);

impl CloseSignal {
    /// Resolves with the close reason. Never resolves if the outbox is
    /// dropped without one.
    pub async fn wait(&mut self) -> CloseReason {
        loop {
            if let Some(reason) = *self.0.borrow_and_update() {
                return reason;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
