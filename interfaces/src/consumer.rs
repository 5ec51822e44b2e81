//! Event Consumer Implementation
//! 
//! Delivers completion events from worker threads to the scheduler

use crate::{events::Event, InterfaceError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// Receiver side of the completion signal
///
/// `handle` is called synchronously on the worker thread before the task
/// returns, so implementations must not block.
pub trait Consumer: Send + Sync {
    /// Hand one event to the scheduler
    fn handle(&self, event: Event) -> Result<(), InterfaceError>;
}

/// Consumer backed by an unbounded tokio channel
///
/// Sending never blocks or awaits, so it is safe to call from plain worker
/// threads while the scheduler awaits the receiver on the runtime.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: UnboundedSender<Event>,
}

impl ChannelConsumer {
    /// Create a consumer and the receiver the scheduler listens on
    pub fn new() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Consumer for ChannelConsumer {
    fn handle(&self, event: Event) -> Result<(), InterfaceError> {
        trace!("Event {:?} for offset {}", event.event_type, event.offset);
        self.tx
            .send(event)
            .map_err(|e| InterfaceError::ChannelClosed(e.0))
    }
}
