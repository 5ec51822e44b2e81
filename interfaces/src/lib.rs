//! Pipeline Event Interfaces Library
//! 
//! This crate provides the completion-signal contract between processing
//! workers and the task scheduler.

pub mod consumer;
pub mod events;

pub use consumer::{ChannelConsumer, Consumer};
pub use events::{Event, EventType};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Event channel closed, dropped {0:?}")]
    ChannelClosed(Event),
}
