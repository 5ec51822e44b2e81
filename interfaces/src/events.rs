//! Scheduler Event Types
//! 
//! Defines the events emitted by processing workers when a task completes

use serde::{Deserialize, Serialize};

/// Kind of work a completion event refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Equalization and demodulation of one subcarrier block
    Demul,
}

/// Completion event delivered to the scheduler
///
/// The offset is the scheduling offset the task was started with; the
/// scheduler derives the touched buffer regions from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Event {
    /// Event type
    pub event_type: EventType,
    /// Scheduling offset of the finished task
    pub offset: usize,
}

impl Event {
    /// Create a demodulation completion event
    pub fn demul(offset: usize) -> Self {
        Self {
            event_type: EventType::Demul,
            offset,
        }
    }
}
