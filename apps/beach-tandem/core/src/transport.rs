use parking_lot::Mutex;
use thiserror::Error;

use crate::protocol::ServerEvent;
use crate::types::ConnId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no live session for connection {0}")]
    UnknownConnection(ConnId),
    #[error("outbound buffer for connection {0} is full")]
    Full(ConnId),
    #[error("connection {0} is closed")]
    Closed(ConnId),
}

/// Delivers one event to one connection. Sends are fire-and-forget and must
/// not block; any buffering belongs to the implementation.
pub trait Transport: Send + Sync {
    fn send(&self, to: ConnId, event: ServerEvent) -> Result<(), TransportError>;
}

/// In-memory transport that records every event it is asked to deliver.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnId, ServerEvent)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears everything recorded so far.
    pub fn take(&self) -> Vec<(ConnId, ServerEvent)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_to(&self, id: ConnId) -> Vec<ServerEvent> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, to: ConnId, event: ServerEvent) -> Result<(), TransportError> {
        self.sent.lock().push((to, event));
        Ok(())
    }
}
