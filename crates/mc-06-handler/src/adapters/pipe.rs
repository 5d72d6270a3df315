//! In-memory connection pair.
//!
//! Two handlers joined by a [`MessagePipe`] talk exactly as over TCP, minus
//! the framing. Used by tests and by nodes that embed several handlers.

use crate::ports::MessageSource;
use async_trait::async_trait;
use mc_01_peer_set::{ConnectionError, PeerConnection};
use shared_types::protocol::{DisconnectReason, Message};
use shared_types::ProtocolError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Default queue depth per direction.
pub const PIPE_CAPACITY: usize = 1024;

/// One side of a pipe.
pub struct PipeEnd {
    pub conn: Arc<PipeConnection>,
    pub inbound: PipeReceiver,
}

pub struct MessagePipe;

impl MessagePipe {
    /// Two connected ends with the default capacity.
    pub fn pair() -> (PipeEnd, PipeEnd) {
        Self::with_capacity(PIPE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (PipeEnd, PipeEnd) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (PipeEnd::new(a_tx, b_rx), PipeEnd::new(b_tx, a_rx))
    }
}

impl PipeEnd {
    fn new(tx: mpsc::Sender<Message>, rx: mpsc::Receiver<Message>) -> Self {
        let closed = CancellationToken::new();
        Self {
            conn: Arc::new(PipeConnection {
                tx,
                closed: closed.clone(),
            }),
            inbound: PipeReceiver { rx, closed },
        }
    }
}

/// Write half of a pipe end.
pub struct PipeConnection {
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl PipeConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

impl PeerConnection for PipeConnection {
    fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backpressure,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    fn disconnect(&self, reason: DisconnectReason) {
        if self.closed.is_cancelled() {
            return;
        }
        let _ = self.tx.try_send(Message::Disconnect(reason));
        self.closed.cancel();
    }
}

/// Read half of a pipe end.
pub struct PipeReceiver {
    rx: mpsc::Receiver<Message>,
    closed: CancellationToken,
}

#[async_trait]
impl MessageSource for PipeReceiver {
    async fn recv(&mut self) -> Option<Result<Message, ProtocolError>> {
        tokio::select! {
            _ = self.closed.cancelled() => None,
            message = self.rx.recv() => message.map(Ok),
        }
    }
}
