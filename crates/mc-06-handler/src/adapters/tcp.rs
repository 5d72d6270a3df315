//! # TCP Transport
//!
//! Each message is one length-prefixed frame holding its encoded bytes.
//! Frames over [`MAX_MESSAGE_SIZE`] are rejected on both sides.
//!
//! ```text
//!  Peer::send ─→ mpsc ─→ writer task ─→ FramedWrite ─→ socket
//!  socket ─→ FramedRead ─→ Message::decode ─→ TcpReceiver::recv
//! ```
//!
//! `disconnect` queues the `Disconnect` frame, then the writer flushes what is
//! queued and shuts the socket down.

use crate::ports::MessageSource;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use mc_01_peer_set::{ConnectionError, PeerConnection};
use shared_types::protocol::{DisconnectReason, Message, MAX_MESSAGE_SIZE};
use shared_types::ProtocolError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Outbound frames queued per connection.
pub const OUTBOUND_QUEUE: usize = 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_MESSAGE_SIZE)
        .new_codec()
}

pub struct TcpTransport;

impl TcpTransport {
    /// Dial `addr`.
    pub async fn connect(addr: SocketAddr) -> io::Result<(Arc<TcpConnection>, TcpReceiver)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::split(stream))
    }

    /// Accept one inbound connection.
    pub async fn accept(
        listener: &TcpListener,
    ) -> io::Result<(Arc<TcpConnection>, TcpReceiver, SocketAddr)> {
        let (stream, remote) = listener.accept().await?;
        stream.set_nodelay(true)?;
        let (conn, inbound) = Self::split(stream);
        Ok((conn, inbound, remote))
    }

    /// Split `stream` into a connection handle and a receiver. Spawns the
    /// writer task, so this must run inside a runtime.
    pub fn split(stream: TcpStream) -> (Arc<TcpConnection>, TcpReceiver) {
        let (read, write) = stream.into_split();
        let closed = CancellationToken::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);

        tokio::spawn(write_loop(
            FramedWrite::new(write, codec()),
            rx,
            closed.clone(),
        ));

        let conn = Arc::new(TcpConnection {
            tx,
            closed: closed.clone(),
        });
        let inbound = TcpReceiver {
            frames: FramedRead::new(read, codec()),
            closed,
        };
        (conn, inbound)
    }
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    mut rx: mpsc::Receiver<Message>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = write_frame(&mut sink, &message).await {
                    debug!(error = %e, message = message.name(), "Write failed, closing connection");
                    closed.cancel();
                    break;
                }
            }
            _ = closed.cancelled() => {
                // Flush what was queued before the close, Disconnect included.
                while let Ok(message) = rx.try_recv() {
                    if write_frame(&mut sink, &message).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = SinkExt::<Bytes>::close(&mut sink).await;
    trace!("Writer stopped");
}

async fn write_frame(
    sink: &mut FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    message: &Message,
) -> io::Result<()> {
    let bytes = message
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    sink.send(Bytes::from(bytes)).await
}

/// Write half of a TCP connection.
pub struct TcpConnection {
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl TcpConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl PeerConnection for TcpConnection {
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

/// Read half of a TCP connection.
pub struct TcpReceiver {
    frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    closed: CancellationToken,
}

#[async_trait]
impl MessageSource for TcpReceiver {
    async fn recv(&mut self) -> Option<Result<Message, ProtocolError>> {
        let frame = tokio::select! {
            _ = self.closed.cancelled() => return None,
            frame = self.frames.next() => frame?,
        };
        match frame {
            Ok(bytes) => Some(Message::decode(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Some(Err(ProtocolError::Decode(e.to_string())))
            }
            Err(e) => {
                debug!(error = %e, "Read failed, closing connection");
                self.closed.cancel();
                None
            }
        }
    }
}
