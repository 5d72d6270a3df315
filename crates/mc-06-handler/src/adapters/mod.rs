//! Transports: an in-memory pipe for tests and length-prefixed TCP.

pub mod pipe;
pub mod tcp;

pub use pipe::{MessagePipe, PipeConnection, PipeEnd, PipeReceiver};
pub use tcp::{TcpConnection, TcpReceiver, TcpTransport};
