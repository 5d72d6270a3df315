//! TCP listener and bootnode dialer.
//!
//! Every accepted or dialed connection becomes one `Handler::run_peer`
//! session. Sessions end on their own when the remote goes away and are
//! cancelled with the node.

use mc_06_handler::{Handler, TcpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept inbound connections until cancelled, then wait for the sessions
/// to wind down.
pub async fn run_listener(handler: Arc<Handler>, listener: TcpListener, cancel: CancellationToken) {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            accepted = TcpTransport::accept(&listener) => match accepted {
                Ok((conn, inbound, remote)) => {
                    debug!(%remote, "Inbound connection");
                    let handler = handler.clone();
                    let cancel = cancel.child_token();
                    sessions.spawn(async move {
                        if let Err(e) = handler.run_peer(conn, Box::new(inbound), cancel).await {
                            debug!(%remote, error = %e, "Inbound session ended");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            },
        }
    }
    while sessions.join_next().await.is_some() {}
    info!("Listener stopped");
}

/// Keep a session with `addr` open, redialing `interval` after each dial
/// failure or disconnect.
pub async fn run_dialer(
    handler: Arc<Handler>,
    addr: SocketAddr,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            dialed = TcpTransport::connect(addr) => dialed,
        };
        match dialed {
            Ok((conn, inbound)) => {
                info!(%addr, "Connected to bootnode");
                if let Err(e) = handler
                    .run_peer(conn, Box::new(inbound), cancel.child_token())
                    .await
                {
                    debug!(%addr, error = %e, "Bootnode session ended");
                }
            }
            Err(e) => debug!(%addr, error = %e, "Bootnode dial failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(%addr, "Dialer stopped");
}
