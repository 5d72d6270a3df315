//! Connection lifecycle: handshake, registration, dispatch, cleanup.

use super::Handler;
use crate::domain::HandlerError;
use crate::ports::MessageSource;
use mc_01_peer_set::{Peer, PeerConnection};
use mc_02_request_distributor::Response;
use shared_bus::ChainEvent;
use shared_types::protocol::{DisconnectReason, Message, Status, SUPPORTED_VERSIONS, VERSION_65};
use shared_types::PeerId;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Releases a registered peer when its connection ends, also when the
/// connection task unwinds or is dropped.
struct Registration<'a> {
    handler: &'a Handler,
    peer: PeerId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let handler = self.handler;
        let _ = handler.peers.unregister(&self.peer);
        handler.distributor.peer_dropped(&self.peer);
        handler.events.publish(ChainEvent::PeerDisconnected(self.peer));
        info!(peer = %self.peer, peers = handler.peers.len(), "Peer disconnected");
    }
}

impl Handler {
    /// Run one connection until it ends.
    ///
    /// Sends our `Status`, validates theirs, registers the peer and dispatches
    /// its messages. When the connection ends for a local reason the reason
    /// is sent to the remote side before closing. `cancel` ends the loop with
    /// `ClientQuitting`.
    pub async fn run_peer(
        &self,
        conn: Arc<dyn PeerConnection>,
        mut inbound: Box<dyn MessageSource>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let result = self
            .serve_connection(conn.clone(), inbound.as_mut(), &cancel)
            .await;
        if let Err(e) = &result {
            match e.disconnect_reason() {
                Some(reason) => {
                    debug!(error = %e, ?reason, "Dropping connection");
                    conn.disconnect(reason);
                }
                None => trace!(error = %e, "Connection ended"),
            }
        }
        result
    }

    async fn serve_connection(
        &self,
        conn: Arc<dyn PeerConnection>,
        inbound: &mut dyn MessageSource,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(HandlerError::Closed),
            status = self.handshake(conn.as_ref(), inbound) => status?,
        };
        if self.peers.len() >= self.config.max_peers {
            return Err(HandlerError::TooManyPeers);
        }

        let version = status.protocol_version.min(VERSION_65);
        let peer = Arc::new(Peer::new(
            status.peer_id,
            version,
            status.capabilities,
            status.head,
            status.td,
            conn,
        ));

        let extension = if peer.supports_snap() {
            match timeout(
                self.config.handshake_timeout(),
                self.peers.wait_for_extension(&peer),
            )
            .await
            {
                Ok(extension) => extension?,
                Err(_) => {
                    warn!(peer = %peer.id(), "Snap extension never arrived");
                    return Err(HandlerError::HandshakeTimeout);
                }
            }
        } else {
            None
        };

        self.peers.register(peer.clone(), extension)?;
        let _registration = Registration {
            handler: self,
            peer: peer.id(),
        };
        info!(
            peer = %peer.id(),
            version,
            td = %peer.td(),
            peers = self.peers.len(),
            "Peer connected"
        );
        self.events.publish(ChainEvent::PeerConnected(peer.id()));
        self.distributor.peers_changed();
        self.request_sync();
        self.send_pending_transactions(&peer);

        self.message_loop(&peer, inbound, cancel).await
    }

    async fn handshake(
        &self,
        conn: &dyn PeerConnection,
        inbound: &mut dyn MessageSource,
    ) -> Result<Status, HandlerError> {
        let ours = self.status();
        conn.send(Message::Status(ours.clone()))
            .map_err(|e| HandlerError::Transport(e.to_string()))?;

        let theirs = match timeout(self.config.handshake_timeout(), inbound.recv()).await {
            Err(_) => return Err(HandlerError::HandshakeTimeout),
            Ok(None) => return Err(HandlerError::Closed),
            Ok(Some(message)) => match message? {
                Message::Status(status) => status,
                Message::Disconnect(reason) => return Err(HandlerError::RemoteDisconnect(reason)),
                other => return Err(HandlerError::UnexpectedMessage(other.name())),
            },
        };

        if theirs.network_id != ours.network_id {
            return Err(HandlerError::NetworkMismatch {
                ours: ours.network_id,
                theirs: theirs.network_id,
            });
        }
        if theirs.genesis != ours.genesis {
            return Err(HandlerError::GenesisMismatch(theirs.genesis));
        }
        let version = theirs.protocol_version.min(VERSION_65);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(HandlerError::IncompatibleVersion(theirs.protocol_version));
        }
        if theirs.peer_id == self.local_id {
            return Err(HandlerError::SelfConnection);
        }
        Ok(theirs)
    }

    async fn message_loop(
        &self,
        peer: &Arc<Peer>,
        inbound: &mut dyn MessageSource,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    peer.disconnect(DisconnectReason::ClientQuitting);
                    return Ok(());
                }
                message = inbound.recv() => message,
            };
            match message {
                None => return Ok(()),
                Some(message) => self.handle_message(peer, message?)?,
            }
        }
    }

    /// Dispatch one message from a registered peer.
    pub(crate) fn handle_message(&self, peer: &Arc<Peer>, message: Message) -> Result<(), HandlerError> {
        trace!(peer = %peer.id(), message = message.name(), "Message received");
        match message {
            Message::Status(_) => return Err(HandlerError::UnexpectedMessage("Status")),
            Message::Disconnect(reason) => return Err(HandlerError::RemoteDisconnect(reason)),

            Message::GetBlockHeaders {
                request_id,
                origin,
                amount,
                skip,
                reverse,
            } => self.serve_headers(peer, request_id, origin, amount, skip, reverse),
            Message::GetBlockBodies { request_id, hashes } => {
                self.serve_bodies(peer, request_id, &hashes)
            }
            Message::GetReceipts { request_id, hashes } => {
                self.serve_receipts(peer, request_id, &hashes)
            }
            Message::GetNodeData { request_id, hashes } => {
                self.serve_node_data(peer, request_id, &hashes)
            }

            response @ (Message::BlockHeaders { .. }
            | Message::BlockBodies { .. }
            | Message::Receipts { .. }
            | Message::NodeData { .. }) => {
                if let Some((request_id, response)) = Response::from_message(response) {
                    self.deliver(peer, request_id, response);
                }
            }

            Message::NewBlockHashes(announcements) => {
                self.handle_block_announcements(peer, announcements)
            }
            Message::NewBlock { block, td } => self.handle_new_block(peer, block, td),
            Message::Transactions(txs) => self.handle_transactions(peer, txs),
        }
        Ok(())
    }

    fn deliver(&self, peer: &Peer, request_id: u64, response: Response) {
        let kind = response.kind();
        if let Err(e) = self.distributor.deliver(peer.id(), request_id, response) {
            debug!(peer = %peer.id(), request_id, ?kind, error = %e, "Unrequested response dropped");
        }
    }
}
