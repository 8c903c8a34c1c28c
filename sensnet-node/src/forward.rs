//! The peer link and its blocking request/response round trip.

use std::task::{Context, Poll};

use sensnet_core::{Message, PeerId};
use tracing::debug;

use crate::conn::{ConnError, Connection, Inbound};

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("peer closed the connection")]
    PeerLost,
    #[error("peer link: {0}")]
    Conn(#[from] ConnError),
}

/// The single connection to the other node. `call` takes `&mut self`, so at
/// most one request is ever in flight.
#[derive(Debug)]
pub struct PeerLink {
    conn: Connection,
    remote: PeerId,
}

impl PeerLink {
    pub fn new(conn: Connection, remote: PeerId) -> Self {
        Self { conn, remote }
    }

    pub fn remote(&self) -> PeerId {
        self.remote
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), ForwardError> {
        self.conn.send(msg).await?;
        Ok(())
    }

    /// Send `request` and wait for exactly one reply. Nothing else is serviced
    /// while waiting, and there is no timeout.
    pub async fn call(&mut self, request: &Message) -> Result<Message, ForwardError> {
        debug!("peer {} <- {}", self.remote, request);
        self.conn.send(request).await?;
        match self.conn.recv().await {
            Inbound::Message(reply) => {
                debug!("peer {} -> {}", self.remote, reply);
                Ok(reply)
            }
            Inbound::Closed => Err(ForwardError::PeerLost),
            Inbound::Failed(e) => Err(e.into()),
        }
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Inbound> {
        self.conn.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{read_record, send_record};
    use sensnet_core::{ErrorCode, MessageType};
    use tokio::net::{TcpListener, TcpStream};

    async fn link() -> (PeerLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let conn = Connection::new(client.unwrap()).unwrap();
        (PeerLink::new(conn, PeerId::new(100)), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn call_returns_the_single_reply() {
        let (mut link, mut remote) = link().await;
        let responder = async move {
            let req = read_record(&mut remote).await.unwrap().unwrap();
            assert_eq!(req.kind, MessageType::ReqCheckAlert);
            send_record(&mut remote, &Message::new(MessageType::ResCheckAlert, 6))
                .await
                .unwrap();
            remote
        };
        let req = Message::new(MessageType::ReqCheckAlert, 42);
        let (reply, _remote) = tokio::join!(link.call(&req), responder);
        let reply = reply.unwrap();
        assert_eq!(reply.kind, MessageType::ResCheckAlert);
        assert_eq!(reply.payload, 6);
    }

    #[tokio::test]
    async fn call_passes_error_replies_through() {
        let (mut link, mut remote) = link().await;
        let responder = async move {
            read_record(&mut remote).await.unwrap().unwrap();
            send_record(&mut remote, &Message::error(ErrorCode::SensorNotFound))
                .await
                .unwrap();
            remote
        };
        let req = Message::new(MessageType::ReqCheckAlert, 43);
        let (reply, _remote) = tokio::join!(link.call(&req), responder);
        assert_eq!(reply.unwrap().error_code(), Some(ErrorCode::SensorNotFound));
    }

    #[tokio::test]
    async fn peer_vanishing_mid_call_is_peer_lost() {
        let (mut link, mut remote) = link().await;
        let responder = async move {
            read_record(&mut remote).await.unwrap().unwrap();
            drop(remote);
        };
        let req = Message::new(MessageType::ReqCheckAlert, 42);
        let (reply, ()) = tokio::join!(link.call(&req), responder);
        assert!(matches!(reply, Err(ForwardError::PeerLost)));
    }
}
