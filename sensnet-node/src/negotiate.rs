//! Role negotiation and the peer handshake.
//!
//! Whoever reaches the peer address first gets a passive listener and becomes
//! the Location node; whoever connects to it becomes the Status node.

use std::io::ErrorKind;
use std::net::SocketAddr;

use sensnet_core::{Node, PeerId, PeerRequest, ProtocolError};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::conn::{read_record, send_record, ConnError, Connection};
use crate::console::Console;
use crate::forward::PeerLink;

const LISTEN_BACKLOG: u32 = 10;

#[derive(Debug)]
pub enum Negotiated {
    /// Connected to a waiting node: we are the Status node.
    Active(TcpStream),
    /// Nobody was listening: we are the Location node.
    Passive(TcpListener),
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiateError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("accept on peer listener: {0}")]
    Accept(std::io::Error),
    #[error("peer handshake: {0}")]
    Conn(#[from] ConnError),
    #[error("peer closed the connection during the handshake")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Bind and listen with `SO_REUSEADDR` set.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Try the peer address once. Refused means nobody is there yet, so take the
/// address ourselves. Any other connect failure is fatal.
pub async fn negotiate_role(addr: SocketAddr) -> Result<Negotiated, NegotiateError> {
    match TcpStream::connect(addr).await {
        Ok(stream) => {
            debug!("connected to {}", addr);
            Ok(Negotiated::Active(stream))
        }
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
            let listener =
                bind_listener(addr).map_err(|source| NegotiateError::Listen { addr, source })?;
            Ok(Negotiated::Passive(listener))
        }
        Err(source) => Err(NegotiateError::Connect { addr, source }),
    }
}

/// Active half: `REQ_CONPEER`, wait for the passive id, answer with ours.
pub async fn active_handshake<C>(
    node: &mut Node<C>,
    mut stream: TcpStream,
) -> Result<PeerLink, NegotiateError> {
    send_record(&mut stream, &node.conpeer_request()).await?;
    let reply = read_record(&mut stream).await?.ok_or(NegotiateError::Closed)?;
    let back = node.on_conpeer_reply(&reply)?;
    send_record(&mut stream, &back).await?;
    let remote = PeerId::new(reply.payload);
    info!("New Peer ID: {}", back.payload);
    info!("Peer {} connected", remote);
    let conn = Connection::new(stream).map_err(ConnError::from)?;
    Ok(PeerLink::new(conn, remote))
}

/// Wait on the peer listener until a handshake completes. `None` when the
/// operator asks for shutdown first. Connections that fail the handshake are
/// dropped and the wait goes on; only a failing listener is fatal.
pub async fn accept_peer<C>(
    node: &mut Node<C>,
    listener: &TcpListener,
    console: &mut Console,
) -> Result<Option<PeerLink>, NegotiateError> {
    loop {
        tokio::select! {
            biased;
            _ = console.wait_for_kill() => return Ok(None),
            accepted = listener.accept() => {
                let (stream, addr) = accepted.map_err(NegotiateError::Accept)?;
                match passive_handshake(node, stream).await {
                    Ok(Some(link)) => return Ok(Some(link)),
                    Ok(None) => {}
                    Err(e) => warn!("peer handshake with {} failed: {}", addr, e),
                }
            }
        }
    }
}

/// Passive half on one accepted connection.
async fn passive_handshake<C>(
    node: &mut Node<C>,
    mut stream: TcpStream,
) -> Result<Option<PeerLink>, NegotiateError> {
    let Some(first) = read_record(&mut stream).await? else {
        debug!("peer candidate closed before the handshake");
        return Ok(None);
    };
    match node.on_peer_request(&first) {
        PeerRequest::Accept { local, reply } => {
            send_record(&mut stream, &reply).await?;
            let back = read_record(&mut stream).await?.ok_or(NegotiateError::Closed)?;
            let remote = node.complete_passive_handshake(local, &back)?;
            info!("Peer {} connected", remote);
            info!("New Peer ID: {}", local);
            let conn = Connection::new(stream).map_err(ConnError::from)?;
            Ok(Some(PeerLink::new(conn, remote)))
        }
        PeerRequest::Refuse(reply) => {
            send_record(&mut stream, &reply).await?;
            Ok(None)
        }
        PeerRequest::Ignore => {
            warn!("peer candidate sent {} instead of a handshake", first.kind);
            Ok(None)
        }
    }
}

/// A connection on the peer listener while a session is running: answer
/// `Peer limit exceeded` and close. The running session is not touched.
pub async fn refuse_peer<C>(node: &mut Node<C>, mut stream: TcpStream, addr: SocketAddr) {
    let first = match read_record(&mut stream).await {
        Ok(Some(m)) => m,
        Ok(None) => return,
        Err(e) => {
            warn!("extra peer {}: {}", addr, e);
            return;
        }
    };
    match node.on_peer_request(&first) {
        PeerRequest::Refuse(reply) => {
            info!("Peer limit exceeded, refusing {}", addr);
            if let Err(e) = send_record(&mut stream, &reply).await {
                warn!("extra peer {}: {}", addr, e);
            }
        }
        PeerRequest::Ignore => warn!("extra peer {} sent {}", addr, first.kind),
        PeerRequest::Accept { local, .. } => {
            warn!("peer listener accepted {} with no session (id {} unused)", addr, local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensnet_core::{ErrorCode, Message, MessageType, Role};

    fn free_addr() -> SocketAddr {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    }

    #[tokio::test]
    async fn nobody_listening_means_passive() {
        let addr = free_addr();
        match negotiate_role(addr).await.unwrap() {
            Negotiated::Passive(l) => assert_eq!(l.local_addr().unwrap(), addr),
            other => panic!("expected Passive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn someone_listening_means_active() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(matches!(
            negotiate_role(addr).await.unwrap(),
            Negotiated::Active(_)
        ));
    }

    #[tokio::test]
    async fn handshake_pairs_two_nodes() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (_handle, mut console) = Console::channel();
        let mut passive: Node<Connection> = Node::new(Role::Location, 4);
        let mut active: Node<Connection> = Node::new(Role::Status, 4);

        let stream = TcpStream::connect(addr).await.unwrap();
        let (p, a) = tokio::join!(
            accept_peer(&mut passive, &listener, &mut console),
            active_handshake(&mut active, stream)
        );
        let p = p.unwrap().unwrap();
        let a = a.unwrap();
        assert_eq!(Some(p.remote()), active.local_peer());
        assert_eq!(Some(a.remote()), passive.local_peer());
        assert_ne!(active.local_peer(), passive.local_peer());
    }

    #[tokio::test]
    async fn failed_candidate_does_not_stop_the_wait() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (_handle, mut console) = Console::channel();
        let mut passive: Node<Connection> = Node::new(Role::Location, 4);
        let mut active: Node<Connection> = Node::new(Role::Status, 4);

        let mut junk = TcpStream::connect(addr).await.unwrap();
        send_record(&mut junk, &Message::new(MessageType::ReqConnSen, 1))
            .await
            .unwrap();
        drop(junk);
        let silent = TcpStream::connect(addr).await.unwrap();
        drop(silent);
        let stream = TcpStream::connect(addr).await.unwrap();
        let (p, a) = tokio::join!(
            accept_peer(&mut passive, &listener, &mut console),
            active_handshake(&mut active, stream)
        );
        assert!(p.unwrap().is_some());
        assert!(a.is_ok());
    }

    #[tokio::test]
    async fn kill_while_waiting_returns_none() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let (handle, mut console) = Console::channel();
        handle.send_line("kill");
        let mut passive: Node<Connection> = Node::new(Role::Location, 4);
        let got = accept_peer(&mut passive, &listener, &mut console).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn active_side_sees_peer_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let refuser = async {
            let (mut s, _) = listener.accept().await.unwrap();
            let req = read_record(&mut s).await.unwrap().unwrap();
            assert_eq!(req.kind, MessageType::ReqConPeer);
            send_record(&mut s, &Message::error(ErrorCode::PeerLimitExceeded))
                .await
                .unwrap();
            s
        };
        let mut active: Node<Connection> = Node::new(Role::Status, 4);
        let stream = TcpStream::connect(addr).await.unwrap();
        let (res, _s) = tokio::join!(active_handshake(&mut active, stream), refuser);
        assert!(matches!(
            res,
            Err(NegotiateError::Protocol(ProtocolError::PeerLimitExceeded))
        ));
    }
}
