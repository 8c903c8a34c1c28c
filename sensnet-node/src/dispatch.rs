//! Event dispatch for one peer session.
//!
//! One wait covers the console, the peer link, the peer listener (Location
//! only), the client listener and every registered client. Exactly one event
//! is handled per cycle, picked in that fixed order.

use std::future::poll_fn;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use sensnet_core::{
    Admission, ClientAction, ErrorCode, Message, MessageType, Node, PeerAction, PeerId, ProtocolError,
    Role,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::conn::{read_record, Connection, Inbound};
use crate::console::{parse_command, Command, Console};
use crate::forward::{ForwardError, PeerLink};
use crate::negotiate::refuse_peer;

/// How a session ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Operator `kill`, acknowledged by the peer.
    Shutdown,
    /// The peer said goodbye with its own id.
    PeerDisconnected(PeerId),
    /// The peer connection closed without a goodbye.
    PeerLost(Option<PeerId>),
}

/// Fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Peer(#[from] ForwardError),
    #[error("peer refused our disconnect: {0}")]
    Shutdown(#[from] ProtocolError),
    #[error("accept on {which} listener: {source}")]
    Accept {
        which: &'static str,
        source: std::io::Error,
    },
}

enum Event {
    Console(String),
    Peer(Inbound),
    PeerCandidate(std::io::Result<(TcpStream, SocketAddr)>),
    ClientCandidate(std::io::Result<(TcpStream, SocketAddr)>),
    Client { id: i32, inbound: Inbound },
}

enum Step {
    Continue,
    End(SessionEnd),
}

pub struct Session<'a> {
    node: &'a mut Node<Connection>,
    peer: PeerLink,
    peer_listener: Option<&'a TcpListener>,
    client_listener: TcpListener,
    console: &'a mut Console,
}

impl<'a> Session<'a> {
    pub fn new(
        node: &'a mut Node<Connection>,
        peer: PeerLink,
        peer_listener: Option<&'a TcpListener>,
        client_listener: TcpListener,
        console: &'a mut Console,
    ) -> Self {
        Self {
            node,
            peer,
            peer_listener,
            client_listener,
            console,
        }
    }

    /// Serve until the session ends. On return the peer link, the client
    /// listener and every client connection are closed and the node has
    /// forgotten its peer.
    pub async fn run(mut self) -> Result<SessionEnd, SessionError> {
        info!(
            "{} node serving clients, peer {}",
            self.node.role(),
            self.peer.remote()
        );
        let result = self.serve().await;
        let clients = self.node.end_session();
        debug!("closing {} client connections", clients.len());
        result
    }

    async fn serve(&mut self) -> Result<SessionEnd, SessionError> {
        loop {
            let step = match self.next_event().await {
                Event::Console(line) => self.on_console(&line).await?,
                Event::Peer(inbound) => self.on_peer(inbound).await?,
                Event::PeerCandidate(accepted) => {
                    let (stream, addr) = accepted.map_err(|source| SessionError::Accept {
                        which: "peer",
                        source,
                    })?;
                    refuse_peer(self.node, stream, addr).await;
                    Step::Continue
                }
                Event::ClientCandidate(accepted) => {
                    let (stream, addr) = accepted.map_err(|source| SessionError::Accept {
                        which: "client",
                        source,
                    })?;
                    self.on_client_candidate(stream, addr).await;
                    Step::Continue
                }
                Event::Client { id, inbound } => self.on_client(id, inbound).await?,
            };
            if let Step::End(end) = step {
                return Ok(end);
            }
        }
    }

    async fn next_event(&mut self) -> Event {
        poll_fn(|cx| self.poll_event(cx)).await
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Event> {
        if let Poll::Ready(line) = self.console.poll_line(cx) {
            return Poll::Ready(Event::Console(line));
        }
        if let Poll::Ready(inbound) = self.peer.poll_recv(cx) {
            return Poll::Ready(Event::Peer(inbound));
        }
        if let Some(listener) = self.peer_listener {
            if let Poll::Ready(accepted) = listener.poll_accept(cx) {
                return Poll::Ready(Event::PeerCandidate(accepted));
            }
        }
        if let Poll::Ready(accepted) = self.client_listener.poll_accept(cx) {
            return Poll::Ready(Event::ClientCandidate(accepted));
        }
        for record in self.node.registry_mut().iter_mut() {
            if let Poll::Ready(inbound) = record.conn.poll_recv(cx) {
                return Poll::Ready(Event::Client {
                    id: record.id,
                    inbound,
                });
            }
        }
        Poll::Pending
    }

    // --- console ---

    async fn on_console(&mut self, line: &str) -> Result<Step, SessionError> {
        if parse_command(line) != Some(Command::Kill) {
            debug!("ignoring console input {:?}", line.trim());
            return Ok(Step::Continue);
        }
        let request = self.node.disconnect_request();
        info!("Sending REQ_DISCPEER {}", request.payload);
        match self.peer.call(&request).await {
            Ok(reply) => {
                self.node.on_disconnect_reply(&reply)?;
                if reply.kind == MessageType::Ok {
                    info!("{}", reply.desc);
                } else {
                    warn!("peer answered {} to REQ_DISCPEER, shutting down anyway", reply);
                }
                info!("Peer {} disconnected", self.peer.remote());
                Ok(Step::End(SessionEnd::Shutdown))
            }
            Err(ForwardError::PeerLost) => {
                warn!("peer closed before acknowledging the disconnect");
                Ok(Step::End(SessionEnd::Shutdown))
            }
            Err(e) => Err(e.into()),
        }
    }

    // --- peer ---

    async fn on_peer(&mut self, inbound: Inbound) -> Result<Step, SessionError> {
        let msg = match inbound {
            Inbound::Message(msg) => msg,
            Inbound::Closed => {
                let departed = self.node.on_peer_lost();
                info!(
                    "Peer {} disconnected",
                    departed.map(PeerId::as_i32).unwrap_or(-1)
                );
                return Ok(Step::End(SessionEnd::PeerLost(departed)));
            }
            Inbound::Failed(e) => return Err(ForwardError::Conn(e).into()),
        };
        if msg.kind == MessageType::ReqCheckAlert {
            info!("REQ_CHECKALERT {}", msg.payload);
        }
        match self.node.on_peer_message(&msg) {
            PeerAction::Reply(reply) => {
                match reply.kind {
                    MessageType::ResCheckAlert => info!(
                        "Found location of sensor {}: location {}",
                        msg.payload, reply.payload
                    ),
                    MessageType::Error => log_error_reply(&reply),
                    _ => {}
                }
                self.peer.send(&reply).await?;
                Ok(Step::Continue)
            }
            PeerAction::Terminate { reply, departed } => {
                self.peer.send(&reply).await?;
                info!("Peer {} disconnected", departed);
                Ok(Step::End(SessionEnd::PeerDisconnected(departed)))
            }
            PeerAction::Ignore => {
                warn!("unexpected {} from peer, ignored", msg);
                Ok(Step::Continue)
            }
        }
    }

    // --- clients ---

    async fn on_client_candidate(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        let first = match read_record(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("{} closed before joining", addr);
                return;
            }
            Err(e) => {
                warn!("client candidate {}: {}", addr, e);
                return;
            }
        };
        let conn = match Connection::new(stream) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("client candidate {}: {}", addr, e);
                return;
            }
        };
        match self.node.admit(&first, conn) {
            Admission::Admitted { id, datum, reply } => {
                match self.node.role() {
                    Role::Location => info!("Client {} added (Loc {})", id, datum),
                    Role::Status => info!("Client {} added (Status {})", id, datum),
                }
                self.send_to_client(id, &reply).await;
            }
            Admission::Rejected {
                reply: Some(reply),
                mut conn,
            } => {
                log_error_reply(&reply);
                if let Err(e) = conn.send(&reply).await {
                    warn!("client candidate {}: {}", addr, e);
                }
            }
            Admission::Rejected { reply: None, .. } => {
                warn!("{} sent {} instead of REQ_CONNSEN, closing", addr, first.kind);
            }
        }
    }

    async fn on_client(&mut self, id: i32, inbound: Inbound) -> Result<Step, SessionError> {
        match inbound {
            Inbound::Message(msg) => self.on_client_message(id, msg).await,
            Inbound::Closed => {
                self.remove_client(id);
                Ok(Step::Continue)
            }
            Inbound::Failed(e) => {
                warn!("client {}: {}", id, e);
                self.remove_client(id);
                Ok(Step::Continue)
            }
        }
    }

    async fn on_client_message(&mut self, sender: i32, msg: Message) -> Result<Step, SessionError> {
        debug!("client {} -> {}", sender, msg);
        match self.node.on_client_message(&msg) {
            ClientAction::Reply(reply) => {
                match reply.kind {
                    MessageType::ResLocList => {
                        info!("Sensors at location {}: {}", reply.payload, reply.desc)
                    }
                    MessageType::Error => log_error_reply(&reply),
                    _ => {}
                }
                self.send_to_client(sender, &reply).await;
                Ok(Step::Continue)
            }
            ClientAction::Disconnect { reply, mut record } => {
                info!("Client {} removed", record.id);
                if record.id == sender {
                    if let Err(e) = record.conn.send(&reply).await {
                        warn!("client {}: {}", sender, e);
                    }
                } else {
                    self.send_to_client(sender, &reply).await;
                }
                Ok(Step::Continue)
            }
            ClientAction::CheckAlert { sensor_id, request } => {
                info!("Sensor {} status = 1 (failure detected)", sensor_id);
                info!("Sending REQ_CHECKALERT {} to peer", sensor_id);
                let (reply, lost) = match self.peer.call(&request).await {
                    Ok(peer_reply) => (self.node.check_alert_reply(&peer_reply), false),
                    Err(ForwardError::PeerLost) => (Message::error(ErrorCode::SensorNotFound), true),
                    Err(e) => return Err(e.into()),
                };
                match reply.kind {
                    MessageType::ResSensStatus => {
                        info!("Sending RES_SENSSTATUS {} to client {}", reply.payload, sender)
                    }
                    _ => log_error_reply(&reply),
                }
                self.send_to_client(sender, &reply).await;
                if lost {
                    let departed = self.node.on_peer_lost();
                    info!(
                        "Peer {} disconnected",
                        departed.map(PeerId::as_i32).unwrap_or(-1)
                    );
                    return Ok(Step::End(SessionEnd::PeerLost(departed)));
                }
                Ok(Step::Continue)
            }
        }
    }

    /// A failed send is fatal for that client only.
    async fn send_to_client(&mut self, id: i32, msg: &Message) {
        let Some(record) = self.node.registry_mut().find_mut(id) else {
            return;
        };
        let result = record.conn.send(msg).await;
        if let Err(e) = result {
            warn!("client {}: {}", id, e);
            self.remove_client(id);
        }
    }

    fn remove_client(&mut self, id: i32) {
        if self.node.on_client_closed(id).is_some() {
            info!("Client {} removed", id);
        }
    }
}

fn log_error_reply(reply: &Message) {
    info!("ERROR({:02}) - {}", reply.payload, reply.desc);
}
