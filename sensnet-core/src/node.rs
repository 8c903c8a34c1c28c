//! Host-driven node: the host feeds in received messages and gets back what to send.
//!
//! `Node` owns the client registry, the peer ids and the datum source. It never
//! touches a socket; the host performs every send, receive and close.

use crate::datum::{DatumSource, RandomDatum};
use crate::ids::{PeerId, PeerIdGenerator};
use crate::protocol::{
    ErrorCode, Message, MessageType, Role, DESC_DISCONNECTED, DESC_SENSOR_WORKING, LOCATION_MAX,
    LOCATION_MIN, OK_DISCONNECTED, OK_SENSOR_WORKING,
};
use crate::registry::{ClientRecord, Registry, RegistryError};

/// One node process. `C` is the host's client connection handle.
pub struct Node<C> {
    role: Role,
    ids: PeerIdGenerator,
    local_peer: Option<PeerId>,
    remote_peer: Option<PeerId>,
    registry: Registry<C>,
    datum: Box<dyn DatumSource + Send>,
}

impl<C> Node<C> {
    pub fn new(role: Role, capacity: usize) -> Self {
        Self::with_datum(role, capacity, Box::new(RandomDatum::from_entropy()))
    }

    pub fn with_datum(role: Role, capacity: usize, datum: Box<dyn DatumSource + Send>) -> Self {
        Self {
            role,
            ids: PeerIdGenerator::new(),
            local_peer: None,
            remote_peer: None,
            registry: Registry::with_capacity(capacity),
            datum,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    pub fn remote_peer(&self) -> Option<PeerId> {
        self.remote_peer
    }

    pub fn has_peer(&self) -> bool {
        self.remote_peer.is_some()
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<C> {
        &mut self.registry
    }

    // --- handshake, active side ---

    /// First message the active side sends after connecting.
    pub fn conpeer_request(&self) -> Message {
        Message::new(MessageType::ReqConPeer, 0)
    }

    /// Handle the passive side's answer to `REQ_CONPEER`. On success returns the
    /// `RES_CONPEER` to send back, carrying our own id.
    pub fn on_conpeer_reply(&mut self, reply: &Message) -> Result<Message, ProtocolError> {
        match reply.kind {
            MessageType::ResConPeer => {
                let remote = PeerId::new(reply.payload);
                let local = self.ids.next_avoiding(remote);
                self.remote_peer = Some(remote);
                self.local_peer = Some(local);
                Ok(Message::new(MessageType::ResConPeer, local.as_i32()))
            }
            MessageType::Error => Err(ProtocolError::from_error_reply(reply)),
            other => Err(ProtocolError::Unexpected {
                expected: MessageType::ResConPeer,
                got: other,
            }),
        }
    }

    // --- handshake, passive side ---

    /// First message on a freshly accepted peer connection.
    pub fn on_peer_request(&mut self, msg: &Message) -> PeerRequest {
        if msg.kind != MessageType::ReqConPeer {
            return PeerRequest::Ignore;
        }
        if self.remote_peer.is_some() {
            return PeerRequest::Refuse(Message::error(ErrorCode::PeerLimitExceeded));
        }
        let local = self.ids.next_id();
        PeerRequest::Accept {
            local,
            reply: Message::new(MessageType::ResConPeer, local.as_i32()),
        }
    }

    /// The counterpart's `RES_CONPEER` completes the passive handshake.
    pub fn complete_passive_handshake(
        &mut self,
        local: PeerId,
        msg: &Message,
    ) -> Result<PeerId, ProtocolError> {
        if msg.kind != MessageType::ResConPeer {
            return Err(ProtocolError::Unexpected {
                expected: MessageType::ResConPeer,
                got: msg.kind,
            });
        }
        let remote = PeerId::new(msg.payload);
        if remote == local {
            return Err(ProtocolError::IdCollision(remote));
        }
        self.local_peer = Some(local);
        self.remote_peer = Some(remote);
        Ok(remote)
    }

    // --- clients ---

    /// First message on a freshly accepted client connection.
    pub fn admit(&mut self, msg: &Message, conn: C) -> Admission<C> {
        if msg.kind != MessageType::ReqConnSen {
            return Admission::Rejected { reply: None, conn };
        }
        let id = msg.payload;
        if id <= 0 {
            return Admission::Rejected {
                reply: Some(Message::error(ErrorCode::SensorNotFound)),
                conn,
            };
        }
        if self.registry.is_full() {
            return Admission::Rejected {
                reply: Some(Message::error(ErrorCode::SensorLimitExceeded)),
                conn,
            };
        }
        if self.registry.contains(id) {
            return Admission::Rejected {
                reply: Some(Message::error(ErrorCode::SensorAlreadyRegistered)),
                conn,
            };
        }
        let datum = self.datum.assign(self.role);
        match self.registry.admit(id, datum, conn) {
            Ok(_) => Admission::Admitted {
                id,
                datum,
                reply: Message::with_desc(MessageType::ResConnSen, id, self.role.tag()),
            },
            Err((err, conn)) => Admission::Rejected {
                reply: Some(Message::error(match err {
                    RegistryError::Full(_) => ErrorCode::SensorLimitExceeded,
                    RegistryError::Duplicate(_) => ErrorCode::SensorAlreadyRegistered,
                })),
                conn,
            },
        }
    }

    /// A registered client's connection closed or failed.
    pub fn on_client_closed(&mut self, id: i32) -> Option<ClientRecord<C>> {
        self.registry.remove(id)
    }

    /// Request from a registered client. The target sensor is the id in the payload.
    pub fn on_client_message(&mut self, msg: &Message) -> ClientAction<C> {
        match msg.kind {
            MessageType::ReqLocList => ClientAction::Reply(self.location_list(msg.payload)),
            MessageType::ReqDiscSen => match self.registry.remove(msg.payload) {
                Some(record) => ClientAction::Disconnect {
                    reply: Message::ok(
                        OK_DISCONNECTED,
                        format!("{} {}", self.role.tag(), DESC_DISCONNECTED),
                    ),
                    record,
                },
                None => ClientAction::Reply(Message::error(ErrorCode::SensorNotFound)),
            },
            MessageType::ReqSensStatus => {
                let Some(record) = self.registry.find(msg.payload) else {
                    return ClientAction::Reply(Message::error(ErrorCode::SensorNotFound));
                };
                match self.role {
                    Role::Status if record.datum == 1 => ClientAction::CheckAlert {
                        sensor_id: record.id,
                        request: Message::new(MessageType::ReqCheckAlert, record.id),
                    },
                    Role::Status => {
                        ClientAction::Reply(Message::ok(OK_SENSOR_WORKING, DESC_SENSOR_WORKING))
                    }
                    Role::Location => {
                        ClientAction::Reply(Message::error(ErrorCode::SensorNotFound))
                    }
                }
            }
            MessageType::ReqSensLoc => {
                let reply = match self.registry.find(msg.payload) {
                    Some(record) if self.role == Role::Location && record.datum >= LOCATION_MIN => {
                        Message::new(MessageType::ResSensLoc, record.datum)
                    }
                    _ => Message::error(ErrorCode::SensorNotFound),
                };
                ClientAction::Reply(reply)
            }
            _ => ClientAction::Reply(Message::error(ErrorCode::SensorNotFound)),
        }
    }

    /// Turn the peer's answer to `REQ_CHECKALERT` into the reply for the asking client.
    pub fn check_alert_reply(&self, peer_reply: &Message) -> Message {
        match peer_reply.kind {
            MessageType::ResCheckAlert => Message::new(MessageType::ResSensStatus, peer_reply.payload),
            _ => Message::error(ErrorCode::SensorNotFound),
        }
    }

    fn location_list(&self, location: i32) -> Message {
        if self.role != Role::Location || !(LOCATION_MIN..=LOCATION_MAX).contains(&location) {
            return Message::error(ErrorCode::LocationNotFound);
        }
        let ids = self.registry.ids_with_datum(location);
        if ids.is_empty() {
            return Message::error(ErrorCode::LocationNotFound);
        }
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Message::with_desc(MessageType::ResLocList, location, joined)
    }

    // --- peer link ---

    /// Message received from the attached peer.
    pub fn on_peer_message(&mut self, msg: &Message) -> PeerAction {
        match msg.kind {
            MessageType::ReqDiscPeer => match self.remote_peer {
                Some(remote) if remote.as_i32() == msg.payload => {
                    self.remote_peer = None;
                    PeerAction::Terminate {
                        reply: Message::ok(OK_DISCONNECTED, DESC_DISCONNECTED),
                        departed: remote,
                    }
                }
                _ => PeerAction::Reply(Message::error(ErrorCode::PeerNotFound)),
            },
            MessageType::ReqCheckAlert => {
                let reply = match self.registry.find(msg.payload) {
                    Some(record) if self.role == Role::Location => {
                        Message::new(MessageType::ResCheckAlert, record.datum)
                    }
                    _ => Message::error(ErrorCode::SensorNotFound),
                };
                PeerAction::Reply(reply)
            }
            _ => PeerAction::Ignore,
        }
    }

    /// Peer connection closed without a goodbye. Returns the id it had.
    pub fn on_peer_lost(&mut self) -> Option<PeerId> {
        self.remote_peer.take()
    }

    /// `REQ_DISCPEER` announcing our own id, sent on local shutdown.
    pub fn disconnect_request(&self) -> Message {
        let local = self.local_peer.map(PeerId::as_i32).unwrap_or(-1);
        Message::new(MessageType::ReqDiscPeer, local)
    }

    /// Peer's answer to our `REQ_DISCPEER`. Only an `ERROR` reply is a
    /// refusal; anything else, such as a request that crossed ours, counts
    /// as done.
    pub fn on_disconnect_reply(&mut self, reply: &Message) -> Result<(), ProtocolError> {
        if reply.kind == MessageType::Error {
            return Err(ProtocolError::from_error_reply(reply));
        }
        self.remote_peer = None;
        Ok(())
    }

    /// Forget the peer and hand back every client so the host can close them.
    pub fn end_session(&mut self) -> Vec<ClientRecord<C>> {
        self.remote_peer = None;
        self.local_peer = None;
        self.registry.drain()
    }
}

/// Outcome of the first message on an accepted peer connection.
#[derive(Debug)]
pub enum PeerRequest {
    /// Reply with `RES_CONPEER` and wait for the counterpart's id.
    Accept { local: PeerId, reply: Message },
    /// A peer is already attached: send the error and close.
    Refuse(Message),
    /// Not a handshake: close without reply.
    Ignore,
}

/// Outcome of the first message on an accepted client connection.
#[derive(Debug)]
pub enum Admission<C> {
    Admitted { id: i32, datum: i32, reply: Message },
    /// Send `reply` if present, then close `conn`.
    Rejected { reply: Option<Message>, conn: C },
}

/// What the host should do with a client request.
#[derive(Debug)]
pub enum ClientAction<C> {
    /// Send to the requesting client.
    Reply(Message),
    /// Send `reply` to the requesting client, then close `record.conn`.
    Disconnect { reply: Message, record: ClientRecord<C> },
    /// Forward `request` to the peer, wait for its answer, then reply to the
    /// client with `Node::check_alert_reply`.
    CheckAlert { sensor_id: i32, request: Message },
}

/// What the host should do with a peer message.
#[derive(Debug)]
pub enum PeerAction {
    Reply(Message),
    /// Send `reply`, then tear the session down.
    Terminate { reply: Message, departed: PeerId },
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("peer limit exceeded")]
    PeerLimitExceeded,
    #[error("peer answered with error {code}: {desc}")]
    Rejected { code: i32, desc: String },
    #[error("expected {expected}, got {got}")]
    Unexpected {
        expected: MessageType,
        got: MessageType,
    },
    #[error("peer announced our own id {0}")]
    IdCollision(PeerId),
}

impl ProtocolError {
    fn from_error_reply(reply: &Message) -> Self {
        match reply.error_code() {
            Some(ErrorCode::PeerLimitExceeded) => ProtocolError::PeerLimitExceeded,
            _ => ProtocolError::Rejected {
                code: reply.payload,
                desc: reply.desc.as_str().to_owned(),
            },
        }
    }
}
