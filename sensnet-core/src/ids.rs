//! Peer identifiers and the generator that hands them out during the handshake.

use std::fmt;

/// Identifier a node announces for itself on the peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(i32);

impl PeerId {
    pub fn new(raw: i32) -> Self {
        PeerId(raw)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic peer-id source owned by a node. Values start at `FIRST_PEER_ID`.
#[derive(Debug, Clone)]
pub struct PeerIdGenerator {
    next: i32,
}

pub const FIRST_PEER_ID: i32 = 100;

impl PeerIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(FIRST_PEER_ID)
    }

    pub fn starting_at(first: i32) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> PeerId {
        let id = PeerId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Next id that differs from `other`. Skips one value on collision.
    pub fn next_avoiding(&mut self, other: PeerId) -> PeerId {
        let id = self.next_id();
        if id == other {
            return self.next_id();
        }
        id
    }
}

impl Default for PeerIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
