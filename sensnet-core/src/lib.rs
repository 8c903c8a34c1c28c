//! SensNet protocol core.
//! Host-driven: no I/O; host passes received messages and sends what comes back.

pub mod datum;
pub mod ids;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use datum::{DatumSource, FixedDatum, RandomDatum, ScriptedDatum};
pub use ids::{PeerId, PeerIdGenerator};
pub use node::{Admission, ClientAction, Node, PeerAction, PeerRequest, ProtocolError};
pub use protocol::{Description, ErrorCode, Message, MessageType, Role, MAX_CLIENTS};
pub use registry::{ClientRecord, Registry, RegistryError};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, RECORD_SIZE};
