//! Framing: one fixed-size record per message, no length prefix.
//!
//! Layout: `i32` tag, `i32` payload, `DESC_LEN` description bytes (NUL padded),
//! all in host byte order. Both ends know `RECORD_SIZE` up front.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::protocol::{Description, Message, MessageType, DESC_LEN};

/// Size in bytes of every record on the wire.
pub const RECORD_SIZE: usize = 4 + 4 + DESC_LEN;

#[derive(Serialize, Deserialize)]
struct Record {
    kind: i32,
    payload: i32,
    #[serde(with = "desc_bytes")]
    desc: [u8; DESC_LEN],
}

/// Fixed description block as a tuple, so bincode writes no length prefix.
mod desc_bytes {
    use std::fmt;

    use serde::de::{self, SeqAccess, Visitor};
    use serde::ser::SerializeTuple;
    use serde::{Deserializer, Serializer};

    use crate::protocol::DESC_LEN;

    pub fn serialize<S: Serializer>(v: &[u8; DESC_LEN], serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(DESC_LEN)?;
        for b in v.iter() {
            tup.serialize_element(b)?;
        }
        tup.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; DESC_LEN], D::Error> {
        struct DescVisitor;

        impl<'de> Visitor<'de> for DescVisitor {
            type Value = [u8; DESC_LEN];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} description bytes", DESC_LEN)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = [0u8; DESC_LEN];
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = seq
                        .next_element::<u8>()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(out)
            }
        }

        d.deserialize_tuple(DESC_LEN, DescVisitor)
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
}

/// Encode a message into exactly `RECORD_SIZE` bytes.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let mut desc = [0u8; DESC_LEN];
    let text = msg.desc.as_bytes();
    desc[..text.len()].copy_from_slice(text);
    let record = Record {
        kind: msg.kind.tag(),
        payload: msg.payload,
        desc,
    };
    let out = codec().serialize(&record)?;
    if out.len() != RECORD_SIZE {
        return Err(FrameEncodeError::Size(out.len()));
    }
    Ok(out)
}

/// Error encoding a message into a record.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("encoded record has unexpected size {0}")]
    Size(usize),
}

/// Decode one record from the front of `bytes`. Returns the message and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < RECORD_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let record: Record = codec().deserialize(&bytes[..RECORD_SIZE])?;
    let end = record
        .desc
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(DESC_LEN);
    let text = String::from_utf8_lossy(&record.desc[..end]);
    let msg = Message {
        kind: MessageType::from_tag(record.kind),
        payload: record.payload,
        desc: Description::new(&text),
    };
    Ok((msg, RECORD_SIZE))
}

/// Error decoding a record (need more bytes or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
