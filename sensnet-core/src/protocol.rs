//! SensNet wire protocol: message tags, error codes, bounded descriptions.

use std::fmt;

/// Maximum description length in bytes (fixed on the wire, NUL padded).
pub const DESC_LEN: usize = 500;

/// Location codes handed out by a Location node are in `LOCATION_MIN..=LOCATION_MAX`.
pub const LOCATION_MIN: i32 = 1;
pub const LOCATION_MAX: i32 = 10;

/// Default registry capacity.
pub const MAX_CLIENTS: usize = 15;

/// Message tag. The numeric values are the canonical tag table; any other value
/// decodes as `Unknown` so the receiver can answer with an error instead of
/// dropping the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ok,
    ReqConPeer,
    ResConPeer,
    ReqDiscPeer,
    ReqConnSen,
    ResConnSen,
    ReqDiscSen,
    ReqCheckAlert,
    ResCheckAlert,
    ReqSensLoc,
    ResSensLoc,
    ReqSensStatus,
    ResSensStatus,
    ReqLocList,
    ResLocList,
    Error,
    Unknown(i32),
}

impl MessageType {
    pub fn tag(self) -> i32 {
        match self {
            MessageType::Ok => 0,
            MessageType::ReqConPeer => 20,
            MessageType::ResConPeer => 21,
            MessageType::ReqDiscPeer => 22,
            MessageType::ReqConnSen => 23,
            MessageType::ResConnSen => 24,
            MessageType::ReqDiscSen => 25,
            MessageType::ReqCheckAlert => 36,
            MessageType::ResCheckAlert => 37,
            MessageType::ReqSensLoc => 38,
            MessageType::ResSensLoc => 39,
            MessageType::ReqSensStatus => 40,
            MessageType::ResSensStatus => 41,
            MessageType::ReqLocList => 42,
            MessageType::ResLocList => 43,
            MessageType::Error => 255,
            MessageType::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: i32) -> Self {
        match tag {
            0 => MessageType::Ok,
            20 => MessageType::ReqConPeer,
            21 => MessageType::ResConPeer,
            22 => MessageType::ReqDiscPeer,
            23 => MessageType::ReqConnSen,
            24 => MessageType::ResConnSen,
            25 => MessageType::ReqDiscSen,
            36 => MessageType::ReqCheckAlert,
            37 => MessageType::ResCheckAlert,
            38 => MessageType::ReqSensLoc,
            39 => MessageType::ResSensLoc,
            40 => MessageType::ReqSensStatus,
            41 => MessageType::ResSensStatus,
            42 => MessageType::ReqLocList,
            43 => MessageType::ResLocList,
            255 => MessageType::Error,
            other => MessageType::Unknown(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Ok => write!(f, "OK"),
            MessageType::ReqConPeer => write!(f, "REQ_CONPEER"),
            MessageType::ResConPeer => write!(f, "RES_CONPEER"),
            MessageType::ReqDiscPeer => write!(f, "REQ_DISCPEER"),
            MessageType::ReqConnSen => write!(f, "REQ_CONNSEN"),
            MessageType::ResConnSen => write!(f, "RES_CONNSEN"),
            MessageType::ReqDiscSen => write!(f, "REQ_DISCSEN"),
            MessageType::ReqCheckAlert => write!(f, "REQ_CHECKALERT"),
            MessageType::ResCheckAlert => write!(f, "RES_CHECKALERT"),
            MessageType::ReqSensLoc => write!(f, "REQ_SENSLOC"),
            MessageType::ResSensLoc => write!(f, "RES_SENSLOC"),
            MessageType::ReqSensStatus => write!(f, "REQ_SENSSTATUS"),
            MessageType::ResSensStatus => write!(f, "RES_SENSSTATUS"),
            MessageType::ReqLocList => write!(f, "REQ_LOCLIST"),
            MessageType::ResLocList => write!(f, "RES_LOCLIST"),
            MessageType::Error => write!(f, "ERROR"),
            MessageType::Unknown(tag) => write!(f, "UNKNOWN({})", tag),
        }
    }
}

/// Payload codes carried by `ERROR` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    PeerLimitExceeded,
    PeerNotFound,
    SensorLimitExceeded,
    SensorNotFound,
    LocationNotFound,
    SensorAlreadyRegistered,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::PeerLimitExceeded => 1,
            ErrorCode::PeerNotFound => 2,
            ErrorCode::SensorLimitExceeded => 9,
            ErrorCode::SensorNotFound => 10,
            ErrorCode::LocationNotFound => 11,
            ErrorCode::SensorAlreadyRegistered => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::PeerLimitExceeded),
            2 => Some(ErrorCode::PeerNotFound),
            9 => Some(ErrorCode::SensorLimitExceeded),
            10 => Some(ErrorCode::SensorNotFound),
            11 => Some(ErrorCode::LocationNotFound),
            12 => Some(ErrorCode::SensorAlreadyRegistered),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::PeerLimitExceeded => "Peer limit exceeded",
            ErrorCode::PeerNotFound => "Peer not found",
            ErrorCode::SensorLimitExceeded => "Sensor limit exceeded",
            ErrorCode::SensorNotFound => "Sensor not found",
            ErrorCode::LocationNotFound => "Location not found",
            ErrorCode::SensorAlreadyRegistered => "Sensor ID already registered",
        }
    }
}

/// `OK` payload for a completed disconnect.
pub const OK_DISCONNECTED: i32 = 1;
/// `OK` payload for a sensor reporting no failure.
pub const OK_SENSOR_WORKING: i32 = 2;

pub const DESC_DISCONNECTED: &str = "Successful disconnect";
pub const DESC_SENSOR_WORKING: &str = "Sensor working";

/// Which half of the fabric a node serves. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Passive peer; holds sensor locations.
    Location,
    /// Active peer; holds sensor failure flags.
    Status,
}

impl Role {
    /// Two-letter tag sent with `RES_CONNSEN` so a client can tell its two server
    /// connections apart.
    pub fn tag(self) -> &'static str {
        match self {
            Role::Location => "SL",
            Role::Status => "SS",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SL" => Some(Role::Location),
            "SS" => Some(Role::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Location => write!(f, "location"),
            Role::Status => write!(f, "status"),
        }
    }
}

/// Bounded description text. Never longer than `DESC_LEN` bytes; longer input is
/// cut at the last char boundary that fits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Description(String);

impl Description {
    pub fn new(text: &str) -> Self {
        if text.len() <= DESC_LEN {
            return Description(text.to_owned());
        }
        let mut end = DESC_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Description(text[..end].to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Description {
    fn from(s: &str) -> Self {
        Description::new(s)
    }
}

impl From<String> for Description {
    fn from(s: String) -> Self {
        Description::new(&s)
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One protocol record. Built fresh per send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub payload: i32,
    pub desc: Description,
}

impl Message {
    pub fn new(kind: MessageType, payload: i32) -> Self {
        Self {
            kind,
            payload,
            desc: Description::default(),
        }
    }

    pub fn with_desc(kind: MessageType, payload: i32, desc: impl Into<Description>) -> Self {
        Self {
            kind,
            payload,
            desc: desc.into(),
        }
    }

    /// `ERROR` carrying `code` and its standard description.
    pub fn error(code: ErrorCode) -> Self {
        Self::with_desc(MessageType::Error, code.code(), code.description())
    }

    pub fn ok(payload: i32, desc: impl Into<Description>) -> Self {
        Self::with_desc(MessageType::Ok, payload, desc)
    }

    /// Error code of an `ERROR` message, if it is one we know.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.kind == MessageType::Error {
            ErrorCode::from_code(self.payload)
        } else {
            None
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.desc.is_empty() {
            write!(f, "{} {}", self.kind, self.payload)
        } else {
            write!(f, "{} {} \"{}\"", self.kind, self.payload, self.desc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip_through_i32() {
        for tag in [0, 20, 21, 22, 23, 24, 25, 36, 37, 38, 39, 40, 41, 42, 43, 255] {
            let kind = MessageType::from_tag(tag);
            assert!(!matches!(kind, MessageType::Unknown(_)), "tag {}", tag);
            assert_eq!(kind.tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let kind = MessageType::from_tag(77);
        assert_eq!(kind, MessageType::Unknown(77));
        assert_eq!(kind.tag(), 77);
    }

    #[test]
    fn error_message_carries_code_and_text() {
        let msg = Message::error(ErrorCode::LocationNotFound);
        assert_eq!(msg.kind, MessageType::Error);
        assert_eq!(msg.payload, 11);
        assert_eq!(msg.desc.as_str(), "Location not found");
        assert_eq!(msg.error_code(), Some(ErrorCode::LocationNotFound));
    }

    #[test]
    fn description_truncates_on_char_boundary() {
        let long = "é".repeat(DESC_LEN);
        let desc = Description::new(&long);
        assert!(desc.as_bytes().len() <= DESC_LEN);
        assert_eq!(desc.as_bytes().len(), DESC_LEN);
        let odd = format!("a{}", "é".repeat(DESC_LEN));
        let desc = Description::new(&odd);
        assert_eq!(desc.as_bytes().len(), DESC_LEN - 1);
    }

    #[test]
    fn role_tags() {
        assert_eq!(Role::Location.tag(), "SL");
        assert_eq!(Role::from_tag("SS"), Some(Role::Status));
        assert_eq!(Role::from_tag("XX"), None);
    }
}
