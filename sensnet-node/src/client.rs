//! Sensor-side library: join both nodes and run the sensor queries.

use std::fmt;
use std::net::SocketAddr;

use sensnet_core::{Message, MessageType, Role};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::conn::{read_record, send_record, ConnError};

/// Geographic area a location code falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    North,
    South,
    East,
    West,
}

impl Area {
    /// 1-3 North, 4-5 South, 6-7 East, 8-10 West.
    pub fn from_location(location: i32) -> Option<Area> {
        match location {
            1..=3 => Some(Area::North),
            4..=5 => Some(Area::South),
            6..=7 => Some(Area::East),
            8..=10 => Some(Area::West),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Area::North => 1,
            Area::South => 2,
            Area::East => 3,
            Area::West => 4,
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Area::North => "North",
            Area::South => "South",
            Area::East => "East",
            Area::West => "West",
        };
        write!(f, "{} ({})", self.number(), name)
    }
}

/// A failing sensor's whereabouts, as reported through the Status node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub location: i32,
    pub area: Option<Area>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("{0} node closed the connection")]
    Closed(Role),
    #[error("{0} closed the connection before acknowledging the join")]
    JoinClosed(SocketAddr),
    #[error("ERROR({code:02}) - {desc}")]
    Rejected { code: i32, desc: String },
    #[error("unexpected reply {0}")]
    Unexpected(Message),
    #[error("both endpoints answered as the {0} node")]
    SameRole(Role),
}

impl ClientError {
    fn from_reply(reply: Message) -> Self {
        if reply.kind == MessageType::Error {
            ClientError::Rejected {
                code: reply.payload,
                desc: reply.desc.as_str().to_owned(),
            }
        } else {
            ClientError::Unexpected(reply)
        }
    }
}

/// One sensor, joined to both the Location and the Status node.
#[derive(Debug)]
pub struct SensorClient {
    id: i32,
    location: TcpStream,
    status: TcpStream,
}

impl SensorClient {
    /// Connect to both endpoints (in either order) and join with `id`. The
    /// `SL`/`SS` tag in each join ack tells the two apart.
    pub async fn connect(id: i32, a: SocketAddr, b: SocketAddr) -> Result<Self, ClientError> {
        let (first, first_role) = join(id, a).await?;
        let (second, second_role) = join(id, b).await?;
        let (location, status) = match (first_role, second_role) {
            (Role::Location, Role::Status) => (first, second),
            (Role::Status, Role::Location) => (second, first),
            (role, _) => return Err(ClientError::SameRole(role)),
        };
        info!("SL New ID: {}", id);
        info!("SS New ID: {}", id);
        Ok(Self {
            id,
            location,
            status,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Ask the Status node about this sensor. `None` means it is working.
    pub async fn check_failure(&mut self) -> Result<Option<Alert>, ClientError> {
        let reply = self
            .request(Role::Status, Message::new(MessageType::ReqSensStatus, self.id))
            .await?;
        match reply.kind {
            MessageType::Ok => {
                info!("{}", reply.desc);
                Ok(None)
            }
            MessageType::ResSensStatus => {
                let alert = Alert {
                    location: reply.payload,
                    area: Area::from_location(reply.payload),
                };
                match alert.area {
                    Some(area) => info!("Alert received from area: {}", area),
                    None => info!("Alert received from unknown location {}", alert.location),
                }
                Ok(Some(alert))
            }
            _ => Err(ClientError::from_reply(reply)),
        }
    }

    /// Location code of sensor `id` as held by the Location node.
    pub async fn locate(&mut self, id: i32) -> Result<i32, ClientError> {
        let reply = self
            .request(Role::Location, Message::new(MessageType::ReqSensLoc, id))
            .await?;
        match reply.kind {
            MessageType::ResSensLoc => {
                info!("Current sensor location: {}", reply.payload);
                Ok(reply.payload)
            }
            _ => Err(ClientError::from_reply(reply)),
        }
    }

    /// Ids of the sensors at `location`, in the order they joined.
    pub async fn diagnose(&mut self, location: i32) -> Result<Vec<i32>, ClientError> {
        let reply = self
            .request(Role::Location, Message::new(MessageType::ReqLocList, location))
            .await?;
        match reply.kind {
            MessageType::ResLocList => {
                info!("Sensors at location {}: {}", location, reply.desc);
                parse_id_list(reply.desc.as_str()).ok_or(ClientError::Unexpected(reply))
            }
            _ => Err(ClientError::from_reply(reply)),
        }
    }

    /// Leave both nodes. Returns the (Location, Status) acknowledgements.
    pub async fn disconnect(mut self) -> Result<(String, String), ClientError> {
        let bye = Message::new(MessageType::ReqDiscSen, self.id);
        let sl = self.request(Role::Location, bye.clone()).await?;
        let ss = self.request(Role::Status, bye).await?;
        for reply in [&sl, &ss] {
            if reply.kind != MessageType::Ok {
                return Err(ClientError::from_reply(reply.clone()));
            }
        }
        info!("{}", sl.desc);
        info!("{}", ss.desc);
        Ok((sl.desc.as_str().to_owned(), ss.desc.as_str().to_owned()))
    }

    /// Send any request to one node and wait for its reply.
    pub async fn request(&mut self, to: Role, msg: Message) -> Result<Message, ClientError> {
        let stream = match to {
            Role::Location => &mut self.location,
            Role::Status => &mut self.status,
        };
        debug!("{} node <- {}", to, msg);
        send_record(stream, &msg).await?;
        read_record(stream).await?.ok_or(ClientError::Closed(to))
    }
}

async fn join(id: i32, addr: SocketAddr) -> Result<(TcpStream, Role), ClientError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ClientError::Connect { addr, source })?;
    send_record(&mut stream, &Message::new(MessageType::ReqConnSen, id)).await?;
    let Some(reply) = read_record(&mut stream).await? else {
        return Err(ClientError::JoinClosed(addr));
    };
    if reply.kind != MessageType::ResConnSen {
        return Err(ClientError::from_reply(reply));
    }
    match Role::from_tag(reply.desc.as_str()) {
        Some(role) => Ok((stream, role)),
        None => Err(ClientError::Unexpected(reply)),
    }
}

fn parse_id_list(desc: &str) -> Option<Vec<i32>> {
    desc.split(',')
        .map(|s| s.trim().parse::<i32>().ok())
        .collect()
}
