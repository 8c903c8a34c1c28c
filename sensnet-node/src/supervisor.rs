//! Node lifecycle: negotiate a role, run sessions, decide what happens after each.

use std::time::Duration;

use sensnet_core::{DatumSource, Node, RandomDatum, Role};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::config::Config;
use crate::conn::Connection;
use crate::console::Console;
use crate::dispatch::{Session, SessionEnd, SessionError};
use crate::negotiate::{accept_peer, active_handshake, bind_listener, negotiate_role, NegotiateError, Negotiated};

/// Normal ways for the process to finish. Both map to exit status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Operator `kill`.
    Shutdown,
    /// A Status node whose peer session ended; it does not wait for another.
    SessionOver,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Negotiate(#[from] NegotiateError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("listen for clients on {addr}: {source}")]
    ClientListener {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

pub struct Supervisor {
    config: Config,
    datum: Option<Box<dyn DatumSource + Send>>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self { config, datum: None }
    }

    /// Use `datum` instead of the configured random source.
    pub fn with_datum(mut self, datum: Box<dyn DatumSource + Send>) -> Self {
        self.datum = Some(datum);
        self
    }

    pub async fn run(mut self, console: &mut Console) -> Result<Exit, SupervisorError> {
        let peer_addr = self.config.peer_addr();
        match negotiate_role(peer_addr).await? {
            Negotiated::Active(stream) => {
                info!("Peer found at {}, serving as status node", peer_addr);
                self.run_status(stream, console).await
            }
            Negotiated::Passive(listener) => {
                info!("No peer found, serving as location node");
                self.run_location(listener, console).await
            }
        }
    }

    async fn run_status(&mut self, stream: TcpStream, console: &mut Console) -> Result<Exit, SupervisorError> {
        let mut node = self.build_node(Role::Status);
        let link = active_handshake(&mut node, stream).await?;
        let clients = self.client_listener()?;
        let end = Session::new(&mut node, link, None, clients, console)
            .run()
            .await?;
        self.pause().await;
        if end == SessionEnd::Shutdown {
            return Ok(Exit::Shutdown);
        }
        info!("status node does not wait for a new peer, exiting");
        Ok(Exit::SessionOver)
    }

    async fn run_location(
        &mut self,
        peers: TcpListener,
        console: &mut Console,
    ) -> Result<Exit, SupervisorError> {
        let mut node = self.build_node(Role::Location);
        loop {
            info!("Waiting for a peer on {}", self.config.peer_addr());
            let Some(link) = accept_peer(&mut node, &peers, console).await? else {
                drop(peers);
                self.pause().await;
                return Ok(Exit::Shutdown);
            };
            let clients = self.client_listener()?;
            let end = Session::new(&mut node, link, Some(&peers), clients, console)
                .run()
                .await?;
            if end == SessionEnd::Shutdown {
                drop(peers);
                self.pause().await;
                return Ok(Exit::Shutdown);
            }
            self.pause().await;
        }
    }

    fn build_node(&mut self, role: Role) -> Node<Connection> {
        let datum: Box<dyn DatumSource + Send> = match (self.datum.take(), self.config.seed) {
            (Some(datum), _) => datum,
            (None, Some(seed)) => Box::new(RandomDatum::seeded(seed)),
            (None, None) => Box::new(RandomDatum::from_entropy()),
        };
        Node::with_datum(role, self.config.max_clients, datum)
    }

    fn client_listener(&self) -> Result<TcpListener, SupervisorError> {
        let addr = self.config.client_addr();
        let listener =
            bind_listener(addr).map_err(|source| SupervisorError::ClientListener { addr, source })?;
        info!("Listening for clients on {}", addr);
        Ok(listener)
    }

    /// Teardown pause. The returned timer does not borrow `self`.
    fn pause(&self) -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(self.config.teardown_pause_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    fn config() -> Config {
        Config {
            bind_addr: "127.0.0.1".parse().unwrap(),
            peer_port: free_port(),
            client_port: free_port(),
            teardown_pause_ms: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn kill_before_any_peer_shuts_down() {
        let cfg = config();
        let peer_addr: SocketAddr = cfg.peer_addr();
        let (handle, mut console) = Console::channel();
        handle.send_line("kill");
        let exit = Supervisor::new(cfg).run(&mut console).await.unwrap();
        assert_eq!(exit, Exit::Shutdown);
        // the peer address is free again
        assert!(std::net::TcpListener::bind(peer_addr).is_ok());
    }

    #[tokio::test]
    async fn run_with_injected_datum_can_be_spawned() {
        let (handle, mut console) = Console::channel();
        let task = tokio::spawn(async move {
            Supervisor::new(config())
                .with_datum(Box::new(sensnet_core::FixedDatum(2)))
                .run(&mut console)
                .await
        });
        handle.send_line("kill");
        assert_eq!(task.await.unwrap().unwrap(), Exit::Shutdown);
    }

    #[tokio::test]
    async fn client_port_in_use_is_fatal_for_status() {
        let cfg = config();
        let peer = TcpListener::bind(cfg.peer_addr()).await.unwrap();
        let _taken = std::net::TcpListener::bind(cfg.client_addr()).unwrap();
        let play_location = async {
            use crate::conn::{read_record, send_record};
            use sensnet_core::{Message, MessageType};
            let (mut s, _) = peer.accept().await.unwrap();
            read_record(&mut s).await.unwrap().unwrap();
            send_record(&mut s, &Message::new(MessageType::ResConPeer, 100))
                .await
                .unwrap();
            read_record(&mut s).await.unwrap().unwrap();
            s
        };
        let (_handle, mut console) = Console::channel();
        let (res, _s) = tokio::join!(Supervisor::new(cfg).run(&mut console), play_location);
        assert!(matches!(res, Err(SupervisorError::ClientListener { .. })));
    }
}
