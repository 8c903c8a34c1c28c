//! Framed TCP connection: whole records in, whole records out.
//!
//! A reader task owns the read half and forwards each decoded record to a
//! per-connection channel of depth one. It reads the next record only after
//! the owner has taken the previous one, so an unread peer is held back by TCP.
//! The owner keeps the write half and sends directly.

use std::net::SocketAddr;
use std::task::{Context, Poll};

use sensnet_core::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, Message, RECORD_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const INBOX_DEPTH: usize = 1;

/// What the reader task hands to the owner.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    /// Orderly end of stream before the first byte of a record.
    Closed,
    Failed(ConnError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error("stream ended {0} bytes into a record")]
    ShortRead(usize),
}

/// Write one whole record.
pub async fn send_record<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<(), ConnError> {
    let frame = encode_frame(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read one whole record. `Ok(None)` when the stream ends before the first byte.
pub async fn read_record<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Message>, ConnError> {
    let mut buf = [0u8; RECORD_SIZE];
    let mut filled = 0;
    while filled < RECORD_SIZE {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ConnError::ShortRead(filled));
        }
        filled += n;
    }
    let (msg, _) = decode_frame(&buf)?;
    Ok(Some(msg))
}

/// An established connection. Dropping it closes the socket.
pub struct Connection {
    peer_addr: SocketAddr,
    writer: OwnedWriteHalf,
    inbox: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Split the stream and start its reader task. Any bytes already consumed
    /// from `stream` by the caller are not replayed.
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        let (tx, inbox) = mpsc::channel(INBOX_DEPTH);
        let reader = tokio::spawn(run_reader(read_half, peer_addr, tx));
        Ok(Self {
            peer_addr,
            writer,
            inbox,
            reader,
        })
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), ConnError> {
        send_record(&mut self.writer, msg).await
    }

    /// Next inbound event. Once the reader has finished, keeps returning `Closed`.
    pub async fn recv(&mut self) -> Inbound {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Inbound> {
        match self.inbox.poll_recv(cx) {
            Poll::Ready(Some(inbound)) => Poll::Ready(inbound),
            Poll::Ready(None) => Poll::Ready(Inbound::Closed),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

async fn run_reader(mut r: OwnedReadHalf, addr: SocketAddr, tx: mpsc::Sender<Inbound>) {
    loop {
        let inbound = match read_record(&mut r).await {
            Ok(Some(msg)) => Inbound::Message(msg),
            Ok(None) => Inbound::Closed,
            Err(e) => Inbound::Failed(e),
        };
        let last = !matches!(inbound, Inbound::Message(_));
        if tx.send(inbound).await.is_err() {
            debug!("{}: owner gone, reader stopping", addr);
            return;
        }
        if last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensnet_core::{ErrorCode, MessageType};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (mut a, b) = tokio::io::duplex(64);
        drop(b);
        assert!(read_record(&mut a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_record_is_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        b.write_all(&[1, 2, 3]).await.unwrap();
        drop(b);
        match read_record(&mut a).await {
            Err(ConnError::ShortRead(3)) => {}
            other => panic!("expected ShortRead, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn record_split_across_writes_is_whole() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let frame = encode_frame(&Message::new(MessageType::ReqSensLoc, 9)).unwrap();
        let (head, tail) = frame.split_at(100);
        b.write_all(head).await.unwrap();
        let writer = async move {
            tokio::task::yield_now().await;
            b.write_all(tail).await.unwrap();
            b
        };
        let (got, _b) = tokio::join!(read_record(&mut a), writer);
        assert_eq!(got.unwrap(), Some(Message::new(MessageType::ReqSensLoc, 9)));
    }

    #[tokio::test]
    async fn connection_delivers_in_order_then_closed() {
        let (mut raw, accepted) = pair().await;
        let mut conn = Connection::new(accepted).unwrap();
        send_record(&mut raw, &Message::new(MessageType::ReqConnSen, 1)).await.unwrap();
        send_record(&mut raw, &Message::error(ErrorCode::SensorNotFound)).await.unwrap();
        drop(raw);

        match conn.recv().await {
            Inbound::Message(m) => assert_eq!(m.kind, MessageType::ReqConnSen),
            other => panic!("unexpected {:?}", other),
        }
        match conn.recv().await {
            Inbound::Message(m) => assert_eq!(m.payload, 10),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(conn.recv().await, Inbound::Closed));
        assert!(matches!(conn.recv().await, Inbound::Closed));
    }

    #[tokio::test]
    async fn send_reaches_the_other_end() {
        let (mut raw, accepted) = pair().await;
        let mut conn = Connection::new(accepted).unwrap();
        conn.send(&Message::with_desc(MessageType::ResConnSen, 7, "SL"))
            .await
            .unwrap();
        let got = read_record(&mut raw).await.unwrap().unwrap();
        assert_eq!(got.payload, 7);
        assert_eq!(got.desc.as_str(), "SL");
    }

    #[tokio::test]
    async fn dropping_connection_closes_socket() {
        let (mut raw, accepted) = pair().await;
        let conn = Connection::new(accepted).unwrap();
        drop(conn);
        assert!(read_record(&mut raw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unread_connection_pushes_back_on_the_writer() {
        let (mut raw, accepted) = pair().await;
        let mut conn = Connection::new(accepted).unwrap();

        // far more than the loopback socket buffers can hold
        let frame = encode_frame(&Message::new(MessageType::ReqSensStatus, 1)).unwrap();
        let flood: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 100_000).collect();
        let stalled = tokio::time::timeout(Duration::from_millis(500), raw.write_all(&flood)).await;
        assert!(stalled.is_err(), "writer finished although nobody read");

        match conn.recv().await {
            Inbound::Message(m) => assert_eq!(m, Message::new(MessageType::ReqSensStatus, 1)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
