//! Length-prefixed frames over TCP.
//!
//! ```text
//! [kind: u8][len: u32 LE][payload: len bytes]
//! kind 1 = audio (encoded samples; inbound audio is LE PCM)
//! kind 2 = control (UTF-8 JSON)
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{ControlMessage, InboundMessage, InboundStream, OutboundMessage, Transport};
use crate::{
    audio::pcm,
    error::{Result, VoxlinkError},
};

/// Frames larger than this are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Audio = 1,
    Control = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = VoxlinkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameKind::Audio),
            2 => Ok(FrameKind::Control),
            other => Err(VoxlinkError::Protocol(format!("unknown frame kind {other}"))),
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(VoxlinkError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    let mut header = [0u8; 5];
    header[0] = kind as u8;
    header[1..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(FrameKind, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let kind = match reader.read_u8().await {
        Ok(k) => FrameKind::try_from(k)?,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(VoxlinkError::Protocol(format!(
            "frame of {len} bytes exceeds limit"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some((kind, payload)))
}

pub async fn write_message<W>(writer: &mut W, msg: &OutboundMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match msg {
        OutboundMessage::Audio(bytes) => write_frame(writer, FrameKind::Audio, bytes).await,
        OutboundMessage::Control(ctrl) => {
            let json = serde_json::to_vec(ctrl)
                .map_err(|e| VoxlinkError::Protocol(e.to_string()))?;
            write_frame(writer, FrameKind::Control, &json).await
        }
    }
}

pub fn decode_inbound(kind: FrameKind, payload: &[u8]) -> Result<InboundMessage> {
    match kind {
        FrameKind::Audio => Ok(InboundMessage::Audio(pcm::from_le_bytes(payload))),
        FrameKind::Control => serde_json::from_slice::<ControlMessage>(payload)
            .map(InboundMessage::Control)
            .map_err(|e| VoxlinkError::Protocol(format!("bad control frame: {e}"))),
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client side of the framed TCP protocol.
pub struct TcpTransport {
    addr: String,
    connected: Arc<AtomicBool>,
    conn: Mutex<Option<Connection>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connected: Arc::new(AtomicBool::new(false)),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().take() {
            conn.reader.abort();
            conn.writer.abort();
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<InboundStream> {
        self.teardown();

        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| VoxlinkError::TransportConnect(format!("{}: {e}", self.addr)))?;
        stream.set_nodelay(true)?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();

        // Raised before the tasks exist so an immediate hang-up can clear it.
        self.connected.store(true, Ordering::SeqCst);

        let connected = Arc::clone(&self.connected);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some((kind, payload))) => match decode_inbound(kind, &payload) {
                        Ok(msg) => {
                            if inbound_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("skipping inbound frame: {e}"),
                    },
                    Ok(None) => {
                        info!("server closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("transport read failed: {e}");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        let connected = Arc::clone(&self.connected);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = write_message(&mut write_half, &msg).await {
                    warn!("transport write failed: {e}");
                    connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        *self.conn.lock() = Some(Connection {
            outbound: outbound_tx,
            reader,
            writer,
        });
        debug!(addr = %self.addr, "tcp transport connected");
        Ok(inbound_rx)
    }

    fn send(&self, msg: OutboundMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(VoxlinkError::TransportClosed);
        }
        let conn = self.conn.lock();
        let conn = conn.as_ref().ok_or(VoxlinkError::TransportClosed)?;
        conn.outbound
            .send(msg)
            .map_err(|_| VoxlinkError::TransportClosed)
    }

    async fn disconnect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            info!(addr = %self.addr, "disconnecting transport");
        }
        self.teardown();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip_through_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_message(&mut a, &OutboundMessage::Audio(vec![1, 0, 2, 0]))
            .await
            .unwrap();
        write_message(&mut a, &OutboundMessage::Control(ControlMessage::CancelResponse))
            .await
            .unwrap();
        drop(a);

        let (kind, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(
            decode_inbound(kind, &payload).unwrap(),
            InboundMessage::Audio(vec![1, 2])
        );
        let (kind, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(kind, FrameKind::Control);
        assert_eq!(payload, br#"{"type":"cancel_response"}"#);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_kind_is_a_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[9, 0, 0, 0, 0]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(VoxlinkError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut header = vec![1u8];
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        a.write_all(&header).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(VoxlinkError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn immediate_hang_up_clears_connected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let t = TcpTransport::new(addr.to_string());
        let mut rx = t.connect().await.unwrap();
        server.await.unwrap();

        assert_eq!(rx.recv().await, None);
        assert!(!t.is_connected());
        assert!(matches!(
            t.send(OutboundMessage::Audio(vec![])),
            Err(VoxlinkError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let t = TcpTransport::new(addr.to_string());
        assert!(matches!(
            t.connect().await,
            Err(VoxlinkError::TransportConnect(_))
        ));
        assert!(matches!(
            t.send(OutboundMessage::Audio(vec![])),
            Err(VoxlinkError::TransportClosed)
        ));
    }
}
