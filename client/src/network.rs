use crate::mirror::CanvasMirror;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use shared::framing::{self, MAX_SERVER_FRAME_LEN};
use shared::{Canvas, Control, Packet, PixelEdit, SyncError};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// How long a client-initiated disconnect waits for the server's goodbye.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Recommended spacing of [`Client::heartbeat`] calls.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// Something that changed the session, as returned by [`Client::next_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A broadcast edit was applied to the mirror.
    PixelChanged(PixelEdit),
    /// The server resent its snapshot and the mirror was replaced.
    Resynced,
    /// The server ended the session, by goodbye or by closing the connection.
    ServerClosed,
}

/// A connected session with the canvas server.
///
/// A `Client` only exists once the initial snapshot has arrived, so there is
/// no way to paint onto a canvas that was not received from the server.
pub struct Client {
    connection: Connection,
    server_addr: SocketAddr,
    mirror: CanvasMirror,
    connected: bool,
}

impl Client {
    /// Connects to `server_addr` and waits up to `handshake_timeout` for the
    /// snapshot.
    ///
    /// Fails with `HandshakeTimeout` if nothing arrives in time, with
    /// `CapacityExceeded` if the server has no free slot and with `Protocol`
    /// if the first reply is not a snapshot.
    pub async fn connect(
        server_addr: SocketAddr,
        handshake_timeout: Duration,
    ) -> Result<Self, SyncError> {
        info!("Connecting to {}...", server_addr);

        let (connection, mirror) = time::timeout(handshake_timeout, Self::handshake(server_addr))
            .await
            .map_err(|_| SyncError::HandshakeTimeout(handshake_timeout))??;

        info!(
            "Loaded {}x{} canvas from {}",
            mirror.canvas().width(),
            mirror.canvas().height(),
            server_addr
        );

        Ok(Client {
            connection,
            server_addr,
            mirror,
            connected: true,
        })
    }

    async fn handshake(server_addr: SocketAddr) -> Result<(Connection, CanvasMirror), SyncError> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let mut connection = Framed::new(stream, framing::codec(MAX_SERVER_FRAME_LEN));

        connection.send(Bytes::from(Control::Connect.to_frame())).await?;

        // The server answers a Connect before anything else, so the first frame decides
        let frame = connection.next().await.ok_or_else(|| {
            SyncError::Protocol("server closed the connection during handshake".to_string())
        })??;

        match Packet::from_frame(&frame)? {
            Packet::Snapshot(canvas) => Ok((connection, CanvasMirror::new(canvas))),
            Packet::Control(Control::Rejected) => Err(SyncError::CapacityExceeded),
            other => Err(SyncError::Protocol(format!(
                "expected a snapshot, got a {}",
                other.kind()
            ))),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        self.mirror.canvas()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<(), SyncError> {
        if self.connected {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "session closed").into())
        }
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<(), SyncError> {
        if let Err(e) = self.connection.send(Bytes::from(frame)).await {
            self.connected = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Paints locally and sends the edit upstream.
    pub async fn paint(&mut self, edit: PixelEdit) -> Result<(), SyncError> {
        self.ensure_connected()?;
        self.mirror.apply_local(&edit)?;
        self.send(Packet::Delta(edit).to_frame()?).await
    }

    pub async fn heartbeat(&mut self) -> Result<(), SyncError> {
        self.ensure_connected()?;
        self.send(Control::Heartbeat.to_frame()).await
    }

    /// Waits for the next frame that changes the session.
    ///
    /// Malformed frames and out-of-range edits are logged and skipped.
    /// Connection errors end the session.
    pub async fn next_event(&mut self) -> Result<ClientEvent, SyncError> {
        self.ensure_connected()?;

        loop {
            let frame = match self.connection.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    error!("Lost connection to {}: {}", self.server_addr, e);
                    self.connected = false;
                    return Err(e.into());
                }
                None => {
                    warn!("Server {} closed the connection", self.server_addr);
                    self.connected = false;
                    return Ok(ClientEvent::ServerClosed);
                }
            };

            match Packet::from_frame(&frame) {
                Ok(Packet::Delta(edit)) => match self.mirror.apply_remote(&edit) {
                    Ok(()) => return Ok(ClientEvent::PixelChanged(edit)),
                    Err(e) => warn!("Discarding broadcast edit: {}", e),
                },
                Ok(Packet::Snapshot(canvas)) => {
                    self.mirror.resync(canvas);
                    return Ok(ClientEvent::Resynced);
                }
                Ok(Packet::Control(Control::Disconnect)) => {
                    info!("Server closed the session");
                    if let Err(e) = self.send(Control::Disconnect.to_frame()).await {
                        warn!("Failed to acknowledge disconnect: {}", e);
                    }
                    self.connected = false;
                    return Ok(ClientEvent::ServerClosed);
                }
                Ok(Packet::Control(control)) => {
                    warn!("Unexpected {:?} from server", control);
                }
                Err(e) => warn!("Discarding frame from server: {}", e),
            }
        }
    }

    /// Says goodbye and waits a bounded time for the acknowledgment.
    /// Returns the final state of the mirror.
    pub async fn disconnect(mut self) -> Canvas {
        if self.connected {
            let acknowledged = match self.send(Control::Disconnect.to_frame()).await {
                Ok(()) => time::timeout(DISCONNECT_TIMEOUT, self.wait_for_goodbye())
                    .await
                    .unwrap_or(false),
                Err(e) => {
                    warn!("Failed to send disconnect: {}", e);
                    false
                }
            };
            self.connected = false;

            if acknowledged {
                info!("Disconnected successfully from server");
            } else {
                warn!("Disconnected forcefully from server");
            }

            if let Err(e) = SinkExt::<Bytes>::close(&mut self.connection).await {
                warn!("Error closing connection: {}", e);
            }
        }

        self.mirror.canvas().clone()
    }

    /// Skips broadcasts still in flight until the server's goodbye arrives.
    async fn wait_for_goodbye(&mut self) -> bool {
        while let Some(Ok(frame)) = self.connection.next().await {
            if let Ok(Packet::Control(Control::Disconnect)) = Packet::from_frame(&frame) {
                return true;
            }
        }
        false
    }
}
