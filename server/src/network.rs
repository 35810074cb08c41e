//! Server network layer: TCP listener, per-connection tasks and the main event loop

use crate::config::ServerConfig;
use crate::engine::{Outbound, SyncEngine};
use crate::persistence::CanvasFile;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::framing::{self, MAX_CLIENT_FRAME_LEN, MAX_SERVER_FRAME_LEN};
use shared::{Canvas, FillRule, SyncError};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};

/// What the listener and connection tasks report to the main loop
#[derive(Debug)]
pub enum NetEvent {
    Accepted { stream: TcpStream, addr: SocketAddr },
    Frame { addr: SocketAddr, frame: Bytes },
    Closed { addr: SocketAddr, link: u64 },
}

/// The main loop's handle on one open connection.
struct PeerLink {
    id: u64,
    /// Frames queued for the writer task. `None` once the connection is closing.
    outbox: Option<mpsc::UnboundedSender<Bytes>>,
    reader: JoinHandle<()>,
    /// When the link was opened, or when it started closing
    since: Instant,
}

/// Owns the listener and the engine. All engine access happens on the task
/// running [`Server::run_until`], one event at a time.
pub struct Server {
    listener: Arc<TcpListener>,
    engine: SyncEngine,
    config: ServerConfig,
    store: Option<CanvasFile>,

    links: HashMap<SocketAddr, PeerLink>,
    next_link: u64,

    events_tx: mpsc::UnboundedSender<NetEvent>,
    events_rx: mpsc::UnboundedReceiver<NetEvent>,
}

impl Server {
    /// Loads the saved canvas (or the default one) and binds the listener.
    pub async fn start(config: ServerConfig) -> Result<Self, SyncError> {
        let canvas = match &config.save_path {
            Some(path) => {
                CanvasFile::new(path)
                    .load_or_default(config.default_width, config.default_height)
                    .await?
            }
            None => Canvas::new(
                config.default_width,
                config.default_height,
                FillRule::Diagonal,
            )?,
        };
        Self::bind(config, canvas).await
    }

    /// Binds the listener and serves `canvas`.
    pub async fn bind(config: ServerConfig, canvas: Canvas) -> Result<Self, SyncError> {
        let listener = Arc::new(TcpListener::bind(&config.bind_addr).await?);
        info!(
            "Server listening on {} with {} peer slots",
            listener.local_addr()?,
            config.max_peers
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            engine: SyncEngine::new(canvas, config.max_peers),
            store: config.save_path.clone().map(CanvasFile::new),
            config,
            links: HashMap::new(),
            next_link: 0,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SyncError> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawns task that continuously accepts incoming connections
    fn spawn_acceptor(&self) -> JoinHandle<()> {
        let listener = Arc::clone(&self.listener);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if events_tx.send(NetEvent::Accepted { stream, addr }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    fn open_link(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Cannot disable Nagle for {}: {}", addr, e);
        }

        let id = self.next_link;
        self.next_link += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(addr, write_half, outbox_rx));
        let reader = tokio::spawn(read_frames(addr, id, read_half, self.events_tx.clone()));

        debug!("Accepted connection from {}", addr);
        let link = PeerLink {
            id,
            outbox: Some(outbox),
            reader,
            since: Instant::now(),
        };
        if let Some(stale) = self.links.insert(addr, link) {
            stale.reader.abort();
        }
    }

    fn dispatch(&mut self, outbound: Vec<Outbound>) {
        for action in outbound {
            match action {
                Outbound::Send { addr, frame } => {
                    match self.links.get(&addr).and_then(|link| link.outbox.as_ref()) {
                        Some(outbox) => {
                            if outbox.send(frame).is_err() {
                                debug!("Writer for {} has already stopped", addr);
                            }
                        }
                        None => debug!("No open connection to {}", addr),
                    }
                }
                Outbound::Close { addr } => {
                    // Dropping the outbox lets the writer flush, then shut down
                    if let Some(link) = self.links.get_mut(&addr) {
                        link.outbox = None;
                        link.since = Instant::now();
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Accepted { stream, addr } => self.open_link(stream, addr),
            NetEvent::Frame { addr, frame } => {
                let outbound = self.engine.handle_frame(addr, &frame, Instant::now());
                self.dispatch(outbound);
            }
            NetEvent::Closed { addr, link } => {
                if self.links.get(&addr).is_some_and(|open| open.id == link) {
                    self.links.remove(&addr);
                    self.engine.connection_lost(addr);
                }
            }
        }
    }

    /// Drops connections that hold no slot (never admitted, or already told to
    /// close) and have lingered longer than the peer timeout.
    fn reap_stale_links(&mut self, now: Instant) {
        let timeout = self.config.peer_timeout;
        let stale: Vec<SocketAddr> = self
            .links
            .iter()
            .filter(|(addr, link)| {
                !self.engine.is_admitted(**addr)
                    && now.saturating_duration_since(link.since) > timeout
            })
            .map(|(addr, _)| *addr)
            .collect();

        for addr in stale {
            if let Some(link) = self.links.remove(&addr) {
                debug!("Dropping idle connection from {}", addr);
                link.reader.abort();
            }
        }
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        let expired = self.engine.expire_idle(now, self.config.peer_timeout);
        self.dispatch(expired);
        self.reap_stale_links(now);
    }

    /// Serves until Ctrl-C.
    pub async fn run(self) -> Result<Canvas, SyncError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves until `shutdown` completes, then disconnects every peer, persists
    /// the canvas and returns it.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<Canvas, SyncError>
    where
        F: Future<Output = ()>,
    {
        let acceptor = self.spawn_acceptor();

        let mut sweep = interval(Duration::from_secs(1));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            error!("Event channel closed");
                            break;
                        }
                    }
                },

                _ = sweep.tick() => self.sweep(),

                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        let result = self.shutdown().await;
        acceptor.abort();
        result
    }

    /// Notifies peers, waits a bounded time for their goodbyes, force-closes
    /// the rest and saves the canvas.
    async fn shutdown(&mut self) -> Result<Canvas, SyncError> {
        let notices = self.engine.begin_shutdown();
        if !notices.is_empty() {
            info!("Asking {} peers to disconnect", notices.len());
        }
        self.dispatch(notices);

        let deadline = time::Instant::now() + self.config.shutdown_grace;
        while !self.engine.peers().is_empty() {
            match time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) | Err(_) => break,
            }
        }

        let forced = self.engine.release_all();
        if !forced.is_empty() {
            warn!("Force-closed {} peers that did not acknowledge", forced.len());
        }
        self.dispatch(forced);

        // Writers keep running until their queues are flushed
        for (_, link) in self.links.drain() {
            link.reader.abort();
        }

        if let Some(store) = &self.store {
            store.save(self.engine.canvas()).await?;
        }

        Ok(self.engine.canvas().clone())
    }
}

/// Forwards every frame read from the connection to the main loop, then
/// reports the connection closed.
async fn read_frames(
    addr: SocketAddr,
    link: u64,
    read_half: OwnedReadHalf,
    events_tx: mpsc::UnboundedSender<NetEvent>,
) {
    let mut frames = FramedRead::new(read_half, framing::codec(MAX_CLIENT_FRAME_LEN));

    loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                let frame = frame.freeze();
                if events_tx.send(NetEvent::Frame { addr, frame }).is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!("Connection from {} failed: {}", addr, e);
                break;
            }
            None => break,
        }
    }

    let _ = events_tx.send(NetEvent::Closed { addr, link });
}

/// Writes queued frames in order until the outbox is dropped, then shuts the
/// write side down.
async fn write_frames(
    addr: SocketAddr,
    write_half: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut sink = FramedWrite::new(write_half, framing::codec(MAX_SERVER_FRAME_LEN));

    while let Some(frame) = outbox.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!("Failed to send to {}: {}", addr, e);
            return;
        }
    }

    if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!("Closing connection to {}: {}", addr, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Control, Packet, PixelEdit, Rgb};
    use tokio::sync::oneshot;
    use tokio_test::assert_ok;
    use tokio_util::codec::{Framed, LengthDelimitedCodec};

    type RawPeer = Framed<TcpStream, LengthDelimitedCodec>;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            save_path: None,
            shutdown_grace: Duration::from_millis(300),
            ..ServerConfig::default()
        }
    }

    fn spawn(server: Server) -> (oneshot::Sender<()>, JoinHandle<Result<Canvas, SyncError>>) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));
        (stop_tx, handle)
    }

    async fn raw_peer(server_addr: SocketAddr) -> RawPeer {
        let stream = TcpStream::connect(server_addr).await.unwrap();
        Framed::new(stream, framing::codec(MAX_SERVER_FRAME_LEN))
    }

    async fn send(peer: &mut RawPeer, packet: Packet) {
        let frame = packet.to_frame().unwrap();
        peer.send(Bytes::from(frame)).await.unwrap();
    }

    /// Next frame, or `None` once the server has closed the connection.
    async fn recv(peer: &mut RawPeer) -> Option<Packet> {
        let frame = time::timeout(Duration::from_secs(2), peer.next())
            .await
            .expect("timed out waiting for frame")?
            .ok()?;
        Some(Packet::from_frame(&frame).unwrap())
    }

    #[tokio::test]
    async fn test_large_canvas_is_served() {
        // 120 004 byte snapshot
        let canvas = Canvas::new(200, 200, FillRule::Diagonal).unwrap();
        let server = Server::bind(test_config(), canvas.clone()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, handle) = spawn(server);

        let mut peer = raw_peer(server_addr).await;
        send(&mut peer, Packet::Control(Control::Connect)).await;
        assert_eq!(recv(&mut peer).await, Some(Packet::Snapshot(canvas)));

        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let config = ServerConfig {
            bind_addr: "not an address".to_string(),
            ..test_config()
        };
        let canvas = Canvas::new(2, 2, FillRule::Diagonal).unwrap();
        let result = Server::bind(config, canvas).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn test_handshake_and_broadcast_over_tcp() {
        let canvas = Canvas::new(2, 2, FillRule::Solid(Rgb::BLACK)).unwrap();
        let server = Server::bind(test_config(), canvas).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, handle) = spawn(server);

        let mut peer = raw_peer(server_addr).await;
        send(&mut peer, Packet::Control(Control::Connect)).await;
        let Some(Packet::Snapshot(snapshot)) = recv(&mut peer).await else {
            panic!("expected snapshot");
        };
        assert_eq!((snapshot.width(), snapshot.height()), (2, 2));

        let edit = PixelEdit::new(0, 1, Rgb::new(255, 0, 0));
        send(&mut peer, Packet::Delta(edit)).await;
        assert_eq!(recv(&mut peer).await, Some(Packet::Delta(edit)));

        stop_tx.send(()).unwrap();

        // The server asks us to leave; acknowledge so it does not wait
        assert_eq!(
            recv(&mut peer).await,
            Some(Packet::Control(Control::Disconnect))
        );
        send(&mut peer, Packet::Control(Control::Disconnect)).await;
        assert_eq!(recv(&mut peer).await, None);

        let final_canvas = handle.await.unwrap().unwrap();
        assert_eq!(final_canvas.get_pixel(0, 1).unwrap(), Rgb::new(255, 0, 0));
    }

    #[tokio::test]
    async fn test_rejected_connection_is_closed() {
        let canvas = Canvas::new(2, 2, FillRule::Diagonal).unwrap();
        let config = ServerConfig {
            max_peers: 1,
            ..test_config()
        };
        let server = Server::bind(config, canvas).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, handle) = spawn(server);

        let mut first = raw_peer(server_addr).await;
        send(&mut first, Packet::Control(Control::Connect)).await;
        assert!(matches!(recv(&mut first).await, Some(Packet::Snapshot(_))));

        let mut second = raw_peer(server_addr).await;
        send(&mut second, Packet::Control(Control::Connect)).await;
        assert_eq!(
            recv(&mut second).await,
            Some(Packet::Control(Control::Rejected))
        );
        assert_eq!(recv(&mut second).await, None);

        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_connection() {
        let canvas = Canvas::new(2, 2, FillRule::Diagonal).unwrap();
        let server = Server::bind(test_config(), canvas).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, handle) = spawn(server);

        let mut peer = raw_peer(server_addr).await;
        send(&mut peer, Packet::Control(Control::Connect)).await;
        recv(&mut peer).await;

        // A client never sends anything longer than a delta
        peer.send(Bytes::from(vec![0u8; 64])).await.unwrap();
        assert_eq!(recv(&mut peer).await, None);

        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_without_connect_is_dropped() {
        let config = ServerConfig {
            peer_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let canvas = Canvas::new(2, 2, FillRule::Diagonal).unwrap();
        let server = Server::bind(config, canvas).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, handle) = spawn(server);

        let mut idle = raw_peer(server_addr).await;
        let closed = time::timeout(Duration::from_secs(3), idle.next()).await;
        assert!(matches!(closed, Ok(None) | Ok(Some(Err(_)))));

        stop_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_force_closes_silent_peers() {
        let canvas = Canvas::new(2, 2, FillRule::Diagonal).unwrap();
        let server = Server::bind(test_config(), canvas.clone()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let (stop_tx, handle) = spawn(server);

        let mut peer = raw_peer(server_addr).await;
        send(&mut peer, Packet::Control(Control::Connect)).await;
        recv(&mut peer).await;

        let started = Instant::now();
        stop_tx.send(()).unwrap();

        // Never acknowledge; the grace period bounds the wait
        let final_canvas = handle.await.unwrap().unwrap();
        assert_eq!(final_canvas, canvas);
        assert!(started.elapsed() < Duration::from_secs(2));

        // The goodbye was still delivered before the connection closed
        assert_eq!(
            recv(&mut peer).await,
            Some(Packet::Control(Control::Disconnect))
        );
        assert_eq!(recv(&mut peer).await, None);
    }
}
