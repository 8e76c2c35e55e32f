//! TCP mesh: listener, dialer, and per-connection tasks
//!
//! One task accepts inbound connections, one task per configured peer
//! dials out, and every established connection gets a reader loop plus a
//! writer task fed by an unbounded channel. All inbound traffic funnels
//! into a single event channel so the consumer can serialize handling.

use crate::identity::{self, NodeIdentity};
use dice_protocol::frame::{self, FrameBuffer};
use dice_protocol::peer::truncate_alias;
use dice_protocol::{PeerId, Transport, WireMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Transport-level notifications, in arrival order per connection
#[derive(Debug)]
pub enum SwarmEvent {
    /// A peer completed the announce handshake
    Connected { peer: PeerId, alias: String },
    /// A peer's connection ended
    Disconnected { peer: PeerId },
    /// A decoded frame from an established peer
    Message { peer: PeerId, message: WireMessage },
}

/// Swarm startup parameters
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Address to accept peers on
    pub listen: SocketAddr,
    /// Peer addresses to dial at startup
    pub peers: Vec<String>,
    /// Initial display alias announced to peers
    pub alias: String,
}

type ConnMap = Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<WireMessage>>>>;

/// A running mesh node
pub struct Swarm {
    handle: SwarmHandle,
    local_addr: SocketAddr,
}

impl Swarm {
    /// Bind the listener, dial configured peers, return the event stream
    pub async fn start(
        config: SwarmConfig,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<SwarmEvent>)> {
        let handle = SwarmHandle {
            identity: Arc::new(NodeIdentity::generate()),
            alias: Arc::new(RwLock::new(truncate_alias(&config.alias))),
            conns: Arc::new(RwLock::new(HashMap::new())),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let listener = TcpListener::bind(config.listen).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, peer = %handle.peer_id().short(), "listening for peers");

        let accept_handle = handle.clone();
        let accept_events = events_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let handle = accept_handle.clone();
                        let events = accept_events.clone();
                        tokio::spawn(async move {
                            if let Err(err) = run_connection(stream, handle, events).await {
                                tracing::warn!(%addr, %err, "peer connection error");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::error!(%err, "accept error");
                    }
                }
            }
        });

        for addr in config.peers {
            let handle = handle.clone();
            let events = events_tx.clone();
            tokio::spawn(async move {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => {
                        tracing::info!(%addr, "dialed peer");
                        if let Err(err) = run_connection(stream, handle, events).await {
                            tracing::warn!(%addr, %err, "peer connection error");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%addr, %err, "could not reach peer");
                    }
                }
            });
        }

        Ok((Self { handle, local_addr }, events_rx))
    }

    pub fn handle(&self) -> SwarmHandle {
        self.handle.clone()
    }

    /// Actual bound address (useful when listening on port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_id(&self) -> PeerId {
        self.handle.peer_id()
    }
}

/// Cheap clone handed to whoever needs to talk to the mesh
#[derive(Clone)]
pub struct SwarmHandle {
    identity: Arc<NodeIdentity>,
    alias: Arc<RwLock<String>>,
    conns: ConnMap,
}

impl SwarmHandle {
    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn connected(&self) -> usize {
        self.conns.read().len()
    }

    /// Adopt a new alias and broadcast a freshly signed announce
    pub fn announce(&self, alias: &str) {
        let alias = truncate_alias(alias);
        let message = self.identity.signed_announce(&alias);
        *self.alias.write() = alias;
        self.broadcast(&message);
    }
}

impl Transport for SwarmHandle {
    fn broadcast(&self, message: &WireMessage) {
        for tx in self.conns.read().values() {
            let _ = tx.send(message.clone());
        }
    }

    fn send_to(&self, peer: &PeerId, message: &WireMessage) {
        if let Some(tx) = self.conns.read().get(peer) {
            let _ = tx.send(message.clone());
        }
    }
}

/// Drive one connection from handshake to teardown
async fn run_connection(
    stream: TcpStream,
    handle: SwarmHandle,
    events: mpsc::UnboundedSender<SwarmEvent>,
) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();

    // introduce ourselves first, then wait for the peer to do the same
    let hello = {
        let alias = handle.alias.read().clone();
        handle.identity.signed_announce(&alias)
    };
    writer.write_all(&frame::encode_frame(&hello)).await?;

    let mut frames = FrameBuffer::new();
    let (peer, alias, backlog) = await_announce(&mut reader, &mut frames).await?;
    if peer == handle.peer_id() {
        anyhow::bail!("connected to ourselves");
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();
    {
        let mut conns = handle.conns.write();
        if conns.contains_key(&peer) {
            tracing::debug!(peer = %peer.short(), "duplicate connection dropped");
            return Ok(());
        }
        conns.insert(peer, tx);
    }
    let _ = events.send(SwarmEvent::Connected { peer, alias });
    // frames that rode in behind the announce
    for message in backlog {
        let _ = events.send(SwarmEvent::Message { peer, message });
    }

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if writer.write_all(&frame::encode_frame(&message)).await.is_err() {
                break;
            }
        }
    });

    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        match frames.extend(&buf[..n]) {
            Ok(messages) => {
                for message in messages {
                    if let WireMessage::Announce { peer: claimed, alias, sig, .. } = &message {
                        // an alias update must still come from this identity
                        if *claimed != peer || !identity::verify_announce(claimed, alias, sig) {
                            tracing::debug!(peer = %peer.short(), "forged announce dropped");
                            continue;
                        }
                    }
                    let _ = events.send(SwarmEvent::Message { peer, message });
                }
            }
            Err(err) => {
                tracing::warn!(peer = %peer.short(), %err, "dropping connection");
                break;
            }
        }
    }

    writer_task.abort();
    handle.conns.write().remove(&peer);
    tracing::debug!(peer = %peer.short(), "connection ended");
    let _ = events.send(SwarmEvent::Disconnected { peer });
    Ok(())
}

/// Read until the peer's first valid announce; returns any frames that
/// arrived in the same chunks after it
async fn await_announce(
    reader: &mut OwnedReadHalf,
    frames: &mut FrameBuffer,
) -> anyhow::Result<(PeerId, String, Vec<WireMessage>)> {
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            anyhow::bail!("connection closed before announce");
        }
        let mut messages = frames.extend(&buf[..n])?.into_iter();
        while let Some(message) = messages.next() {
            match message {
                WireMessage::Announce { peer, alias, version, sig } => {
                    if !identity::verify_announce(&peer, &alias, &sig) {
                        anyhow::bail!("announce signature rejected");
                    }
                    tracing::debug!(peer = %peer.short(), %version, "peer announced");
                    // whatever rode in behind the announce goes to the caller
                    return Ok((peer, truncate_alias(&alias), messages.collect()));
                }
                other => {
                    tracing::trace!(?other, "frame before announce dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dice_protocol::RoundId;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SwarmEvent>) -> SwarmEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for swarm event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_two_node_mesh_handshake_and_broadcast() {
        let (alice, mut alice_events) = Swarm::start(SwarmConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            peers: Vec::new(),
            alias: "alice".into(),
        })
        .await
        .unwrap();

        let (bob, mut bob_events) = Swarm::start(SwarmConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            peers: vec![alice.local_addr().to_string()],
            alias: "bob".into(),
        })
        .await
        .unwrap();

        match next_event(&mut alice_events).await {
            SwarmEvent::Connected { peer, alias } => {
                assert_eq!(peer, bob.peer_id());
                assert_eq!(alias, "bob");
            }
            other => panic!("expected Connected, got {other:?}"),
        }
        match next_event(&mut bob_events).await {
            SwarmEvent::Connected { peer, alias } => {
                assert_eq!(peer, alice.peer_id());
                assert_eq!(alias, "alice");
            }
            other => panic!("expected Connected, got {other:?}"),
        }

        let round_id = RoundId::generate();
        bob.handle().broadcast(&WireMessage::RollRequest {
            round_id: round_id.clone(),
            sides: 6,
        });
        match next_event(&mut alice_events).await {
            SwarmEvent::Message { peer, message } => {
                assert_eq!(peer, bob.peer_id());
                assert!(
                    matches!(message, WireMessage::RollRequest { round_id: id, sides: 6 } if id == round_id)
                );
            }
            other => panic!("expected Message, got {other:?}"),
        }

        // alias update travels as a re-signed announce
        bob.handle().announce("bobby");
        match next_event(&mut alice_events).await {
            SwarmEvent::Message { message, .. } => {
                assert!(matches!(message, WireMessage::Announce { alias, .. } if alias == "bobby"));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }
}
