//! Peer-to-peer gossip transport.
//!
//! A single framed protocol multiplexes transactions, blocks and sync
//! traffic between peers. Frames are length-prefixed typed records; the
//! payloads of transaction and block messages are bincode, and sync
//! requests carry two big-endian u64 bounds. Peers speaking another
//! protocol version, or repeatedly sending garbage, are struck and
//! disconnected after three strikes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::chain::{ChainStore, Outbound};
use crate::configuration::NetworkConfig;
use crate::transaction::Transaction;

/// Application protocol identifier, for peers that multiplex streams.
pub const PROTOCOL_ID: &str = "/blackhole/1.0.0";
/// Current wire version; any other version is a protocol error.
pub const PROTOCOL_VERSION: u16 = 1;
/// Blocks requested ahead of the tip per sync round.
pub const SYNC_BATCH: u64 = 100;

const MAX_FRAME_BYTES: u32 = 4 * 1024 * 1024;
const READ_DEADLINE: Duration = Duration::from_secs(5);
const BAD_PEER_LIMIT: u32 = 3;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("network io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u32),
    #[error("truncated frame")]
    Truncated,
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("peer speaks protocol version {0}")]
    VersionMismatch(u16),
    #[error("payload decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Tx = 0,
    Block = 1,
    SyncRequest = 2,
    SyncResponse = 3,
}

impl MessageType {
    fn from_u8(tag: u8) -> Result<Self, NetError> {
        match tag {
            0 => Ok(MessageType::Tx),
            1 => Ok(MessageType::Block),
            2 => Ok(MessageType::SyncRequest),
            3 => Ok(MessageType::SyncResponse),
            other => Err(NetError::UnknownMessageType(other)),
        }
    }
}

/// One wire record: type tag, protocol version, payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub protocol_version: u16,
    pub data: Vec<u8>,
}

impl Message {
    fn with_payload(msg_type: MessageType, data: Vec<u8>) -> Self {
        Self {
            msg_type,
            protocol_version: PROTOCOL_VERSION,
            data,
        }
    }

    pub fn tx(tx: &Transaction) -> Result<Self, NetError> {
        Ok(Self::with_payload(MessageType::Tx, encode_payload(tx)?))
    }

    pub fn block(block: &Block) -> Result<Self, NetError> {
        Ok(Self::with_payload(MessageType::Block, encode_payload(block)?))
    }

    pub fn sync_response(block: &Block) -> Result<Self, NetError> {
        Ok(Self::with_payload(MessageType::SyncResponse, encode_payload(block)?))
    }

    pub fn sync_request(start: u64, end: u64) -> Self {
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&start.to_be_bytes());
        data.extend_from_slice(&end.to_be_bytes());
        Self::with_payload(MessageType::SyncRequest, data)
    }

    pub fn decode_tx(&self) -> Result<Transaction, NetError> {
        decode_payload(&self.data)
    }

    pub fn decode_block(&self) -> Result<Block, NetError> {
        decode_payload(&self.data)
    }

    pub fn decode_sync_request(&self) -> Result<(u64, u64), NetError> {
        if self.data.len() != 16 {
            return Err(NetError::Truncated);
        }
        let start = u64::from_be_bytes(self.data[..8].try_into().expect("sliced to 8 bytes"));
        let end = u64::from_be_bytes(self.data[8..].try_into().expect("sliced to 8 bytes"));
        Ok((start, end))
    }

    /// Wire layout: u32 BE frame length, then type tag, u16 BE protocol
    /// version, payload bytes.
    pub fn encode_frame(&self) -> Vec<u8> {
        let body_len = 3 + self.data.len();
        let mut frame = Vec::with_capacity(4 + body_len);
        frame.extend_from_slice(&(body_len as u32).to_be_bytes());
        frame.push(self.msg_type as u8);
        frame.extend_from_slice(&self.protocol_version.to_be_bytes());
        frame.extend_from_slice(&self.data);
        frame
    }
}

fn encode_payload<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| NetError::Decode(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, NetError> {
    let (value, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| NetError::Decode(e.to_string()))?;
    Ok(value)
}

/// Read one frame from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, NetError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(NetError::FrameTooLarge(len));
    }
    if len < 3 {
        return Err(NetError::Truncated);
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let msg_type = MessageType::from_u8(body[0])?;
    let protocol_version = u16::from_be_bytes([body[1], body[2]]);
    Ok(Message {
        msg_type,
        protocol_version,
        data: body[3..].to_vec(),
    })
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<(), NetError> {
    writer.write_all(&msg.encode_frame()).await?;
    Ok(())
}

struct Peer {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
}

/// The connected peer set. Writers are shared so broadcast and per-peer
/// sync replies can interleave safely.
#[derive(Default)]
pub struct PeerManager {
    peers: Mutex<HashMap<SocketAddr, Peer>>,
}

impl PeerManager {
    fn add(&self, addr: SocketAddr, writer: Arc<AsyncMutex<OwnedWriteHalf>>) {
        self.peers.lock().unwrap().insert(addr, Peer { writer });
    }

    fn remove(&self, addr: &SocketAddr) {
        self.peers.lock().unwrap().remove(addr);
    }

    pub fn count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.lock().unwrap().keys().copied().collect()
    }

    /// Send a frame to every peer. Failures are logged per peer and never
    /// block delivery to the others.
    pub async fn broadcast(&self, frame: Vec<u8>) {
        let writers: Vec<(SocketAddr, Arc<AsyncMutex<OwnedWriteHalf>>)> = {
            let peers = self.peers.lock().unwrap();
            peers
                .iter()
                .map(|(addr, peer)| (*addr, peer.writer.clone()))
                .collect()
        };
        for (addr, writer) in writers {
            let frame = frame.clone();
            tokio::spawn(async move {
                let mut w = writer.lock().await;
                if let Err(e) = w.write_all(&frame).await {
                    warn!(peer = %addr, error = %e, "broadcast send failed");
                }
            });
        }
    }
}

/// Per-peer protocol strike counter, kept apart from the peer set so
/// strikes never contend with normal traffic.
#[derive(Default)]
struct BadPeerTracker {
    strikes: Mutex<HashMap<SocketAddr, u32>>,
}

impl BadPeerTracker {
    fn strike(&self, addr: SocketAddr) -> u32 {
        let mut strikes = self.strikes.lock().unwrap();
        let count = strikes.entry(addr).or_insert(0);
        *count += 1;
        *count
    }

    fn forget(&self, addr: &SocketAddr) {
        self.strikes.lock().unwrap().remove(addr);
    }
}

/// The gossip node: listener, peer set, outbox drain and sync timer.
pub struct Network {
    config: NetworkConfig,
    peers: Arc<PeerManager>,
    bad_peers: BadPeerTracker,
    chain: Arc<RwLock<ChainStore>>,
}

impl Network {
    pub fn new(config: NetworkConfig, chain: Arc<RwLock<ChainStore>>) -> Self {
        Self {
            config,
            peers: Arc::new(PeerManager::default()),
            bad_peers: BadPeerTracker::default(),
            chain,
        }
    }

    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    /// Accept inbound peers on a pre-bound listener until shutdown. The
    /// caller binds, so a taken port fails startup instead of a task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = %self.config.bind_addr, protocol = PROTOCOL_ID, "gossip listener started");

        for addr in self.config.bootstrap_peers.clone() {
            self.clone().connect_peer(addr).await;
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if self.peers.count() >= self.config.max_peers {
                            debug!(peer = %addr, "at peer capacity, dropping inbound connection");
                            continue;
                        }
                        let node = self.clone();
                        tokio::spawn(async move { node.handle_connection(stream, addr).await });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown.recv() => {
                    info!("gossip listener stopping");
                    return;
                }
            }
        }
    }

    /// Dial a peer and start serving its stream.
    pub async fn connect_peer(self: Arc<Self>, addr: String) {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                let peer_addr = match stream.peer_addr() {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "connected peer has no address");
                        return;
                    }
                };
                info!(peer = %peer_addr, "connected to peer");
                tokio::spawn(async move { self.handle_connection(stream, peer_addr).await });
            }
            Err(e) => warn!(peer = %addr, error = %e, "failed to connect"),
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(writer));
        self.peers.add(addr, writer.clone());
        debug!(peer = %addr, "peer connected");

        loop {
            let frame = match timeout(READ_DEADLINE, read_frame(&mut reader)).await {
                Err(_) => {
                    debug!(peer = %addr, "read deadline expired, dropping silent peer");
                    break;
                }
                Ok(Err(NetError::Io(e))) => {
                    debug!(peer = %addr, error = %e, "peer stream closed");
                    break;
                }
                Ok(Err(e)) => {
                    let out = self.punish(addr, &e);
                    // An oversized frame leaves the stream unframed; there
                    // is no recovering mid-stream.
                    if out || matches!(e, NetError::FrameTooLarge(_)) {
                        break;
                    }
                    continue;
                }
                Ok(Ok(frame)) => frame,
            };

            if frame.protocol_version != PROTOCOL_VERSION {
                let e = NetError::VersionMismatch(frame.protocol_version);
                if self.punish(addr, &e) {
                    break;
                }
                continue;
            }

            if let Err(e) = self.route(frame, addr, &writer).await {
                if self.punish(addr, &e) {
                    break;
                }
            }
        }

        self.peers.remove(&addr);
        self.bad_peers.forget(&addr);
        debug!(peer = %addr, "peer disconnected");
    }

    /// Record a protocol strike; true means the peer is out.
    fn punish(&self, addr: SocketAddr, error: &NetError) -> bool {
        let strikes = self.bad_peers.strike(addr);
        warn!(peer = %addr, %error, strikes, "peer protocol error");
        strikes >= BAD_PEER_LIMIT
    }

    async fn route(
        &self,
        frame: Message,
        addr: SocketAddr,
        writer: &Arc<AsyncMutex<OwnedWriteHalf>>,
    ) -> Result<(), NetError> {
        match frame.msg_type {
            MessageType::Tx => {
                let tx = frame.decode_tx()?;
                let mut chain = self.chain.write().await;
                if let Err(e) = chain.accept_remote_transaction(tx) {
                    // A semantically unacceptable transaction is not a
                    // protocol violation; the peer may just be behind.
                    debug!(peer = %addr, error = %e, "remote transaction rejected");
                }
            }
            MessageType::Block | MessageType::SyncResponse => {
                let block = frame.decode_block()?;
                let index = block.header.index;
                let outcome = self.chain.write().await.add_block(block).await;
                debug!(peer = %addr, index, ?outcome, "peer block processed");
            }
            MessageType::SyncRequest => {
                let (start, end) = frame.decode_sync_request()?;
                let end = end.min(start.saturating_add(SYNC_BATCH));
                let blocks = self.chain.read().await.blocks_in_range(start, end);
                debug!(peer = %addr, start, end, count = blocks.len(), "serving sync request");
                let mut w = writer.lock().await;
                for block in &blocks {
                    write_frame(&mut *w, &Message::sync_response(block)?).await?;
                }
            }
        }
        Ok(())
    }

    /// Drain chain-originated messages into the peer set.
    pub async fn run_outbox(
        self: Arc<Self>,
        mut outbox: mpsc::UnboundedReceiver<Outbound>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                item = outbox.recv() => {
                    let Some(item) = item else { return };
                    let encoded = match &item {
                        Outbound::Transaction(tx) => Message::tx(tx),
                        Outbound::Block(block) => Message::block(block),
                        Outbound::SyncRequest { start, end } => Ok(Message::sync_request(*start, *end)),
                    };
                    match encoded {
                        Ok(msg) => self.peers.broadcast(msg.encode_frame()).await,
                        Err(e) => warn!(error = %e, "failed to encode outbound message"),
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Periodically ask all peers for the blocks just ahead of our tip.
    pub async fn run_sync_timer(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.peers.count() == 0 {
                        continue;
                    }
                    let tip = self.chain.read().await.tip().header.index;
                    let msg = Message::sync_request(tip + 1, tip + SYNC_BATCH);
                    self.peers.broadcast(msg.encode_frame()).await;
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}
