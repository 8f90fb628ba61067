use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use bimap::BiMap;
use mediasoup::types::rtp_parameters::RtpCodecCapability;
use mediasoup::worker::Worker;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::media::{AudioObserverConfig, TransportConfig, WorkerEvent};
use crate::messages::{PeerSummary, ProducerSummary, ServerMessage};
use crate::peer::{ConnectionState, Peer, PeerId, ProducerRecord};
use crate::room::{Room, RoomId};
use crate::signaling::{Connection, ConnectionId};

/// Per-request failures recovered into `{error}` frames. Worker rejections
/// carry the worker's message verbatim.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("Room not found")]
    RoomNotFound,
    #[error("Peer not found")]
    PeerNotFound,
    #[error("Transport not found")]
    TransportNotFound,
    #[error("Producer not found")]
    ProducerNotFound,
    #[error("peer id {0} already taken")]
    PeerIdTaken(PeerId),
    #[error("connection already joined a room")]
    AlreadyJoined,
    #[error("send transport not created")]
    NoSendTransport,
    #[error("recv transport not created")]
    NoRecvTransport,
    #[error("cannot consume own producer")]
    SelfConsume,
    #[error("incompatible rtp capabilities")]
    CannotConsume,
    #[error("peer is disconnected")]
    PeerClosed,
    #[error("{0}")]
    Worker(String),
}

impl SignalError {
    pub fn worker(err: impl fmt::Display) -> Self {
        SignalError::Worker(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RelayServerOptions {
    pub transport: TransportConfig,
    pub media_codecs: Vec<RtpCodecCapability>,
    pub audio_observer: AudioObserverConfig,
}

/// Result of attaching a peer to a room: the snapshots taken atomically with
/// the attach, plus the recipient set for the `peerJoined` fan-out.
pub struct JoinedRoom {
    pub room: Room,
    pub peer: Peer,
    pub others: Vec<Peer>,
    pub peers: Vec<PeerSummary>,
    pub producers: Vec<ProducerSummary>,
}

#[derive(Clone)]
pub struct RelayServer {
    shared: Arc<Shared>,
}

#[derive(Clone)]
struct WeakRelayServer {
    shared: Weak<Shared>,
}

struct Shared {
    /// The coordination domain: all three indices plus every `Room.peers`
    /// mutation, join snapshot, and producer-registration happen under this
    /// one lock, so the indices never diverge and a `joinRoom` snapshot and
    /// a `newProducer` fan-out are mutually exclusive per producer.
    state: Mutex<State>,

    worker: Worker,
    options: RelayServerOptions,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

struct State {
    conn_peers: BiMap<ConnectionId, PeerId>,
    peer_rooms: HashMap<PeerId, RoomId>,
    rooms: HashMap<RoomId, Room>,
}

impl RelayServer {
    pub fn new(worker: Worker, options: RelayServerOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let server = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    conn_peers: BiMap::new(),
                    peer_rooms: HashMap::new(),
                    rooms: HashMap::new(),
                }),
                worker,
                options,
                events_tx,
            }),
        };
        tokio::spawn(event_pump(server.downgrade(), events_rx));
        server
    }

    pub fn options(&self) -> &RelayServerOptions {
        &self.shared.options
    }
    pub(crate) fn events_tx(&self) -> mpsc::UnboundedSender<WorkerEvent> {
        self.shared.events_tx.clone()
    }
    fn downgrade(&self) -> WeakRelayServer {
        WeakRelayServer {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Idempotently materializes a room. The registry lock is held across
    /// router creation so concurrent calls for the same id observe or create
    /// exactly one room.
    pub async fn get_or_create_room(&self, room_id: RoomId) -> Result<Room, SignalError> {
        let mut state = self.shared.state.lock().await;
        self.room_entry(&mut state, room_id).await
    }

    async fn room_entry(
        &self,
        state: &mut State,
        room_id: RoomId,
    ) -> Result<Room, SignalError> {
        if let Some(room) = state.rooms.get(&room_id) {
            return Ok(room.clone());
        }
        let room = Room::new(
            room_id.clone(),
            &self.shared.worker,
            self.shared.options.media_codecs.clone(),
            self.shared.options.audio_observer,
            self.shared.events_tx.clone(),
        )
        .await?;
        state.rooms.insert(room_id, room.clone());
        Ok(room)
    }

    /// Materializes the room if needed and attaches a new peer to it. The
    /// peer list and producer snapshots are taken in the same critical
    /// section as the attach.
    pub async fn join_room(
        &self,
        conn: &Connection,
        room_id: RoomId,
        peer_id: PeerId,
        display_name: String,
    ) -> Result<JoinedRoom, SignalError> {
        let mut state = self.shared.state.lock().await;
        if state.conn_peers.contains_left(&conn.id()) {
            return Err(SignalError::AlreadyJoined);
        }
        if state.peer_rooms.contains_key(&peer_id) {
            return Err(SignalError::PeerIdTaken(peer_id));
        }
        let room = self.room_entry(&mut state, room_id.clone()).await?;

        let peer = Peer::new(
            peer_id.clone(),
            display_name,
            conn.clone(),
            room.downgrade(),
        );
        peer.set_connection_state(ConnectionState::Connecting);
        room.add_peer(peer.clone());
        state.conn_peers.insert(conn.id(), peer_id.clone());
        state.peer_rooms.insert(peer_id.clone(), room_id.clone());

        let others = room.peers_except(Some(&peer_id));
        let peers = others
            .iter()
            .map(|other| PeerSummary {
                id: other.id(),
                display_name: other.display_name(),
                connection_state: other.connection_state(),
            })
            .collect();
        let producers = others
            .iter()
            .flat_map(|other| other.producer_summaries())
            .collect();

        log::debug!("peer {} joined room {}", peer_id, room_id);
        Ok(JoinedRoom {
            room,
            peer,
            others,
            peers,
            producers,
        })
    }

    /// Stores a freshly produced record on `peer` and snapshots the
    /// `newProducer` recipients, atomically against concurrent joins. If the
    /// peer tore down while the worker call was in flight, the record is
    /// dropped (closing the producer) and the request fails.
    pub async fn register_producer(
        &self,
        peer: &Peer,
        record: ProducerRecord,
    ) -> Result<Vec<Peer>, SignalError> {
        let _state = self.shared.state.lock().await;
        if peer.is_closed() {
            return Err(SignalError::PeerClosed);
        }
        let room = peer.room().upgrade().ok_or(SignalError::RoomNotFound)?;
        peer.insert_producer(record);
        Ok(room.peers_except(Some(&peer.id())))
    }

    pub async fn peer_for_conn(&self, conn_id: ConnectionId) -> Option<Peer> {
        let state = self.shared.state.lock().await;
        let peer_id = state.conn_peers.get_by_left(&conn_id)?;
        let room_id = state.peer_rooms.get(peer_id)?;
        state.rooms.get(room_id)?.get_peer(peer_id)
    }

    pub async fn room(&self, room_id: &RoomId) -> Option<Room> {
        let state = self.shared.state.lock().await;
        state.rooms.get(room_id).cloned()
    }

    /// Teardown entry point for a severed connection.
    pub async fn cleanup_connection(&self, conn_id: ConnectionId) {
        let peer_id = {
            let state = self.shared.state.lock().await;
            state.conn_peers.get_by_left(&conn_id).cloned()
        };
        if let Some(peer_id) = peer_id {
            self.cleanup_peer(&peer_id).await;
        }
    }

    /// Tears a peer down exactly once: close producers (broadcasting
    /// `producerClosed` for each), close consumers, close transports, drop
    /// the registry and room mappings, broadcast `peerLeft`, and collapse
    /// the room if it emptied. Concurrent calls collapse to one execution.
    pub async fn cleanup_peer(&self, peer_id: &PeerId) {
        let mut state = self.shared.state.lock().await;
        let Some(room_id) = state.peer_rooms.get(peer_id).cloned() else {
            return;
        };
        let Some(room) = state.rooms.get(&room_id).cloned() else {
            return;
        };
        let Some(peer) = room.get_peer(peer_id) else {
            return;
        };
        if !peer.begin_close() {
            return;
        }

        let media = peer.take_media();
        state.conn_peers.remove_by_right(peer_id);
        state.peer_rooms.remove(peer_id);
        room.remove_peer(peer_id);
        let remaining = room.peers_except(None);
        if remaining.is_empty() {
            state.rooms.remove(&room_id);
        }
        drop(state);

        for (producer_id, record) in media.producers {
            drop(record);
            let message = ServerMessage::ProducerClosed {
                peer_id: peer_id.clone(),
                producer_id,
            };
            for other in &remaining {
                other.notify(&message);
            }
        }
        drop(media.consumers);
        drop(media.send_transport);
        drop(media.recv_transport);

        let message = ServerMessage::PeerLeft {
            peer_id: peer_id.clone(),
            display_name: peer.display_name(),
        };
        for other in &remaining {
            other.notify(&message);
        }
        log::debug!("peer {} left room {}", peer_id, room_id);
    }

    /// Applies a worker-initiated event. Ids are re-resolved under the
    /// registry lock, so an event racing a teardown lands on nothing.
    async fn handle_worker_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::ProducerTransportClosed {
                peer_id,
                producer_id,
            } => {
                let (record, room) = {
                    let state = self.shared.state.lock().await;
                    let Some(room) = state
                        .peer_rooms
                        .get(&peer_id)
                        .and_then(|room_id| state.rooms.get(room_id))
                        .cloned()
                    else {
                        return;
                    };
                    let Some(peer) = room.get_peer(&peer_id) else {
                        return;
                    };
                    (peer.remove_producer(&producer_id), room)
                };
                if let Some(record) = record {
                    drop(record);
                    room.broadcast(
                        &ServerMessage::ProducerClosed {
                            peer_id: peer_id.clone(),
                            producer_id,
                        },
                        Some(&peer_id),
                    );
                }
            }
            WorkerEvent::ConsumerProducerClosed {
                peer_id,
                producer_id,
            } => {
                let state = self.shared.state.lock().await;
                let peer = state
                    .peer_rooms
                    .get(&peer_id)
                    .and_then(|room_id| state.rooms.get(room_id))
                    .and_then(|room| room.get_peer(&peer_id));
                if let Some(peer) = peer {
                    peer.remove_consumer(&producer_id);
                }
            }
            WorkerEvent::AudioVolumes { room_id, volumes } => {
                let room = {
                    let state = self.shared.state.lock().await;
                    state.rooms.get(&room_id).cloned()
                };
                if let Some(room) = room {
                    for (peer_id, volume) in volumes {
                        room.broadcast(&ServerMessage::AudioLevel { peer_id, volume }, None);
                    }
                }
            }
        }
    }
}

impl WeakRelayServer {
    fn upgrade(&self) -> Option<RelayServer> {
        let shared = self.shared.upgrade()?;
        Some(RelayServer { shared })
    }
}

/// Drains worker-initiated events onto the registry. Holding only a weak
/// server reference lets the pump wind down once the server is gone.
async fn event_pump(
    server: WeakRelayServer,
    mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        let Some(server) = server.upgrade() else {
            break;
        };
        server.handle_worker_event(event).await;
    }
}
