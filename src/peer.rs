use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use derive_more::Display;
use event_listener_primitives::HandlerId;
use mediasoup::consumer::Consumer;
use mediasoup::producer::{Producer, ProducerId};
use mediasoup::types::rtp_parameters::MediaKind;
use mediasoup::transport::{Transport, TransportId};
use mediasoup::webrtc_transport::WebRtcTransport;
use serde::{Deserialize, Serialize};

use crate::messages::{MediaSource, ProducerSummary, ServerMessage, TransportDirection};
use crate::relay_server::SignalError;
use crate::room::WeakRoom;
use crate::signaling::Connection;

/// Client-chosen peer identifier, unique within the process while the peer
/// is joined.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Display, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
}

/// A producer together with the application-level flags the signaling layer
/// tracks for it. Dropping the record closes the worker-side producer and
/// unsubscribes the transport-close handler.
pub struct ProducerRecord {
    pub producer: Producer,
    pub source: MediaSource,
    pub paused: bool,
    pub muted: bool,
    pub _transport_close_handler: HandlerId,
}

/// A consumer keyed by its upstream producer so producer-close events evict
/// in O(1). `peer_id` is the upstream producer's owner, never this peer.
pub struct ConsumerRecord {
    pub consumer: Consumer,
    pub peer_id: PeerId,
    pub _producer_close_handler: HandlerId,
}

/// Everything a peer owns that must be released on teardown, in the order
/// teardown releases it.
pub struct PeerMedia {
    pub producers: Vec<(ProducerId, ProducerRecord)>,
    pub consumers: Vec<ConsumerRecord>,
    pub send_transport: Option<WebRtcTransport>,
    pub recv_transport: Option<WebRtcTransport>,
}

#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,

    id: PeerId,
    display_name: String,
    conn: Connection,
    room: WeakRoom,
    closed: AtomicBool,
}

struct State {
    connection_state: ConnectionState,
    send_transport: Option<WebRtcTransport>,
    recv_transport: Option<WebRtcTransport>,
    producers: HashMap<ProducerId, ProducerRecord>,
    consumers: HashMap<ProducerId, ConsumerRecord>,
}

impl Peer {
    pub fn new(id: PeerId, display_name: String, conn: Connection, room: WeakRoom) -> Self {
        log::trace!("+peer {}", id);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    connection_state: ConnectionState::New,
                    send_transport: None,
                    recv_transport: None,
                    producers: HashMap::new(),
                    consumers: HashMap::new(),
                }),
                id,
                display_name,
                conn,
                room,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> PeerId {
        self.shared.id.clone()
    }
    pub fn display_name(&self) -> String {
        self.shared.display_name.clone()
    }
    pub fn room(&self) -> WeakRoom {
        self.shared.room.clone()
    }
    pub fn connection_state(&self) -> ConnectionState {
        let state = self.shared.state.lock().unwrap();
        state.connection_state
    }
    pub fn set_connection_state(&self, connection_state: ConnectionState) {
        let mut state = self.shared.state.lock().unwrap();
        state.connection_state = connection_state;
    }

    /// Queue a notification on this peer's connection. Failures are silent;
    /// a peer whose socket is gone is reaped by its own disconnect handler.
    pub fn notify(&self, message: &ServerMessage) {
        self.shared.conn.send(message);
    }

    /// Marks the peer as tearing down. The first caller gets `true` and runs
    /// the teardown; everyone else observes a no-op.
    pub fn begin_close(&self) -> bool {
        !self.shared.closed.swap(true, Ordering::SeqCst)
    }
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stores a transport for the given direction, returning the one it
    /// replaces (if any) so the caller can let it close. Refused once
    /// teardown has begun: `take_media` will not run again, so the handle
    /// must drop at the caller instead of parking in state.
    pub fn set_transport(
        &self,
        direction: TransportDirection,
        transport: WebRtcTransport,
    ) -> Result<Option<WebRtcTransport>, SignalError> {
        let mut state = self.shared.state.lock().unwrap();
        if self.is_closed() {
            return Err(SignalError::PeerClosed);
        }
        log::trace!("+transport {} ({:?}, peer {})", transport.id(), direction, self.id());
        Ok(match direction {
            TransportDirection::Send => state.send_transport.replace(transport),
            TransportDirection::Recv => state.recv_transport.replace(transport),
        })
    }
    pub fn send_transport(&self) -> Option<WebRtcTransport> {
        let state = self.shared.state.lock().unwrap();
        state.send_transport.clone()
    }
    pub fn recv_transport(&self) -> Option<WebRtcTransport> {
        let state = self.shared.state.lock().unwrap();
        state.recv_transport.clone()
    }
    pub fn transport_by_id(&self, id: TransportId) -> Option<WebRtcTransport> {
        let state = self.shared.state.lock().unwrap();
        let found = [&state.send_transport, &state.recv_transport]
            .into_iter()
            .flatten()
            .find(|transport| transport.id() == id)
            .cloned();
        found
    }

    pub fn insert_producer(&self, record: ProducerRecord) {
        log::trace!("+producer {} (peer {})", record.producer.id(), self.id());
        let mut state = self.shared.state.lock().unwrap();
        state.producers.insert(record.producer.id(), record);
    }
    pub fn remove_producer(&self, producer_id: &ProducerId) -> Option<ProducerRecord> {
        let mut state = self.shared.state.lock().unwrap();
        let record = state.producers.remove(producer_id);
        if record.is_some() {
            log::trace!("-producer {} (peer {})", producer_id, self.id());
        }
        record
    }
    pub fn producer_handle(&self, producer_id: &ProducerId) -> Option<Producer> {
        let state = self.shared.state.lock().unwrap();
        state
            .producers
            .get(producer_id)
            .map(|record| record.producer.clone())
    }
    pub fn producer_meta(&self, producer_id: &ProducerId) -> Option<(MediaKind, MediaSource)> {
        let state = self.shared.state.lock().unwrap();
        state
            .producers
            .get(producer_id)
            .map(|record| (record.producer.kind(), record.source))
    }
    pub fn set_producer_paused(&self, producer_id: &ProducerId, paused: bool) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        match state.producers.get_mut(producer_id) {
            Some(record) => {
                record.paused = paused;
                true
            }
            None => false,
        }
    }
    pub fn set_producer_muted(&self, producer_id: &ProducerId, muted: bool) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        match state.producers.get_mut(producer_id) {
            Some(record) => {
                record.muted = muted;
                true
            }
            None => false,
        }
    }
    pub fn producer_summaries(&self) -> Vec<ProducerSummary> {
        let state = self.shared.state.lock().unwrap();
        state
            .producers
            .values()
            .map(|record| ProducerSummary {
                id: record.producer.id(),
                peer_id: self.id(),
                kind: record.producer.kind(),
                source: record.source,
                display_name: self.display_name(),
            })
            .collect()
    }

    /// Refused once teardown has begun, like [`Peer::set_transport`].
    pub fn insert_consumer(
        &self,
        upstream: ProducerId,
        record: ConsumerRecord,
    ) -> Result<(), SignalError> {
        let mut state = self.shared.state.lock().unwrap();
        if self.is_closed() {
            return Err(SignalError::PeerClosed);
        }
        log::trace!("+consumer {} (peer {})", record.consumer.id(), self.id());
        state.consumers.insert(upstream, record);
        Ok(())
    }
    pub fn remove_consumer(&self, upstream: &ProducerId) -> Option<ConsumerRecord> {
        let mut state = self.shared.state.lock().unwrap();
        let record = state.consumers.remove(upstream);
        if let Some(record) = &record {
            log::trace!("-consumer {} (peer {})", record.consumer.id(), self.id());
        }
        record
    }
    pub fn has_consumer_for(&self, upstream: &ProducerId) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.consumers.contains_key(upstream)
    }

    /// Empties the peer of all owned media resources for teardown and marks
    /// it disconnected. Ownership moves to the caller, which releases in
    /// teardown order.
    pub fn take_media(&self) -> PeerMedia {
        let mut state = self.shared.state.lock().unwrap();
        state.connection_state = ConnectionState::Disconnected;
        PeerMedia {
            producers: state.producers.drain().collect(),
            consumers: state.consumers.drain().map(|(_, record)| record).collect(),
            send_transport: state.send_transport.take(),
            recv_transport: state.recv_transport.take(),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        log::trace!("-peer {}", self.id);
    }
}
