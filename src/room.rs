use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use derive_more::Display;
use event_listener_primitives::HandlerId;
use mediasoup::audio_level_observer::AudioLevelObserver;
use mediasoup::producer::ProducerId;
use mediasoup::router::{Router, RouterOptions};
use mediasoup::rtp_observer::{RtpObserver, RtpObserverAddProducerOptions};
use mediasoup::types::rtp_parameters::{MediaKind, RtpCapabilitiesFinalized, RtpCodecCapability};
use mediasoup::worker::Worker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::media::{AudioObserverConfig, WorkerEvent};
use crate::messages::{MediaSource, ServerMessage};
use crate::peer::{Peer, PeerId};
use crate::relay_server::SignalError;

/// Client-chosen room identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Display, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

#[derive(Clone)]
pub struct Room {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct WeakRoom {
    shared: Weak<Shared>,
}

struct Shared {
    state: Mutex<State>,

    id: RoomId,
    router: Router,
    audio_level_observer: AudioLevelObserver,
    _volumes_handler: HandlerId,
}

struct State {
    peers: HashMap<PeerId, Peer>,
}

impl Room {
    /// Creates the room's router and loudest-speaker observer on `worker`.
    /// Volume reports are mapped from producer `appData` stamps to owning
    /// peers and forwarded as [`WorkerEvent::AudioVolumes`] messages.
    pub async fn new(
        id: RoomId,
        worker: &Worker,
        media_codecs: Vec<RtpCodecCapability>,
        observer_config: AudioObserverConfig,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self, SignalError> {
        let router = worker
            .create_router(RouterOptions::new(media_codecs))
            .await
            .map_err(SignalError::worker)?;
        let audio_level_observer = router
            .create_audio_level_observer(observer_config.observer_options())
            .await
            .map_err(SignalError::worker)?;

        let volumes_handler = audio_level_observer.on_volumes({
            let room_id = id.clone();
            move |volumes| {
                let volumes = volumes
                    .iter()
                    .filter_map(|entry| {
                        let peer_id = entry.producer.app_data().downcast_ref::<PeerId>()?;
                        Some((peer_id.clone(), entry.volume))
                    })
                    .collect::<Vec<_>>();
                if !volumes.is_empty() {
                    let _ = events_tx.send(WorkerEvent::AudioVolumes {
                        room_id: room_id.clone(),
                        volumes,
                    });
                }
            }
        });

        log::debug!("+room {} (router {})", id, router.id());
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    peers: HashMap::new(),
                }),
                id,
                router,
                audio_level_observer,
                _volumes_handler: volumes_handler,
            }),
        })
    }

    pub fn id(&self) -> RoomId {
        self.shared.id.clone()
    }
    pub fn router(&self) -> &Router {
        &self.shared.router
    }
    pub fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized {
        self.shared.router.rtp_capabilities().clone()
    }
    pub fn downgrade(&self) -> WeakRoom {
        WeakRoom {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Registers an audio producer with the loudest-speaker observer. The
    /// worker drops it from the observer automatically when it closes.
    pub async fn observe_audio_producer(&self, producer_id: ProducerId) -> Result<(), SignalError> {
        self.shared
            .audio_level_observer
            .add_producer(RtpObserverAddProducerOptions::new(producer_id))
            .await
            .map_err(SignalError::worker)
    }

    pub(crate) fn add_peer(&self, peer: Peer) {
        let mut state = self.shared.state.lock().unwrap();
        state.peers.insert(peer.id(), peer);
    }
    pub(crate) fn remove_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        let mut state = self.shared.state.lock().unwrap();
        state.peers.remove(peer_id)
    }
    pub fn get_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        let state = self.shared.state.lock().unwrap();
        state.peers.get(peer_id).cloned()
    }
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.peers.is_empty()
    }

    /// Snapshot of current peers, minus an optional excluded origin.
    pub fn peers_except(&self, except: Option<&PeerId>) -> Vec<Peer> {
        let state = self.shared.state.lock().unwrap();
        state
            .peers
            .values()
            .filter(|peer| Some(&peer.id()) != except)
            .cloned()
            .collect()
    }

    /// Locates a producer among this room's peers, returning its owner and
    /// advertised metadata.
    pub fn find_producer(
        &self,
        producer_id: &ProducerId,
    ) -> Option<(Peer, MediaKind, MediaSource)> {
        let peers = self.peers_except(None);
        peers.into_iter().find_map(|peer| {
            let (kind, source) = peer.producer_meta(producer_id)?;
            Some((peer, kind, source))
        })
    }

    /// Fire-and-forget fan-out to every peer except (optionally) the origin.
    /// Sends to closed connections are silently dropped.
    pub fn broadcast(&self, message: &ServerMessage, except: Option<&PeerId>) {
        for peer in self.peers_except(except) {
            peer.notify(message);
        }
    }
}

impl WeakRoom {
    pub fn upgrade(&self) -> Option<Room> {
        let shared = self.shared.upgrade()?;
        Some(Room { shared })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Router and observer handles close with their last owner, which is
        // this room.
        log::debug!("-room {}", self.id);
    }
}
