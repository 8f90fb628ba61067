use derive_more::Display;
use futures::{SinkExt, StreamExt};
use mediasoup::consumer::ConsumerOptions;
use mediasoup::types::data_structures::AppData;
use mediasoup::producer::{ProducerId, ProducerOptions};
use mediasoup::types::rtp_parameters::MediaKind;
use mediasoup::transport::{Transport, TransportId};
use mediasoup::webrtc_transport::WebRtcTransportRemoteParameters;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::media::WorkerEvent;
use crate::messages::{ClientRequest, ErrorResponse, MediaSource, ServerMessage};
use crate::peer::{ConnectionState, ConsumerRecord, ProducerRecord};
use crate::relay_server::{RelayServer, SignalError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Display, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half of one client's signaling stream. Frames queued here are
/// drained by a per-connection writer task, so responses and notifications
/// share one ordered queue.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame. A send to a connection whose writer is gone is a
    /// silent no-op; the disconnect handler owns that peer's teardown.
    pub fn send<T: Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(text) => {
                if self.tx.send(Message::text(text)).is_err() {
                    log::trace!("dropped frame for closed connection {}", self.id);
                }
            }
            Err(err) => log::warn!("failed to serialize frame: {}", err),
        }
    }
}

/// Serves one client for the lifetime of its socket: requests are handled
/// strictly in arrival order, the peer is torn down when the socket goes
/// away for any reason.
pub async fn handle_connection(server: RelayServer, websocket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = websocket.split();
    let (conn, rx) = Connection::new();
    log::trace!("+conn {}", conn.id());

    tokio::spawn(async move {
        let mut frames = UnboundedReceiverStream::new(rx);
        while let Some(message) = frames.next().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                log::debug!("conn {} i/o error: {}", conn.id(), err);
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };
        dispatch(&server, &conn, text).await;
    }

    server.cleanup_connection(conn.id()).await;
    log::trace!("-conn {}", conn.id());
}

/// Parses one frame and produces exactly one response frame for it. The
/// `reqId` is lifted from the envelope before typed deserialization so even
/// a malformed payload gets a correlated error.
pub async fn dispatch(server: &RelayServer, conn: &Connection, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            conn.send(&ErrorResponse {
                req_id: None,
                error: SignalError::InvalidRequest(err.to_string()).to_string(),
            });
            return;
        }
    };
    let req_id = value
        .get("reqId")
        .and_then(|req_id| req_id.as_str())
        .map(String::from);
    let request = match serde_json::from_value::<ClientRequest>(value) {
        Ok(request) => request,
        Err(err) => {
            conn.send(&ErrorResponse {
                req_id,
                error: SignalError::InvalidRequest(err.to_string()).to_string(),
            });
            return;
        }
    };
    if let Err(err) = handle_request(server, conn, req_id.clone(), request).await {
        conn.send(&ErrorResponse {
            req_id,
            error: err.to_string(),
        });
    }
}

/// Routes a request to its handler. Every `Ok` path has already queued the
/// response (and only then any notifications it caused); every `Err` is
/// recovered into an error frame by [`dispatch`].
async fn handle_request(
    server: &RelayServer,
    conn: &Connection,
    req_id: Option<String>,
    request: ClientRequest,
) -> Result<(), SignalError> {
    match request {
        ClientRequest::CreateRoom { id } => {
            server.get_or_create_room(id).await?;
            conn.send(&ServerMessage::CreateRoomResponse {
                req_id,
                success: true,
            });
            Ok(())
        }

        ClientRequest::JoinRoom {
            room_id,
            peer_id,
            display_name,
        } => {
            let joined = server
                .join_room(conn, room_id, peer_id, display_name)
                .await?;
            conn.send(&ServerMessage::JoinRoomResponse {
                req_id,
                rtp_capabilities: joined.room.rtp_capabilities(),
                peers: joined.peers,
                producers: joined.producers,
            });
            joined.peer.set_connection_state(ConnectionState::Connected);

            let notification = ServerMessage::PeerJoined {
                peer_id: joined.peer.id(),
                display_name: joined.peer.display_name(),
            };
            for other in &joined.others {
                other.notify(&notification);
            }
            Ok(())
        }

        ClientRequest::CreateWebRtcTransport { direction } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let room = peer.room().upgrade().ok_or(SignalError::RoomNotFound)?;
            let transport = room
                .router()
                .create_webrtc_transport(server.options().transport.webrtc_transport_options())
                .await
                .map_err(SignalError::worker)?;
            peer.set_transport(direction, transport.clone())?;
            conn.send(&ServerMessage::CreateWebRtcTransportResponse {
                req_id,
                id: transport.id(),
                ice_parameters: transport.ice_parameters().clone(),
                ice_candidates: transport.ice_candidates().clone(),
                dtls_parameters: transport.dtls_parameters(),
                sctp_parameters: transport.sctp_parameters(),
            });
            Ok(())
        }

        ClientRequest::ConnectWebRtcTransport {
            transport_id,
            dtls_parameters,
        } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let transport_id = transport_id
                .parse::<TransportId>()
                .map_err(|_| SignalError::TransportNotFound)?;
            let transport = peer
                .transport_by_id(transport_id)
                .ok_or(SignalError::TransportNotFound)?;
            transport
                .connect(WebRtcTransportRemoteParameters { dtls_parameters })
                .await
                .map_err(SignalError::worker)?;
            conn.send(&ServerMessage::ConnectWebRtcTransportResponse {
                req_id,
                connected: true,
            });
            Ok(())
        }

        ClientRequest::Produce {
            kind,
            rtp_parameters,
            source,
        } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let transport = peer.send_transport().ok_or(SignalError::NoSendTransport)?;
            let room = peer.room().upgrade().ok_or(SignalError::RoomNotFound)?;
            let source = source.unwrap_or_else(|| MediaSource::default_for(kind));

            let mut producer_options = ProducerOptions::new(kind, rtp_parameters);
            // Volume reports only carry the producer, so the owner rides
            // along in appData.
            producer_options.app_data = AppData::new(peer.id());
            let producer = transport
                .produce(producer_options)
                .await
                .map_err(SignalError::worker)?;
            if kind == MediaKind::Audio {
                // On failure the producer drops here, rolling back the
                // half-created state before the error frame goes out.
                room.observe_audio_producer(producer.id()).await?;
            }

            let transport_close_handler = producer.on_transport_close({
                let events_tx = server.events_tx();
                let peer_id = peer.id();
                let producer_id = producer.id();
                move || {
                    let _ = events_tx.send(WorkerEvent::ProducerTransportClosed {
                        peer_id,
                        producer_id,
                    });
                }
            });

            let id = producer.id();
            let recipients = server
                .register_producer(
                    &peer,
                    ProducerRecord {
                        producer,
                        source,
                        paused: false,
                        muted: false,
                        _transport_close_handler: transport_close_handler,
                    },
                )
                .await?;

            conn.send(&ServerMessage::ProduceResponse { req_id, id });
            let notification = ServerMessage::NewProducer {
                id,
                peer_id: peer.id(),
                kind,
                source,
                display_name: peer.display_name(),
            };
            for other in &recipients {
                other.notify(&notification);
            }
            Ok(())
        }

        ClientRequest::Consume {
            producer_id,
            rtp_capabilities,
        } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let transport = peer.recv_transport().ok_or(SignalError::NoRecvTransport)?;
            let room = peer.room().upgrade().ok_or(SignalError::RoomNotFound)?;
            let producer_id = producer_id
                .parse::<ProducerId>()
                .map_err(|_| SignalError::ProducerNotFound)?;
            let (upstream, kind, source) = room
                .find_producer(&producer_id)
                .ok_or(SignalError::ProducerNotFound)?;
            if upstream.id() == peer.id() {
                return Err(SignalError::SelfConsume);
            }
            if !room.router().can_consume(&producer_id, &rtp_capabilities) {
                return Err(SignalError::CannotConsume);
            }

            let consumer = transport
                .consume(ConsumerOptions::new(producer_id, rtp_capabilities))
                .await
                .map_err(SignalError::worker)?;
            let producer_close_handler = consumer.on_producer_close({
                let events_tx = server.events_tx();
                let peer_id = peer.id();
                move || {
                    let _ = events_tx.send(WorkerEvent::ConsumerProducerClosed {
                        peer_id,
                        producer_id,
                    });
                }
            });

            let response = ServerMessage::ConsumeResponse {
                req_id,
                id: consumer.id(),
                producer_id,
                kind,
                rtp_parameters: consumer.rtp_parameters().clone(),
                peer_id: upstream.id(),
                display_name: upstream.display_name(),
                source,
            };
            peer.insert_consumer(
                producer_id,
                ConsumerRecord {
                    consumer,
                    peer_id: upstream.id(),
                    _producer_close_handler: producer_close_handler,
                },
            )?;
            conn.send(&response);
            Ok(())
        }

        ClientRequest::PauseProducer { producer_id } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let producer_id = producer_id
                .parse::<ProducerId>()
                .map_err(|_| SignalError::ProducerNotFound)?;
            let producer = peer
                .producer_handle(&producer_id)
                .ok_or(SignalError::ProducerNotFound)?;
            producer.pause().await.map_err(SignalError::worker)?;
            peer.set_producer_paused(&producer_id, true);
            conn.send(&ServerMessage::PauseProducerResponse {
                req_id,
                success: true,
            });
            Ok(())
        }

        ClientRequest::ResumeProducer { producer_id } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let producer_id = producer_id
                .parse::<ProducerId>()
                .map_err(|_| SignalError::ProducerNotFound)?;
            let producer = peer
                .producer_handle(&producer_id)
                .ok_or(SignalError::ProducerNotFound)?;
            producer.resume().await.map_err(SignalError::worker)?;
            peer.set_producer_paused(&producer_id, false);
            conn.send(&ServerMessage::ResumeProducerResponse {
                req_id,
                success: true,
            });
            Ok(())
        }

        ClientRequest::SetProducerMuted { producer_id, muted } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let producer_id = producer_id
                .parse::<ProducerId>()
                .map_err(|_| SignalError::ProducerNotFound)?;
            if !peer.set_producer_muted(&producer_id, muted) {
                return Err(SignalError::ProducerNotFound);
            }
            conn.send(&ServerMessage::SetProducerMutedResponse {
                req_id,
                success: true,
            });
            if let Some(room) = peer.room().upgrade() {
                room.broadcast(
                    &ServerMessage::ProducerMuted { producer_id, muted },
                    Some(&peer.id()),
                );
            }
            Ok(())
        }

        ClientRequest::CloseProducer { producer_id } => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            let producer_id = producer_id
                .parse::<ProducerId>()
                .map_err(|_| SignalError::ProducerNotFound)?;
            let record = peer
                .remove_producer(&producer_id)
                .ok_or(SignalError::ProducerNotFound)?;
            drop(record);
            conn.send(&ServerMessage::CloseProducerResponse {
                req_id,
                success: true,
            });
            if let Some(room) = peer.room().upgrade() {
                room.broadcast(
                    &ServerMessage::ProducerClosed {
                        peer_id: peer.id(),
                        producer_id,
                    },
                    Some(&peer.id()),
                );
            }
            Ok(())
        }

        ClientRequest::LeaveRoom => {
            let peer = server
                .peer_for_conn(conn.id())
                .await
                .ok_or(SignalError::PeerNotFound)?;
            conn.send(&ServerMessage::LeaveRoomResponse {
                req_id,
                success: true,
            });
            server.cleanup_peer(&peer.id()).await;
            Ok(())
        }

        ClientRequest::Unknown => {
            conn.send(&ServerMessage::Pong { req_id });
            Ok(())
        }
    }
}
