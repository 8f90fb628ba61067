use mediasoup::consumer::ConsumerId;
use mediasoup::types::data_structures::{DtlsParameters, IceCandidate, IceParameters};
use mediasoup::producer::ProducerId;
use mediasoup::types::rtp_parameters::{
    MediaKind, RtpCapabilities, RtpCapabilitiesFinalized, RtpParameters,
};
use mediasoup::types::sctp_parameters::SctpParameters;
use mediasoup::transport::TransportId;
use serde::{Deserialize, Serialize};

use crate::peer::{ConnectionState, PeerId};
use crate::room::RoomId;

/// Semantic origin of a producer, independent of codec kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Mic,
    Webcam,
    Screen,
}

impl MediaSource {
    /// Default source when the client omits it on `produce`.
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => MediaSource::Mic,
            MediaKind::Video => MediaSource::Webcam,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// One entry of the `peers` array in a `joinRoom` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: PeerId,
    pub display_name: String,
    pub connection_state: ConnectionState,
}

/// One entry of the `producers` array in a `joinRoom` response.
/// Mirrors the shape of the `newProducer` notification so a joiner and a
/// bystander run the same client code path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub id: ProducerId,
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub source: MediaSource,
    pub display_name: String,
}

/// Client-originated request frames, discriminated on `type`.
///
/// `reqId` is part of the envelope and extracted by the dispatcher before
/// this enum is deserialized; unknown fields (including `reqId`) are ignored
/// here. Ids that must resolve against live state (`producerId`,
/// `transportId`) stay strings so an unresolvable value surfaces as a
/// not-found error rather than a parse error.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    CreateRoom { id: RoomId },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        peer_id: PeerId,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateWebRtcTransport { direction: TransportDirection },
    #[serde(rename_all = "camelCase")]
    ConnectWebRtcTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    #[serde(rename_all = "camelCase")]
    Produce {
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default)]
        source: Option<MediaSource>,
    },
    #[serde(rename_all = "camelCase")]
    Consume {
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },
    #[serde(rename_all = "camelCase")]
    PauseProducer { producer_id: String },
    #[serde(rename_all = "camelCase")]
    ResumeProducer { producer_id: String },
    #[serde(rename_all = "camelCase")]
    SetProducerMuted { producer_id: String, muted: bool },
    #[serde(rename_all = "camelCase")]
    CloseProducer { producer_id: String },
    LeaveRoom,
    /// Anything with an unrecognized `type` is answered with `pong`.
    #[serde(other)]
    Unknown,
}

/// Server-originated frames: correlated responses (carrying `reqId`) and
/// fire-and-forget notifications (no `reqId`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoomResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoomResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        rtp_capabilities: RtpCapabilitiesFinalized,
        peers: Vec<PeerSummary>,
        producers: Vec<ProducerSummary>,
    },
    #[serde(rename_all = "camelCase")]
    CreateWebRtcTransportResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        id: TransportId,
        ice_parameters: IceParameters,
        ice_candidates: Vec<IceCandidate>,
        dtls_parameters: DtlsParameters,
        #[serde(skip_serializing_if = "Option::is_none")]
        sctp_parameters: Option<SctpParameters>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectWebRtcTransportResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        connected: bool,
    },
    #[serde(rename_all = "camelCase")]
    ProduceResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        id: ProducerId,
    },
    #[serde(rename_all = "camelCase")]
    ConsumeResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        peer_id: PeerId,
        display_name: String,
        source: MediaSource,
    },
    #[serde(rename_all = "camelCase")]
    PauseProducerResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    ResumeProducerResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    SetProducerMutedResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    CloseProducerResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoomResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    PeerJoined {
        peer_id: PeerId,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        peer_id: PeerId,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    NewProducer {
        id: ProducerId,
        peer_id: PeerId,
        kind: MediaKind,
        source: MediaSource,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ProducerClosed {
        peer_id: PeerId,
        producer_id: ProducerId,
    },
    #[serde(rename_all = "camelCase")]
    ProducerMuted {
        producer_id: ProducerId,
        muted: bool,
    },
    #[serde(rename_all = "camelCase")]
    AudioLevel { peer_id: PeerId, volume: i8 },
}

/// Error frames carry no `type`, only the echoed `reqId` (when the request
/// had one) and a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    pub error: String,
}
