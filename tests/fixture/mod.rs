use std::num::{NonZeroU32, NonZeroU8};
use std::time::Duration;

use mediasoup::types::data_structures::{DtlsFingerprint, DtlsParameters, DtlsRole};
use mediasoup::types::rtp_parameters::{
    MediaKind, MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpCodecParametersParameters, RtpEncodingParameters,
    RtpHeaderExtension, RtpHeaderExtensionDirection, RtpHeaderExtensionParameters,
    RtpHeaderExtensionUri, RtpParameters,
};
use mediasoup::worker::WorkerSettings;
use mediasoup::worker_manager::WorkerManager;
use tokio::sync::mpsc;
use warp::ws::Message;

use huddle_relay::media::{self, AudioObserverConfig, TransportConfig};
use huddle_relay::relay_server::{RelayServer, RelayServerOptions};
use huddle_relay::signaling::Connection;

pub async fn relay_server() -> RelayServer {
    let worker_manager = WorkerManager::new();
    let worker = worker_manager
        .create_worker(WorkerSettings::default())
        .await
        .unwrap();
    RelayServer::new(
        worker,
        RelayServerOptions {
            transport: TransportConfig {
                listen_ip: "127.0.0.1".parse().unwrap(),
                announced_ip: None,
            },
            media_codecs: media::media_codecs(),
            audio_observer: AudioObserverConfig::default(),
        },
    )
}

pub fn connection() -> (Connection, mpsc::UnboundedReceiver<Message>) {
    Connection::new()
}

/// Next frame on a connection, parsed. Panics if nothing arrives in time so
/// a missing broadcast fails loudly instead of hanging the test.
pub async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    serde_json::from_str(message.to_str().expect("expected text frame"))
        .expect("frame is not valid json")
}

pub fn no_pending_frame(rx: &mut mpsc::UnboundedReceiver<Message>) {
    assert!(
        rx.try_recv().is_err(),
        "expected no pending frame on connection"
    );
}

pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint::Sha256 {
            value: [
                0x82, 0x5A, 0x68, 0x3D, 0x36, 0xC3, 0x0A, 0xDE, 0xAF, 0xE7, 0x32, 0x43, 0xD2, 0x88,
                0x83, 0x57, 0xAC, 0x2D, 0x65, 0xE5, 0x80, 0xC4, 0xB6, 0xFB, 0xAF, 0x1A, 0xA0, 0x21,
                0x9F, 0x6D, 0x0C, 0xAD,
            ],
        }],
    }
}

pub fn audio_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("AUDIO".to_string()),
        codecs: vec![RtpCodecParameters::Audio {
            mime_type: MimeTypeAudio::Opus,
            payload_type: 111,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("useinbandfec", 1u32.into()),
                ("usedtx", 1u32.into()),
            ]),
            rtcp_feedback: vec![],
        }],
        header_extensions: vec![
            RtpHeaderExtensionParameters {
                uri: RtpHeaderExtensionUri::Mid,
                id: 10,
                encrypt: false,
            },
            RtpHeaderExtensionParameters {
                uri: RtpHeaderExtensionUri::AudioLevel,
                id: 12,
                encrypt: false,
            },
        ],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(11111111),
            ..RtpEncodingParameters::default()
        }],
        rtcp: RtcpParameters {
            cname: Some("relayfixture".to_string()),
            ..RtcpParameters::default()
        },
    }
}

/// Webcam simulcast layers as a browser client would offer them.
pub fn webcam_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("VIDEO".to_string()),
        codecs: vec![RtpCodecParameters::Video {
            mime_type: MimeTypeVideo::Vp8,
            payload_type: 96,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::GoogRemb,
            ],
        }],
        header_extensions: vec![
            RtpHeaderExtensionParameters {
                uri: RtpHeaderExtensionUri::Mid,
                id: 10,
                encrypt: false,
            },
            RtpHeaderExtensionParameters {
                uri: RtpHeaderExtensionUri::RtpStreamId,
                id: 2,
                encrypt: false,
            },
        ],
        encodings: vec![
            RtpEncodingParameters {
                rid: Some("r0".to_string()),
                max_bitrate: Some(100_000),
                scalability_mode: "S1T3".parse().unwrap(),
                ..RtpEncodingParameters::default()
            },
            RtpEncodingParameters {
                rid: Some("r1".to_string()),
                max_bitrate: Some(300_000),
                scalability_mode: "S1T3".parse().unwrap(),
                ..RtpEncodingParameters::default()
            },
            RtpEncodingParameters {
                rid: Some("r2".to_string()),
                max_bitrate: Some(900_000),
                scalability_mode: "S1T3".parse().unwrap(),
                ..RtpEncodingParameters::default()
            },
        ],
        rtcp: RtcpParameters {
            cname: Some("relayfixture".to_string()),
            ..RtcpParameters::default()
        },
    }
}

/// Two-layer screen-share encoding hint.
pub fn screen_rtp_parameters() -> RtpParameters {
    let mut rtp_parameters = webcam_rtp_parameters();
    rtp_parameters.mid = Some("SCREEN".to_string());
    rtp_parameters.encodings = vec![
        RtpEncodingParameters {
            rid: Some("r0".to_string()),
            max_bitrate: Some(1_500_000),
            ..RtpEncodingParameters::default()
        },
        RtpEncodingParameters {
            rid: Some("r1".to_string()),
            max_bitrate: Some(4_500_000),
            ..RtpEncodingParameters::default()
        },
    ];
    rtp_parameters
}

/// Capabilities of a consuming endpoint compatible with the router codecs.
pub fn consumer_device_capabilities() -> RtpCapabilities {
    let mut capabilities = RtpCapabilities::default();
    capabilities.codecs = vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: Some(100),
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: Some(101),
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
            ],
        },
    ];
    capabilities.header_extensions = vec![
        RtpHeaderExtension {
            kind: MediaKind::Audio,
            uri: RtpHeaderExtensionUri::Mid,
            preferred_id: 1,
            preferred_encrypt: false,
            direction: RtpHeaderExtensionDirection::default(),
        },
        RtpHeaderExtension {
            kind: MediaKind::Video,
            uri: RtpHeaderExtensionUri::Mid,
            preferred_id: 1,
            preferred_encrypt: false,
            direction: RtpHeaderExtensionDirection::default(),
        },
        RtpHeaderExtension {
            kind: MediaKind::Video,
            uri: RtpHeaderExtensionUri::RtpStreamId,
            preferred_id: 2,
            preferred_encrypt: false,
            direction: RtpHeaderExtensionDirection::default(),
        },
        RtpHeaderExtension {
            kind: MediaKind::Audio,
            uri: RtpHeaderExtensionUri::AudioLevel,
            preferred_id: 10,
            preferred_encrypt: false,
            direction: RtpHeaderExtensionDirection::default(),
        },
    ];
    capabilities
}
