use std::net::IpAddr;
use std::num::{NonZeroU16, NonZeroU32, NonZeroU8};
use std::ops::RangeInclusive;

use mediasoup::audio_level_observer::AudioLevelObserverOptions;
use mediasoup::types::data_structures::{ListenInfo, Protocol};
use mediasoup::producer::ProducerId;
use mediasoup::types::rtp_parameters::{
    MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtpCodecCapability, RtpCodecParametersParameters,
};
use mediasoup::webrtc_transport::{WebRtcTransportListenInfos, WebRtcTransportOptions};
use mediasoup::worker::WorkerSettings;

use crate::peer::PeerId;
use crate::room::RoomId;

/// Bitrate hint handed to the worker when a transport is created. Clients
/// ramp up from here once congestion control has had a look at the link.
const INITIAL_AVAILABLE_OUTGOING_BITRATE: u32 = 800_000;

pub fn worker_settings(rtc_ports_range: RangeInclusive<u16>) -> WorkerSettings {
    let mut settings = WorkerSettings::default();
    settings.rtc_port_range = rtc_ports_range;
    settings
}

/// Codecs every router in this process advertises: Opus for audio, VP8 for
/// video. Clients negotiate a compatible subset through `rtpCapabilities`.
pub fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1u32.into())]),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
    ]
}

/// Where WebRTC transports listen and what address they announce to clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_ip: IpAddr,
    pub announced_ip: Option<String>,
}

impl TransportConfig {
    pub fn webrtc_transport_options(&self) -> WebRtcTransportOptions {
        let udp_info = ListenInfo {
            protocol: Protocol::Udp,
            ip: self.listen_ip,
            announced_address: self.announced_ip.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        };
        let tcp_info = ListenInfo {
            protocol: Protocol::Tcp,
            ip: self.listen_ip,
            announced_address: self.announced_ip.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        };

        let mut transport_options =
            WebRtcTransportOptions::new(WebRtcTransportListenInfos::new(udp_info).insert(tcp_info));
        transport_options.enable_udp = true;
        transport_options.enable_tcp = true;
        transport_options.prefer_udp = true;
        transport_options.initial_available_outgoing_bitrate = INITIAL_AVAILABLE_OUTGOING_BITRATE;
        transport_options
    }
}

/// Cadence and threshold of the per-room loudest-speaker observer.
#[derive(Debug, Copy, Clone)]
pub struct AudioObserverConfig {
    /// Reporting interval in milliseconds.
    pub interval: u16,
    /// Minimum average volume in dB below which a producer is silent.
    pub threshold: i8,
}

impl Default for AudioObserverConfig {
    fn default() -> Self {
        Self {
            interval: 800,
            threshold: -80,
        }
    }
}

impl AudioObserverConfig {
    pub fn observer_options(&self) -> AudioLevelObserverOptions {
        let mut options = AudioLevelObserverOptions::default();
        // Top-1 only; the fan-out is a "who is speaking" hint, not a mixer.
        options.max_entries = NonZeroU16::new(1).unwrap();
        options.threshold = self.threshold;
        options.interval = self.interval;
        options
    }
}

/// Worker-initiated events, translated from mediasoup callbacks into
/// messages so all mutation happens on the relay server's event pump rather
/// than on the worker's callback threads. Events carry ids, not handles;
/// the pump re-resolves them under the registry lock so a raced teardown is
/// a no-op.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A producer's underlying transport closed out from under it.
    ProducerTransportClosed {
        peer_id: PeerId,
        producer_id: ProducerId,
    },
    /// The upstream producer of one of `peer_id`'s consumers closed.
    ConsumerProducerClosed {
        peer_id: PeerId,
        producer_id: ProducerId,
    },
    /// Periodic loudest-speaker report for a room, already mapped from
    /// producer `appData` to owning peers.
    AudioVolumes {
        room_id: RoomId,
        volumes: Vec<(PeerId, i8)>,
    },
}
