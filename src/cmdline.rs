use std::net::{IpAddr, SocketAddr};

use clap::Parser;

#[derive(Parser)]
#[clap(name = "huddle-relay", version, about = "SFU signaling relay")]
pub struct Opts {
    /// Address the signaling WebSocket listens on.
    #[clap(long, default_value = "0.0.0.0:4001")]
    pub listen_addr: SocketAddr,
    /// Local IP WebRTC transports bind to.
    #[clap(long, default_value = "0.0.0.0")]
    pub rtc_ip: IpAddr,
    /// IP announced to clients in ICE candidates.
    #[clap(long, default_value = "127.0.0.1")]
    pub rtc_announce_ip: String,
    #[clap(long, default_value_t = 40000)]
    pub rtc_port_min: u16,
    #[clap(long, default_value_t = 49999)]
    pub rtc_port_max: u16,
    /// Loudest-speaker report interval in milliseconds.
    #[clap(long, default_value_t = 800)]
    pub audio_level_interval: u16,
    /// Volume threshold in dB below which a speaker counts as silent.
    #[clap(long, default_value_t = -80, allow_hyphen_values = true)]
    pub audio_level_threshold: i8,
}
