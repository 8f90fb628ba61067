use clap::Parser;
use mediasoup::worker_manager::WorkerManager;
use warp::Filter;

use huddle_relay::cmdline::Opts;
use huddle_relay::media::{self, AudioObserverConfig, TransportConfig};
use huddle_relay::relay_server::{RelayServer, RelayServerOptions};
use huddle_relay::signaling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let worker_manager = WorkerManager::new();
    let worker = worker_manager
        .create_worker(media::worker_settings(
            opts.rtc_port_min..=opts.rtc_port_max,
        ))
        .await?;

    let relay_server = RelayServer::new(
        worker,
        RelayServerOptions {
            transport: TransportConfig {
                listen_ip: opts.rtc_ip,
                announced_ip: Some(opts.rtc_announce_ip),
            },
            media_codecs: media::media_codecs(),
            audio_observer: AudioObserverConfig {
                interval: opts.audio_level_interval,
                threshold: opts.audio_level_threshold,
            },
        },
    );

    let routes = warp::path("ws").and(warp::ws()).map(move |ws: warp::ws::Ws| {
        let relay_server = relay_server.clone();
        ws.on_upgrade(move |websocket| signaling::handle_connection(relay_server, websocket))
    });

    log::info!("listening on {}", opts.listen_addr);
    warp::serve(routes.with(warp::log("huddle-relay")))
        .run(opts.listen_addr)
        .await;
    Ok(())
}
