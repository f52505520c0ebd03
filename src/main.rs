use tokio_util::sync::CancellationToken;

mod config;
mod player;
mod sim;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = config::config();
    log::info!("{:?}", config);

    let cancel = CancellationToken::new();
    let player = player::Player::new(config.clone())?;

    let cancel_clone = cancel.clone();
    let mut playback = tokio::spawn(async move { player.run(cancel_clone).await });

    let summary = loop {
        tokio::select! {
            result = &mut playback => {
                break result??;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, stopping playback");
                cancel.cancel();
            },
        }
    };

    println!(
        "delivered: audio {}, video {}",
        summary.delivered[es_transfer::StreamType::Audio.index()],
        summary.delivered[es_transfer::StreamType::Video.index()]
    );
    Ok(())
}
