use riffy::{
    GuildId, Riffy, RiffyEvent,
    common::{
        banner::{BannerInfo, print_banner},
        logger,
        types::AnyResult,
    },
    configs::Config,
};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Connects the configured nodes and logs what they report until ctrl-c.
#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);
    print_banner(&BannerInfo::new(
        config.nodes.len(),
        config.client.rest_version.as_str(),
    ));

    let user_id = config
        .client
        .user_id
        .or_else(|| std::env::var("RIFFY_USER_ID").ok()?.parse().ok())
        .ok_or("set client.user_id or RIFFY_USER_ID")?;

    // no gateway here; voice payloads are only logged
    let (riffy, mut events) = Riffy::builder(config, |guild: &GuildId, payload: Value| {
        debug!("[{}] Gateway payload: {}", guild, payload);
    })
    .build();
    riffy.init(user_id).await?;

    let mut report = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = report.tick() => log_nodes(&riffy),
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    riffy.shutdown().await;
    Ok(())
}

fn log_nodes(riffy: &Riffy) {
    for node in riffy.nodes() {
        if !node.is_connected() {
            info!("[{}] Offline", node.name());
            continue;
        }
        let stats = node.stats();
        info!(
            "[{}] players {}/{}, penalty {}, {} REST calls",
            node.name(),
            stats.playing_players,
            stats.players,
            node.penalty(),
            node.rest().calls()
        );
    }
}

fn log_event(event: &RiffyEvent) {
    match event {
        RiffyEvent::NodeConnect { node } => info!("[{}] Connected", node),
        RiffyEvent::NodeReconnect { node, attempt } => {
            warn!("[{}] Reconnecting (attempt {})", node, attempt)
        }
        RiffyEvent::NodeDisconnect { node, code, reason } => {
            warn!("[{}] Disconnected ({}): {}", node, code, reason)
        }
        RiffyEvent::NodeError { node, error } => error!("[{}] {}", node, error),
        RiffyEvent::NodeDestroy { node } => warn!("[{}] Destroyed", node),
        RiffyEvent::Debug(message) => debug!("{}", message),
        other => info!("{}", other.name()),
    }
}
