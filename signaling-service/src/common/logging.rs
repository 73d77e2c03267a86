use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt};

use crate::app_config::AppConfig;

pub fn setup_tracing_subscriber(config: &AppConfig) -> anyhow::Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(true)
        .with_filter(LevelFilter::from_level(config.get_log_level()));

    // Only useful when built with RUSTFLAGS="--cfg tokio_unstable".
    let console_layer = config.tokio_console.then(|| {
        console_subscriber::ConsoleLayer::builder()
            .with_default_env()
            .spawn()
    });

    let registry = tracing_subscriber::registry()
        .with(console_layer)
        .with(stdout_layer);

    tracing::subscriber::set_global_default(registry)?;

    tracing::debug!("Set up tracing subscriber");
    Ok(())
}
