use signaling_service::app::App;
use signaling_service::app_config::AppConfig;
use signaling_service::common::logging::setup_tracing_subscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Another crate may have installed a provider already; either is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = AppConfig::new()?;
    setup_tracing_subscriber(&config)?;
    tracing::debug!(?config, "Loaded configuration");

    App::new(config).run().await
}
