use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::app_config::AppConfig;

pub fn create_server_config(
    // AppConfig will probably be used when new options are added
    _app_config: &AppConfig,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> anyhow::Result<RustlsConfig> {
    let mut server_crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    // Voice WebSocket upgrades are served over HTTP/1.1 only.
    server_crypto.alpn_protocols = vec![b"http/1.1".to_vec()];
    tracing::debug!("Created TLS server config");
    Ok(RustlsConfig::from_config(Arc::new(server_crypto)))
}
