//! TLS material for the production listener. Files ending in `.der` are read
//! raw, anything else is parsed as PEM.

use std::fs;
use std::path::Path;

use anyhow::Context;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, pem::PemObject};

use crate::app_config::AppConfig;

pub fn load_certs(
    config: &AppConfig,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    tracing::debug!(cert = ?config.cert, key = ?config.key, "Loading TLS material");
    let key = load_private_key(&config.key)?;
    let chain = load_cert_chain(&config.cert)?;
    tracing::info!(certificates = chain.len(), "Loaded certificate chain");
    Ok((chain, key))
}

fn is_der(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "der")
}

fn load_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    if is_der(path) {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read private key {}", path.display()))?;
        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(bytes)));
    }
    PrivateKeyDer::from_pem_file(path)
        .with_context(|| format!("no PEM private key in {}", path.display()))
}

fn load_cert_chain(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    if is_der(path) {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read certificate {}", path.display()))?;
        return Ok(vec![CertificateDer::from(bytes)]);
    }
    let chain = CertificateDer::pem_file_iter(path)
        .with_context(|| format!("failed to open certificate chain {}", path.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid PEM certificate in {}", path.display()))?;
    anyhow::ensure!(!chain.is_empty(), "no certificates in {}", path.display());
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_file(suffix: &str, contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn der_files_are_taken_verbatim() {
        let cert = temp_file(".der", &[0x30, 0x03, 0x02, 0x01, 0x01]);
        let chain = load_cert_chain(cert.path()).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].to_vec(), vec![0x30, 0x03, 0x02, 0x01, 0x01]);

        let key = temp_file(".der", &[1, 2, 3]);
        let key = load_private_key(key.path()).unwrap();
        assert_eq!(key.secret_der().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let cert = temp_file(".pem", b"not a certificate\n");
        assert!(load_cert_chain(cert.path()).is_err());
        assert!(load_private_key(cert.path()).is_err());
    }

    #[test]
    fn missing_files_name_the_path() {
        let error = load_cert_chain(Path::new("/nonexistent/chain.der")).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/chain.der"));
    }
}
