//! TLS configuration loaders.
//!
//! Two ways to produce a [`rustls::ServerConfig`]: from a PEM certificate
//! chain and private key on disk, or from a freshly generated self-signed
//! certificate for hosts that have no CA-issued material. Both enforce
//! TLS 1.2 as the protocol floor.
//!
//! The server never holds a config directly; it holds a *loader*, a callable
//! producing a fresh config on every invocation. That indirection is what
//! makes SIGHUP certificate rotation possible without a restart.

use std::fs;
use std::io::{self, BufReader};
use std::path::Path;

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

/// Failure to produce a TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
    #[error("certificate generation: {0}")]
    Gen(#[from] rcgen::Error),
    #[error("no certificate found in PEM file")]
    NoCertificate,
    #[error("no private key found in PEM file")]
    NoPrivateKey,
}

/// Loads a certificate chain and private key from PEM files.
pub fn load(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let mut cert_reader = BufReader::new(fs::File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }

    let mut key_reader = BufReader::new(fs::File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or(TlsError::NoPrivateKey)?;

    config_with(certs, key)
}

/// Generates a temporary self-signed certificate for `host`, valid from now
/// for `validity_days` days, and builds a config around it.
pub fn self_signed(host: &str, validity_days: i64) -> Result<ServerConfig, TlsError> {
    let mut params = rcgen::CertificateParams::new(vec![host.to_owned()])?;
    params.distinguished_name.push(rcgen::DnType::CommonName, host);

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(validity_days);

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());

    config_with(vec![cert.der().clone()], PrivateKeyDer::Pkcs8(key))
}

fn config_with(
    certs: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, TlsError> {
    let config = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn self_signed_builds_a_config() {
        self_signed("localhost", 1).expect("self-signed config");
    }

    #[test]
    fn load_round_trips_generated_pem() {
        let params = rcgen::CertificateParams::new(vec!["localhost".to_owned()]).unwrap();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        fs::File::create(&cert_path)
            .unwrap()
            .write_all(cert.pem().as_bytes())
            .unwrap();
        fs::File::create(&key_path)
            .unwrap()
            .write_all(key_pair.serialize_pem().as_bytes())
            .unwrap();

        load(&cert_path, &key_path).expect("config from PEM files");
    }

    #[test]
    fn load_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pem");
        assert!(matches!(load(&missing, &missing), Err(TlsError::Io(_))));
    }
}
