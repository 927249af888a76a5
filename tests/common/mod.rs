//! Shared utilities for the wire-level integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use capsa::{tls, ArcHandler, Server, ShutdownHandle};

/// Certificate verifier that accepts anything. The servers under test run on
/// self-signed certificates.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

pub fn insecure_client() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Arc::new(config)
}

/// A running server on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ShutdownHandle,
}

/// Spawns a server with a self-signed certificate for `localhost`.
pub async fn spawn_server(handler: ArcHandler, max_conns: usize) -> TestServer {
    let server = Server::new(
        "127.0.0.1:0".parse().unwrap(),
        "localhost",
        || tls::self_signed("localhost", 1),
        handler,
    )
    .read_timeout(Duration::from_secs(2))
    .max_conns(max_conns);

    let handle = server.handle();
    tokio::spawn(server.run());

    let addr = handle.bound_addr().await.expect("server bound");
    TestServer { addr, handle }
}

/// Sends one raw request line and reads the whole response off the wire.
pub async fn gemini_request(addr: SocketAddr, line: &str) -> Vec<u8> {
    let connector = TlsConnector::from(insecure_client());
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let name = ServerName::try_from("localhost".to_owned()).unwrap();
    let mut stream = connector.connect(name, tcp).await.expect("tls handshake");

    stream.write_all(line.as_bytes()).await.expect("send request");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read response");
    response
}
