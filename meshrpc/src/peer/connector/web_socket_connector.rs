use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use log::debug;
use rustls::{
    ClientConfig,
    SignatureScheme,
    client::danger::{
        HandshakeSignatureValid,
        ServerCertVerified,
        ServerCertVerifier,
    },
    crypto::CryptoProvider,
    pki_types::{
        CertificateDer,
        ServerName,
        UnixTime,
    },
};
use tokio_tungstenite::connect_async_tls_with_config;

use crate::{
    core::error::TransportError,
    peer::{
        connector::connector::Connector,
        proxy::ProxyConfig,
    },
    transport::{
        transport::Transport,
        web_socket_transport::WebSocketTransport,
    },
};

/// A certificate verifier that accepts any server certificate.
///
/// Installed only when the caller explicitly disables TLS verification for a
/// session.
#[derive(Debug)]
struct AcceptAnyServerCert(CryptoProvider);

impl ServerCertVerifier for AcceptAnyServerCert {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A [`Connector`] for WebSocket connections.
#[derive(Debug, Default)]
pub struct WebSocketConnector {}

impl WebSocketConnector {
    fn url(config: &ProxyConfig) -> String {
        let scheme = if config.tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}{}",
            config.host, config.port, config.path
        )
    }

    fn tls_connector(config: &ProxyConfig) -> Option<tokio_tungstenite::Connector> {
        if !config.tls || config.tls_verify {
            return None;
        }
        let client_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(
                rustls::crypto::ring::default_provider(),
            )))
            .with_no_client_auth();
        Some(tokio_tungstenite::Connector::Rustls(Arc::new(client_config)))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, config: &ProxyConfig) -> Result<Box<dyn Transport>> {
        let url = Self::url(config);
        debug!("connecting to {url}");
        let (stream, _) =
            connect_async_tls_with_config(url.as_str(), None, false, Self::tls_connector(config))
                .await
                .map_err(|err| {
                    Error::new(err).context(TransportError::Unreachable {
                        host: config.host.clone(),
                        port: config.port,
                    })
                })?;
        Ok(Box::new(WebSocketTransport::new(stream)))
    }
}
