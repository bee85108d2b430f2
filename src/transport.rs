//! Async transport: TCP with optional TLS, framed with [`IrcCodec`].
//!
//! The transport owns the socket and hands parsed [`Message`]s up to the
//! client loop. Ordering is preserved in both directions; partial reads
//! accumulate inside the codec's buffer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::error::{self, ProtocolError};
use crate::irc::IrcCodec;
use crate::message::Message;

/// TLS options for [`Transport::connect`].
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Verify the peer certificate against the platform trust roots.
    pub verify: bool,
    /// PEM file with the client certificate chain.
    pub client_cert: Option<PathBuf>,
    /// PEM file with the client private key. Defaults to `client_cert`
    /// when unset (combined PEM).
    pub client_cert_key: Option<PathBuf>,
    /// Passphrase for an encrypted client key.
    pub client_cert_password: Option<String>,
}

/// A connected IRC transport.
pub enum Transport {
    /// Plain TCP.
    Tcp(Framed<TcpStream, IrcCodec>),
    /// TLS over TCP.
    Tls(Framed<TlsStream<TcpStream>, IrcCodec>),
}

impl Transport {
    /// Connect to `host:port`, optionally with TLS, and frame the stream
    /// with the given encoding label.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsConfig>,
        encoding: &str,
    ) -> error::Result<Transport> {
        let codec = IrcCodec::new(encoding)?;
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        match tls {
            None => Ok(Transport::Tcp(Framed::new(stream, codec))),
            Some(tls) => {
                let config = build_tls_config(tls)?;
                let connector = TlsConnector::from(Arc::new(config));
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|e| ProtocolError::Tls(format!("invalid server name: {}", e)))?;
                let stream = connector.connect(server_name, stream).await?;
                debug!(host, port, "tls session established");
                Ok(Transport::Tls(Framed::new(stream, codec)))
            }
        }
    }

    /// Whether this transport runs over TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Read the next message. `Ok(None)` means the peer closed the
    /// connection. Malformed lines never surface here; the codec skips
    /// them.
    pub async fn read_message(&mut self) -> error::Result<Option<Message>> {
        let next = match self {
            Transport::Tcp(framed) => framed.next().await,
            Transport::Tls(framed) => framed.next().await,
        };
        next.transpose()
    }

    /// Send one message. Flushes before returning so wire order equals
    /// call order.
    pub async fn send(&mut self, msg: Message) -> error::Result<()> {
        match self {
            Transport::Tcp(framed) => framed.send(msg).await,
            Transport::Tls(framed) => framed.send(msg).await,
        }
    }

    /// Close the transport.
    pub async fn close(&mut self) -> error::Result<()> {
        match self {
            Transport::Tcp(framed) => framed.close().await,
            Transport::Tls(framed) => framed.close().await,
        }
    }
}

fn build_tls_config(tls: &TlsConfig) -> error::Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    if tls.verify {
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            warn!("could not load a native root certificate: {}", err);
        }
        for cert in native.certs {
            if let Err(err) = roots.add(cert) {
                warn!("rejected native root certificate: {}", err);
            }
        }
        if roots.is_empty() {
            return Err(ProtocolError::Tls("no usable trust roots".to_string()));
        }
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let mut config = match &tls.client_cert {
        Some(cert_path) => {
            if tls.client_cert_password.is_some() {
                return Err(ProtocolError::Tls(
                    "encrypted client keys are not supported; decrypt the PEM first".to_string(),
                ));
            }
            let certs = load_certs(cert_path)?;
            let key_path = tls.client_cert_key.as_ref().unwrap_or(cert_path);
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ProtocolError::Tls(format!("client certificate rejected: {}", e)))?
        }
        None => builder.with_no_client_auth(),
    };

    if !tls.verify {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(danger::NoVerify::new()));
    }

    Ok(config)
}

fn load_certs(path: &Path) -> error::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(ProtocolError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> error::Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| ProtocolError::Tls(format!("no private key found in {}", path.display())))
}

mod danger {
    //! Certificate verifier used when `tls_verify` is off.

    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::crypto::{
        ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider,
    };
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any peer certificate. Handshake signatures are still
    /// checked so the session itself is well-formed.
    #[derive(Debug)]
    pub(super) struct NoVerify {
        provider: CryptoProvider,
    }

    impl NoVerify {
        pub(super) fn new() -> Self {
            Self {
                provider: ring::default_provider(),
            }
        }
    }

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
