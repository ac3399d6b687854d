//! The raw byte-stream underneath a [`Connection`](super::Connection): plain TCP, or TLS over
//! TCP. Both variants are blocking; all timeout discipline lives one layer up in
//! [`Connection`](super::Connection), which wraps every read/write in `set_read_timeout`/
//! `set_write_timeout`.

use std::{
    io::{self, Read, Write},
    net::TcpStream,
    sync::Arc,
    time::Duration,
};

use crate::{
    error::{Error, Result},
    options::{ServerAddress, TlsOptions},
};

/// Either a bare TCP socket or a TLS session layered over one.
pub(super) enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Stream {
    /// Opens a TCP connection to `address`, honoring `connect_timeout`, and layers TLS over it
    /// per `tls_options` if given. SNI is always enabled; hostname verification is enabled
    /// unless the application has explicitly disabled both it and certificate verification via
    /// `allow_invalid_certificates`.
    pub(super) fn connect(
        address: &ServerAddress,
        connect_timeout: Option<Duration>,
        tls_options: Option<&TlsOptions>,
    ) -> Result<Self> {
        let tcp = connect_tcp(address, connect_timeout)?;
        tcp.set_nodelay(true)?;

        match tls_options {
            #[cfg(feature = "rustls-tls")]
            Some(opts) => {
                let config = build_rustls_config(opts)?;
                let server_name = rustls::pki_types::ServerName::try_from(address.host.clone())
                    .map_err(|_| {
                        Error::invalid_tls_config(format!(
                            "{} is not a valid DNS name for TLS SNI",
                            address.host
                        ))
                    })?;
                let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
                    .map_err(|e| Error::invalid_tls_config(e.to_string()))?;
                Ok(Stream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp))))
            }
            #[cfg(not(feature = "rustls-tls"))]
            Some(_) => Err(Error::configuration(
                "TLS was requested but this build does not have the rustls-tls feature enabled",
            )),
            None => Ok(Stream::Tcp(tcp)),
        }
    }

    pub(super) fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.tcp_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    pub(super) fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.tcp_ref().set_write_timeout(timeout)?;
        Ok(())
    }

    fn tcp_ref(&self) -> &TcpStream {
        match self {
            Stream::Tcp(s) => s,
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(s) => &s.sock,
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(s) => s.flush(),
        }
    }
}

fn connect_tcp(address: &ServerAddress, connect_timeout: Option<Duration>) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let addrs = (address.host.as_str(), address.port)
        .to_socket_addrs()
        .map_err(|e| Error::network(format!("failed to resolve {}: {}", address, e)))?;

    let mut last_err = None;
    for addr in addrs {
        let result = match connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match result {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err
        .map(Error::from)
        .unwrap_or_else(|| Error::network(format!("no addresses resolved for {}", address))))
}

#[cfg(feature = "rustls-tls")]
fn build_rustls_config(opts: &TlsOptions) -> Result<rustls::ClientConfig> {
    use rustls::{client::danger::ServerCertVerifier, ClientConfig};

    let builder = ClientConfig::builder();

    let mut config = if matches!(opts.allow_invalid_certificates, Some(true)) {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    } else {
        let roots = load_root_store(opts)?;
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    config.alpn_protocols.clear();
    Ok(config)
}

/// Locates the CA bundle: the application-configured path first, falling back to the bundled
/// Mozilla root store (in lieu of scanning the well-known OS bundle paths, which vary too much
/// across platforms to enumerate reliably from a blocking, dependency-light client).
#[cfg(feature = "rustls-tls")]
fn load_root_store(opts: &TlsOptions) -> Result<rustls::RootCertStore> {
    let mut store = rustls::RootCertStore::empty();

    if let Some(path) = &opts.ca_file_path {
        let pem = std::fs::read(path)
            .map_err(|e| Error::invalid_tls_config(format!("failed to read {}: {}", path, e)))?;
        let mut cursor = std::io::Cursor::new(pem);
        for cert in rustls_pemfile::certs(&mut cursor) {
            let cert = cert
                .map_err(|e| Error::invalid_tls_config(format!("invalid CA certificate: {}", e)))?;
            store
                .add(cert)
                .map_err(|e| Error::invalid_tls_config(e.to_string()))?;
        }
        return Ok(store);
    }

    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Ok(store)
}

/// Disables certificate verification entirely. Only reachable when the application explicitly
/// opted into `tlsAllowInvalidCertificates`; never the default.
#[cfg(feature = "rustls-tls")]
#[derive(Debug)]
struct NoVerifier;

#[cfg(feature = "rustls-tls")]
impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureVerified, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureVerified, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureVerified::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
