//! Mutual TLS for the remote protocol.
//!
//! Both sides verify the peer's chain against a configured CA. On top of
//! that the server only talks to clients whose certificate's SHA-256
//! fingerprint is on its allow-list (an empty list admits nobody), and a
//! client may pin the server's fingerprint the same way.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

use crate::config::TlsSettings;
use crate::error::{RemoteError, RemoteResult};

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// Lower-case hex SHA-256 of a DER certificate.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    hex::encode(Sha256::digest(cert.as_ref()))
}

/// Accept `AB:CD:…`, `ab cd …` and plain hex alike.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Certificate fingerprints a peer must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerAllowList(BTreeSet<String>);

impl PeerAllowList {
    pub fn new<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            fingerprints
                .into_iter()
                .map(|f| normalize_fingerprint(f.as_ref()))
                .filter(|f| !f.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn allows(&self, fingerprint: &str) -> bool {
        self.0.contains(&normalize_fingerprint(fingerprint))
    }

    /// Check the leaf certificate of a completed handshake; returns its fingerprint.
    pub fn check(&self, peer_chain: Option<&[CertificateDer<'_>]>) -> RemoteResult<String> {
        let leaf = peer_chain
            .and_then(<[_]>::first)
            .ok_or_else(|| RemoteError::Tls("peer presented no certificate".to_owned()))?;
        let fp = fingerprint(leaf);
        if self.allows(&fp) {
            Ok(fp)
        } else {
            Err(RemoteError::PeerNotAllowed(fp))
        }
    }
}

// ---------------------------------------------------------------------------
// PEM loading
// ---------------------------------------------------------------------------

fn open(path: &Path) -> RemoteResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| RemoteError::Config(format!("cannot open '{}': {e}", path.display())))
}

fn load_certs(path: &Path) -> RemoteResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RemoteError::Config(format!("'{}': bad certificate: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(RemoteError::Config(format!(
            "'{}' holds no certificate",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> RemoteResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| RemoteError::Config(format!("'{}': bad private key: {e}", path.display())))?
        .ok_or_else(|| RemoteError::Config(format!("'{}' holds no private key", path.display())))
}

fn load_roots(path: &Path) -> RemoteResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Accepts TLS connections from allow-listed clients only.
#[derive(Clone)]
pub struct ServerTls {
    acceptor: TlsAcceptor,
    allowed: Arc<PeerAllowList>,
}

impl ServerTls {
    pub fn from_settings(settings: &TlsSettings) -> RemoteResult<Self> {
        let provider = provider();
        let roots = Arc::new(load_roots(&settings.ca)?);
        let verifier = WebPkiClientVerifier::builder_with_provider(roots, Arc::clone(&provider))
            .build()
            .map_err(|e| RemoteError::Tls(format!("client verifier: {e}")))?;

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(load_certs(&settings.cert)?, load_key(&settings.key)?)?;

        let allowed = PeerAllowList::new(&settings.allowed_peers);
        if allowed.is_empty() {
            warn!("TLS allow-list is empty; every client will be refused");
        }
        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            allowed: Arc::new(allowed),
        })
    }

    /// Handshake, then check the client certificate against the allow-list.
    pub async fn accept<IO>(&self, io: IO) -> RemoteResult<server::TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let stream = self
            .acceptor
            .accept(io)
            .await
            .map_err(|e| RemoteError::Tls(format!("handshake failed: {e}")))?;
        let fp = self.allowed.check(stream.get_ref().1.peer_certificates())?;
        debug!(peer = %fp, "client authenticated");
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Connects with a client certificate, optionally pinning the server.
#[derive(Clone)]
pub struct ClientTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    pinned: Arc<PeerAllowList>,
}

impl ClientTls {
    /// `default_name` is used when the settings carry no `server_name`.
    pub fn from_settings(settings: &TlsSettings, default_name: &str) -> RemoteResult<Self> {
        let name = settings
            .server_name
            .clone()
            .unwrap_or_else(|| default_name.to_owned());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| RemoteError::Config(format!("invalid server name '{name}': {e}")))?;

        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(load_roots(&settings.ca)?)
            .with_client_auth_cert(load_certs(&settings.cert)?, load_key(&settings.key)?)?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            pinned: Arc::new(PeerAllowList::new(&settings.allowed_peers)),
        })
    }

    /// Handshake, then check the server certificate against the pins, if any.
    pub async fn connect<IO>(&self, io: IO) -> RemoteResult<client::TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let stream = self
            .connector
            .connect(self.server_name.clone(), io)
            .await
            .map_err(|e| RemoteError::Tls(format!("handshake failed: {e}")))?;
        if !self.pinned.is_empty() {
            let fp = self.pinned.check(stream.get_ref().1.peer_certificates())?;
            debug!(server = %fp, "server fingerprint matches pin");
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_compare_regardless_of_formatting() {
        let cert = CertificateDer::from(vec![0x30, 0x82, 0x01, 0x0a]);
        let fp = fingerprint(&cert);
        assert_eq!(fp.len(), 64);

        let colons = fp
            .as_bytes()
            .chunks(2)
            .map(|pair| std::str::from_utf8(pair).unwrap().to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(":");
        let allowed = PeerAllowList::new([colons]);
        assert_eq!(allowed.check(Some(std::slice::from_ref(&cert))).unwrap(), fp);
    }

    #[test]
    fn empty_allow_list_denies_everyone() {
        let cert = CertificateDer::from(vec![1, 2, 3]);
        let denied = PeerAllowList::default().check(Some(std::slice::from_ref(&cert)));
        assert!(matches!(denied, Err(RemoteError::PeerNotAllowed(_))));
    }

    #[test]
    fn missing_peer_certificate_is_refused() {
        let allowed = PeerAllowList::new(["00"]);
        assert!(matches!(allowed.check(None), Err(RemoteError::Tls(_))));
    }

    #[test]
    fn missing_files_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let settings = TlsSettings {
            cert: dir.path().join("nope.pem"),
            key: dir.path().join("nope.key"),
            ca: dir.path().join("ca.pem"),
            allowed_peers: vec![],
            server_name: None,
        };
        assert!(matches!(
            ServerTls::from_settings(&settings),
            Err(RemoteError::Config(_))
        ));
        assert!(matches!(
            ClientTls::from_settings(&settings, "localhost"),
            Err(RemoteError::Config(_))
        ));
    }
}
