//! TLS configuration loading for Periderm transports.
//!
//! Both the orchestrator server and the RPC clients run plaintext when
//! no certificate material is configured; that is permitted for local
//! use and logged loudly. Supplying only half of a cert/key pair, or a
//! client CA without server credentials, is a configuration error.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Please specify both a TLS key and certificate")]
    IncompleteKeyPair,

    #[error("A client CA requires server certificate and key")]
    ClientCaWithoutServerCreds,

    #[error("Failed to build CA pool from {0}: no parsable certificates")]
    EmptyCaPool(PathBuf),

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),

    #[error("Client verifier rejected: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// Build the server-side TLS configuration.
///
/// Returns `Ok(None)` when both `cert` and `key` are unset: the server
/// runs plaintext. When `client_ca` is set, clients must present a
/// certificate signed by that CA.
pub fn server_config(
    cert: Option<&Path>,
    key: Option<&Path>,
    client_ca: Option<&Path>,
) -> Result<Option<ServerConfig>, TlsError> {
    let (cert, key) = match (cert, key) {
        (None, None) => {
            if client_ca.is_some() {
                return Err(TlsError::ClientCaWithoutServerCreds);
            }
            warn!("no certificate and key set, serving plaintext");
            return Ok(None);
        }
        (Some(cert), Some(key)) => (cert, key),
        _ => return Err(TlsError::IncompleteKeyPair),
    };

    let certs = load_certs(cert)?;
    let key = load_key(key)?;

    let config = match client_ca {
        None => {
            info!("no client CA set, all clients will be able to connect");
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)?
        }
        Some(ca_path) => {
            let roots = load_ca_pool(ca_path)?;
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build()?;
            info!("client CA configured, enforcing client authentication");
            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
    };

    Ok(Some(config))
}

/// Build the client-side TLS configuration from a CA certificate.
///
/// Returns `Ok(None)` when no CA is given: the client dials plaintext
/// and the server's identity goes unchecked.
pub fn client_config(ca: Option<&Path>) -> Result<Option<ClientConfig>, TlsError> {
    let ca_path = match ca {
        None => {
            warn!("no CA specified, dialing plaintext without server verification");
            return Ok(None);
        }
        Some(path) => path,
    };

    let roots = load_ca_pool(ca_path)?;
    info!("CA loaded, server certificates will be verified");
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Some(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

fn load_ca_pool(path: &Path) -> Result<RootCertStore, TlsError> {
    let certs = load_certs(path)?;
    let mut roots = RootCertStore::empty();
    let (added, _skipped) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::EmptyCaPool(path.to_path_buf()));
    }
    Ok(roots)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_when_unconfigured() {
        let config = server_config(None, None, None).unwrap();
        assert!(config.is_none());

        let config = client_config(None).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn half_a_keypair_is_rejected() {
        let cert = Path::new("certs/server.crt");
        let result = server_config(Some(cert), None, None);
        assert!(matches!(result, Err(TlsError::IncompleteKeyPair)));

        let key = Path::new("certs/server.key");
        let result = server_config(None, Some(key), None);
        assert!(matches!(result, Err(TlsError::IncompleteKeyPair)));
    }

    #[test]
    fn client_ca_requires_server_creds() {
        let ca = Path::new("certs/ca.crt");
        let result = server_config(None, None, Some(ca));
        assert!(matches!(result, Err(TlsError::ClientCaWithoutServerCreds)));
    }

    #[test]
    fn missing_files_surface_the_path() {
        let cert = Path::new("/definitely/not/here.crt");
        let key = Path::new("/definitely/not/here.key");
        let err = server_config(Some(cert), Some(key), None).unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }
}
