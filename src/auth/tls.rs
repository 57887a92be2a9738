use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("client authentication requires a root certificate file")]
    MissingClientCa,
}

/// Paths configuring the server side of the TLS handshake.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Server certificate chain (PEM).
    pub cert_file: PathBuf,

    /// Server private key (PEM, PKCS#8 or RSA).
    pub key_file: PathBuf,

    /// Root certificate used to verify client certificates.
    pub ca_file: Option<PathBuf>,

    /// Require every client to present a certificate signed by the CA
    /// (mutual TLS). The certificate's common name becomes the subject
    /// requests are authorized as.
    pub require_client_auth: bool,
}

/// Build the rustls server config described by `opts`.
pub fn server_config(opts: &TlsOptions) -> Result<ServerConfig, TlsError> {
    if opts.require_client_auth && opts.ca_file.is_none() {
        return Err(TlsError::MissingClientCa);
    }

    let certs = load_certs(&opts.cert_file)?;
    let key = load_private_key(&opts.key_file)?;

    let builder = ServerConfig::builder().with_safe_defaults();
    let config = match &opts.ca_file {
        Some(ca_file) if opts.require_client_auth => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots.add(&cert)?;
            }
            builder
                .with_client_cert_verifier(Arc::new(AllowAnyAuthenticatedClient::new(roots)))
                .with_single_cert(certs, key)?
        }
        _ => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };
    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    let mut reader = BufReader::new(open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|source| TlsError::Read {
        path: path.to_owned(),
        source,
    })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_owned()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, TlsError> {
    let mut reader = BufReader::new(open(path)?);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader).map_err(|source| {
        TlsError::Read {
            path: path.to_owned(),
            source,
        }
    })?;
    if keys.is_empty() {
        let mut reader = BufReader::new(open(path)?);
        keys = rustls_pemfile::rsa_private_keys(&mut reader).map_err(|source| TlsError::Read {
            path: path.to_owned(),
            source,
        })?;
    }
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_owned()))
}

fn open(path: &Path) -> Result<File, TlsError> {
    File::open(path).map_err(|source| TlsError::Read {
        path: path.to_owned(),
        source,
    })
}
