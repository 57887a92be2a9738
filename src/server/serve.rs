use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Router};
use hyper::server::conn::Http;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use x509_parser::prelude::*;

use super::Peer;

/// Serve the router over plain TCP. Every request runs as `anonymous`;
/// pair this with an allow-all policy or put real TLS in front.
pub async fn run_plain(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
    let app = router.layer(Extension(Peer::anonymous()));
    info!(%addr, "listening without TLS");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Serve the router over TLS. When the config demands client
/// certificates, the peer's common name becomes the subject its requests
/// are authorized as.
pub async fn run_tls(
    addr: SocketAddr,
    router: Router,
    config: rustls::ServerConfig,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    info!(%addr, "listening with TLS");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let router = router.clone();
                tokio::spawn(async move {
                    serve_tls_connection(acceptor, stream, remote, router).await;
                });
            }
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}

async fn serve_tls_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    remote: SocketAddr,
    router: Router,
) {
    let stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%remote, error = %e, "TLS handshake failed");
            return;
        }
    };

    let peer = peer_identity(&stream);
    debug!(%remote, subject = %peer.subject, "connection established");

    let app = router.layer(Extension(peer));
    if let Err(e) = Http::new().serve_connection(stream, app).await {
        debug!(%remote, error = %e, "connection closed with error");
    }
}

fn peer_identity(stream: &TlsStream<TcpStream>) -> Peer {
    let (_, connection) = stream.get_ref();
    connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(|cert| peer_common_name(&cert.0))
        .map(|subject| Peer { subject })
        .unwrap_or_else(Peer::anonymous)
}

/// Pull the subject common name out of a DER-encoded certificate.
fn peer_common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);
    name
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install SIGINT handler");
        }
    };
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
