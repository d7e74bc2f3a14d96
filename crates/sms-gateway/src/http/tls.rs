use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builds a `TlsAcceptor` from PEM certificate and key files.
pub(super) fn build_tls_acceptor(
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor> {
    let cert_file = File::open(cert_path).with_context(|| {
        format!("failed to open ssl_cert {}", cert_path.display())
    })?;
    let key_file = File::open(key_path).with_context(|| {
        format!("failed to open ssl_key {}", key_path.display())
    })?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to parse ssl_cert")?;
    if certs.is_empty() {
        bail!("no certificates found in {}", cert_path.display());
    }

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .context("failed to parse ssl_key")?
            .ok_or_else(|| {
                anyhow!("no private key found in {}", key_path.display())
            })?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate/key pair")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Serves the router over TLS, one handshake + HTTP/1.1 connection per
/// accepted client, until the shutdown token fires.
pub(super) async fn serve_https(
    addr: &str,
    app: Router,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind https listener on {addr}"))?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("https server stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("https accept failed: error={err}");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let app = app.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            debug!(
                                "tls handshake failed: peer={}, error={}",
                                peer, err
                            );
                            return;
                        }
                    };

                    let service = TowerToHyperService::new(app);
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!(
                            "https connection ended: peer={}, error={}",
                            peer, err
                        );
                    }
                });
            }
        }
    }

    Ok(())
}
