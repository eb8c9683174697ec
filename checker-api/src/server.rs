use std::future::Future;
use std::io::BufReader;
use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, error, info};

use crate::config::ServerConfig;

/// Bind and serve the router until the shutdown future resolves.
///
/// A second TLS listener is started on the secure port when a certificate
/// and key are configured.
pub async fn serve(
    config: &ServerConfig,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            shutdown.await;
            token.cancel();
        });
    }

    if config.tls_enabled() {
        let tls_config = config.clone();
        let tls_router = router.clone();
        let tls_token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_tls(&tls_config, tls_router, tls_token).await {
                error!(error = %e, "failed to start HTTPS server");
            }
        });
    }

    let listener = TcpListener::bind(config.address()).await?;
    info!(address = %config.address(), "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    Ok(())
}

/// Accept TLS connections and drive them through the router until the token
/// is cancelled.
async fn serve_tls(
    config: &ServerConfig,
    router: Router,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let acceptor = tls_acceptor(config)?;
    let listener = TcpListener::bind(config.secure_address()).await?;
    info!(address = %config.secure_address(), "HTTPS server listening");

    loop {
        let (stream, peer) = tokio::select! {
            () = token.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service = service_fn(move |request: hyper::Request<Incoming>| {
                router.clone().oneshot(request.map(Body::new))
            });
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

fn tls_acceptor(config: &ServerConfig) -> anyhow::Result<TlsAcceptor> {
    let mut cert_reader = BufReader::new(std::fs::File::open(&config.cert_file)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<std::io::Result<Vec<_>>>()?;

    let mut key_reader = BufReader::new(std::fs::File::open(&config.key_file)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", config.key_file))?;

    let tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(tls)))
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
