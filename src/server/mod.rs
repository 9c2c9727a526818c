pub mod api;
pub mod auth;
pub mod websocket;

use crate::assistant::Assistant;
use crate::cli::Args;
use crate::config::Settings;
use log::{ error, info };
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

struct TlsPaths {
    cert: String,
    key: String,
}

/// Runs the HTTP API and the WebSocket endpoint side by side.
pub struct Server {
    ws_addr: String,
    http_port: u16,
    api_key: Option<String>,
    cors_origins: Vec<String>,
    connections_per_second: NonZeroU32,
    tls: Option<TlsPaths>,
    assistant: Arc<Assistant>,
}

impl Server {
    pub fn new(
        args: &Args,
        settings: &Settings,
        assistant: Arc<Assistant>
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let tls = if args.enable_tls {
            match (&args.tls_cert_path, &args.tls_key_path) {
                (Some(cert), Some(key)) => Some(TlsPaths { cert: cert.clone(), key: key.clone() }),
                _ => {
                    return Err("--enable-tls requires both --tls-cert-path and --tls-key-path".into());
                }
            }
        } else {
            None
        };

        Ok(Self {
            ws_addr: args.server_addr.clone(),
            http_port: args.http_port,
            api_key: args.server_api_key.clone().filter(|k| !k.trim().is_empty()),
            cors_origins: settings.cors_origins.clone(),
            connections_per_second: args.ws_connections_per_second,
            tls,
            assistant,
        })
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.tls.is_some() {
            // both listeners share the ring provider
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
        self.start_http_server().await?;
        self.start_ws_server().await
    }

    async fn start_http_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let ws_addr: SocketAddr = self.ws_addr.parse()?;
        let addr = SocketAddr::new(ws_addr.ip(), self.http_port);
        let app = api::router(Arc::clone(&self.assistant), self.api_key.clone(), &self.cors_origins);

        if let Some(tls) = &self.tls {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            info!("Starting HTTPS API server on: https://{}", addr);
            tokio::spawn(async move {
                if let Err(e) = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await {
                    error!("HTTPS server error: {}", e);
                }
            });
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e|
                format!("Failed to bind HTTP server to {}: {}", addr, e)
            )?;
            info!("Starting HTTP API server on: http://{}", addr);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            });
        }
        Ok(())
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let tls_acceptor = match &self.tls {
            Some(tls) => {
                info!("TLS enabled. Loading certificate from '{}' and key from '{}'", tls.cert, tls.key);
                Some(TlsAcceptor::from(websocket::load_tls_config(&tls.cert, &tls.key)?))
            }
            None => None,
        };
        websocket::start_ws_server(
            &self.ws_addr,
            Arc::clone(&self.assistant),
            self.api_key.clone(),
            self.connections_per_second,
            tls_acceptor
        ).await
    }
}
