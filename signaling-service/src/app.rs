use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use axum::Router;
use axum_server::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::{self, AppState, SessionLimits};
use crate::app_config::AppConfig;
use crate::common::services::auth::JwtAuthenticator;
use crate::common::services::directory::StaticDirectory;
use crate::vc::Hub;

/// How long open HTTP connections get to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct App {
    ///Readonly config
    pub config: AppConfig,
    /// Token notifying of app shutdown. Every voice session holds a child.
    pub cancellation_token: CancellationToken,
    /// Task tracker. Instead of using tokio::spawn use tracker.spawn
    task_tracker: TaskTracker,
    hub: Arc<Hub>,
}

impl App {
    pub fn new(config: AppConfig) -> &'static mut Self {
        let app = Box::new(Self {
            config,
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            hub: Arc::new(Hub::new()),
        });
        Box::leak(app)
    }

    pub async fn run(&'static mut self) -> anyhow::Result<()> {
        let router = self.router()?;
        let handle: Handle<SocketAddr> = Handle::new();
        self.task_tracker.spawn(log_listening(handle.clone()));

        let server = self.serve(router, handle.clone());
        tokio::pin!(server);
        tokio::select! {
            result = &mut server => {
                self.cancellation_token.cancel();
                result?;
            }
            _ = self.handle_signal() => {
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                server.await?;
            }
        }

        self.task_tracker.close();
        self.task_tracker.wait().await;
        tracing::info!(rooms = self.hub.room_count(), "Shut down");
        Ok(())
    }

    fn router(&self) -> anyhow::Result<Router> {
        if self.config.jwt_secret.is_empty() {
            bail!("jwt_secret must not be empty");
        }
        let directory = StaticDirectory::load(&self.config.directory).with_context(|| {
            format!(
                "failed to load channel directory from {}",
                self.config.directory.display()
            )
        })?;
        let state = AppState {
            hub: self.hub.clone(),
            auth: Arc::new(JwtAuthenticator::new(&self.config.jwt_secret)),
            directory: Arc::new(directory),
            sessions: SessionLimits::new(self.config.connection_limit, self.config.session_queue),
            shutdown: self.cancellation_token.clone(),
            tracker: self.task_tracker.clone(),
        };
        Ok(api::router(state, &self.config.cors_origins))
    }

    async fn serve(
        &'static self,
        router: Router,
        handle: Handle<SocketAddr>,
    ) -> anyhow::Result<()> {
        let service = router.into_make_service();
        if self.config.tls_enabled() {
            let (certs, key) = crate::common::security::certs::load_certs(&self.config)?;
            let tls = crate::common::security::endpoint_config::create_server_config(
                &self.config,
                certs,
                key,
            )?;
            axum_server::bind_rustls(self.config.listen, tls)
                .handle(handle)
                .serve(service)
                .await?;
        } else {
            tracing::warn!("Serving plain HTTP, set environment to production for TLS");
            axum_server::bind(self.config.listen)
                .handle(handle)
                .serve(service)
                .await?;
        }
        Ok(())
    }

    async fn handle_signal(&'static self) {
        match signal::ctrl_c().await {
            Ok(_) => {
                tracing::info!("Interrupt detected!");
                self.cancellation_token.cancel();
                tracing::info!("Sent exit signal. Waiting for sessions to close...");
            }
            Err(e) => {
                tracing::error!("Cannot listen for interrupt, app closing: {e}");
                self.cancellation_token.cancel();
            }
        }
    }
}

async fn log_listening(handle: Handle<SocketAddr>) {
    if let Some(addr) = handle.listening().await {
        tracing::info!("listening on {addr}");
    }
}
