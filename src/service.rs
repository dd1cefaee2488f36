//! Startup and shutdown orchestration for a bot process.
//!
//! Startup loads the config file (a failure here is fatal), then binds the
//! listener. Shutdown stops accepting deliveries, stops the config reloader
//! and waits up to the grace period for in-flight handlers.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{ConfigAgent, ConfigDocument, LoadError};
use crate::dispatch::{EventDispatcher, HandlerRegistry};
use crate::options::{OptionsError, ServiceOptions};
use crate::server::{AppState, build_router};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Config(#[from] LoadError),

    #[error("no event handlers registered, it is not a robot")]
    NoHandlers,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// A bot whose config is loaded and whose listener is bound, but which is
/// not serving yet.
pub struct Service<C> {
    listener: TcpListener,
    dispatcher: Arc<EventDispatcher<C>>,
    grace_period: Duration,
}

impl<C: ConfigDocument> Service<C> {
    /// Validates `options`, loads the config file and binds the listener.
    pub async fn bind(
        options: &ServiceOptions,
        registry: HandlerRegistry<C>,
    ) -> Result<Self, ServiceError> {
        options.validate()?;
        if registry.is_empty() {
            return Err(ServiceError::NoHandlers);
        }

        let agent = ConfigAgent::<C>::start(&options.config_file, options.reload_interval()).await?;

        let addr = SocketAddr::from(([0, 0, 0, 0], options.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                agent.stop().await;
                return Err(ServiceError::Bind { addr, source });
            }
        };

        Ok(Service {
            listener,
            dispatcher: Arc::new(EventDispatcher::new(agent, registry)),
            grace_period: options.grace_period(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher<C>> {
        &self.dispatcher
    }

    /// Serves webhooks until `shutdown` resolves, then drains.
    ///
    /// The drain happens even when the server itself failed, so handlers
    /// already running are still given their grace period.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Service {
            listener,
            dispatcher,
            grace_period,
        } = self;

        let router = build_router(AppState::new(dispatcher.clone()));
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "Listening"),
            Err(e) => info!(error = %e, "Listening"),
        }

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;
        if let Err(e) = &served {
            error!(error = %e, "Server stopped with an error");
        }

        info!("No longer accepting webhooks, shutting down");
        dispatcher.agent().stop().await;
        dispatcher.shutdown(grace_period).await;

        served.map_err(ServiceError::Serve)
    }
}

/// Binds and serves in one step.
pub async fn run<C, F>(
    options: &ServiceOptions,
    registry: HandlerRegistry<C>,
    shutdown: F,
) -> Result<(), ServiceError>
where
    C: ConfigDocument,
    F: Future<Output = ()> + Send + 'static,
{
    Service::bind(options, registry).await?.serve(shutdown).await
}
