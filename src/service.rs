use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BackendSinkFactory;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tokio::signal;
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    metrics::init_provider,
    middleware::InstanceRequestSpan,
    routes::{create_routes, RouteState},
    sessions::{RegistryError, SessionRegistry},
};

pub struct Service {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    instance_id: String,
    meter_provider: Option<SdkMeterProvider>,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let instance_id = config.instance_id();
        let meter_provider = init_provider(
            config.telemetry.enable_metrics,
            config.telemetry.endpoint.as_ref(),
            config.telemetry.metrics_interval,
            Some(&instance_id),
            env!("CARGO_PKG_VERSION"),
        )
        .context("error initializing metrics")?;

        let factory = BackendSinkFactory::new(config.sink.clone())
            .context("error initializing sink factory")?;
        info!(backend = ?factory.backend(), "sink backend configured");

        // Instruments bind to the global meter provider installed above.
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(factory),
            config.pipe_capacity,
            config.shutdown_concurrency,
        ));

        Ok(Self {
            config,
            registry,
            instance_id,
            meter_provider,
        })
    }

    /// Serves until a termination signal arrives, then drains every session.
    pub async fn start(&self) -> Result<()> {
        let route_state = RouteState {
            registry: self.registry.clone(),
        };
        let routes = create_routes(
            route_state,
            InstanceRequestSpan::new(&self.config.env, &self.instance_id),
            self.config.max_body_bytes,
        );

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let grace_period = self.config.shutdown_grace_period;
        tokio::spawn(async move {
            shutdown_signal(handle_sh, grace_period).await;
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        let drained = self.drain().await;
        self.shutdown_metrics();
        drained
    }

    async fn drain(&self) -> Result<()> {
        match self.registry.shutdown().await {
            Ok(report) => {
                info!(sessions = report.drained.len(), "uploads flushed");
                Ok(())
            }
            Err(RegistryError::PartialDrain { total, failures }) => {
                for failure in &failures {
                    error!(client_id = %failure.client_id, "upload lost: {}", failure.reason);
                }
                Err(anyhow::anyhow!(
                    "{} of {} uploads failed during shutdown",
                    failures.len(),
                    total
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn shutdown_metrics(&self) {
        if let Some(provider) = &self.meter_provider {
            if let Err(err) = provider.shutdown() {
                error!("error shutting down meter provider: {:?}", err);
            }
        }
    }
}

async fn wait_for_signal(kind: signal::unix::SignalKind, name: &str) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            error!("failed to install {} handler: {:?}", name, err);
            std::future::pending::<()>().await;
        }
    }
}

async fn shutdown_signal(handle: Handle, grace_period: Duration) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = wait_for_signal(signal::unix::SignalKind::terminate(), "SIGTERM") => {},
        _ = wait_for_signal(signal::unix::SignalKind::quit(), "SIGQUIT") => {},
    }
    info!("signal received, shutting down server gracefully");
    handle.graceful_shutdown(Some(grace_period));
}
