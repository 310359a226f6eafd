use std::path::PathBuf;

use ::tracing::{error, info_span};
use clap::Parser;
use service::Service;

mod config;
mod http_objects;
mod metrics;
mod middleware;
mod pipe;
mod routes;
mod service;
mod sessions;
mod tracing;
mod upload;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => config::ServerConfig::from_path(&path.to_string_lossy()),
        None => config::ServerConfig::from_env(),
    };
    let mut config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading config: {:?}", err);
            std::process::exit(1);
        }
    };

    // Generated ids must agree across logs, traces and metrics.
    config.telemetry.instance_id = Some(config.instance_id());

    let tracing_provider = match setup_tracing(&config) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("error setting up tracing: {:?}", err);
            std::process::exit(1);
        }
    };

    let root_span = info_span!(
        "content-relay",
        env = config.env,
        "instance_id" = config.instance_id()
    );
    let _guard = root_span.enter();

    let mut exit_code = 0;
    match Service::new(config) {
        Ok(service) => {
            if let Err(err) = service.start().await {
                error!("error running service: {:?}", err);
                exit_code = 1;
            }
        }
        Err(err) => {
            error!("error creating service: {:?}", err);
            exit_code = 1;
        }
    }

    // export traces before shutdown
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("error shutting down tracer provider: {:?}", err);
        }
    }
    std::process::exit(exit_code);
}
