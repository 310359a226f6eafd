use std::{fmt::Debug, net::SocketAddr, time::Duration};

use anyhow::Result;
use blob_store::SinkConfig;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "CONTENT_RELAY_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Largest request body accepted by the ingest routes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Compressed frames buffered per client before writers wait.
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
    /// Sessions drained in parallel on shutdown.
    #[serde(default = "default_shutdown_concurrency")]
    pub shutdown_concurrency: usize,
    /// Time in-flight requests get to finish once a signal arrives.
    #[serde(with = "duration_serde", default = "default_grace_period")]
    pub shutdown_grace_period: Duration,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: default_env(),
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
            pipe_capacity: default_pipe_capacity(),
            shutdown_concurrency: default_shutdown_concurrency(),
            shutdown_grace_period: default_grace_period(),
            sink: SinkConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn default_env() -> String {
    LOCAL_ENV.to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_pipe_capacity() -> usize {
    16
}

fn default_shutdown_concurrency() -> usize {
    8
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

impl ServerConfig {
    /// Loads the YAML file at `path`; `CONTENT_RELAY_*` variables override it.
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::extract(Figment::new().merge(Yaml::string(&config_str)))
    }

    /// Defaults overridden by `CONTENT_RELAY_*` variables.
    pub fn from_env() -> Result<ServerConfig> {
        Self::extract(Figment::new())
    }

    fn extract(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.pipe_capacity == 0 {
            return Err(anyhow::anyhow!("pipe_capacity must be at least 1"));
        }
        if self.shutdown_concurrency == 0 {
            return Err(anyhow::anyhow!("shutdown_concurrency must be at least 1"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow::anyhow!("max_body_bytes must be at least 1"));
        }
        self.sink.validate()?;
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    pub fn instance_id(&self) -> String {
        self.telemetry
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.env, Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enable_metrics: bool,
    // Export spans over OTLP.
    #[serde(default)]
    pub enable_tracing: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // Falls back to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(with = "duration_serde", default = "default_metrics_interval")]
    pub metrics_interval: Duration,
    // Reported as the "service.instance.id" metric attribute.
    #[serde(default)]
    pub instance_id: Option<String>,
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(10)
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            enable_tracing: false,
            endpoint: None,
            metrics_interval: default_metrics_interval(),
            instance_id: None,
        }
    }
}

// Durations are configured in whole seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use blob_store::Backend;
    use figment::Jail;

    use super::*;

    #[test]
    fn should_parse_sample_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
env: staging
listen_addr: 0.0.0.0:9000
pipe_capacity: 4
shutdown_grace_period: 30
sink:
  backend: s3
  s3:
    bucket: content-logs
    region: us-west-2
    prefix: chat
telemetry:
  enable_metrics: true
  metrics_interval: 5
"#,
            )?;
            let config = ServerConfig::from_path("config.yaml").map_err(|e| e.to_string())?;
            assert_eq!(config.listen_addr, "0.0.0.0:9000");
            assert_eq!(config.pipe_capacity, 4);
            assert_eq!(config.shutdown_concurrency, 8);
            assert_eq!(config.shutdown_grace_period, Duration::from_secs(30));
            assert_eq!(config.sink.backend, Backend::S3);
            assert_eq!(config.sink.s3.bucket.as_deref(), Some("content-logs"));
            assert!(config.sink.s3.access_key_id.is_none());
            assert!(config.telemetry.enable_metrics);
            assert_eq!(config.telemetry.metrics_interval, Duration::from_secs(5));
            assert!(config.structured_logging());
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "listen_addr: 0.0.0.0:9000\n")?;
            jail.set_env("CONTENT_RELAY_LISTEN_ADDR", "127.0.0.1:7000");
            jail.set_env("CONTENT_RELAY_SINK__BACKEND", "azure");
            let config = ServerConfig::from_path("config.yaml").map_err(|e| e.to_string())?;
            assert_eq!(config.listen_addr, "127.0.0.1:7000");
            assert_eq!(config.sink.backend, Backend::Azure);
            Ok(())
        });
    }

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_| {
            let config = ServerConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.listen_addr, "127.0.0.1:8080");
            assert_eq!(config.pipe_capacity, 16);
            assert_eq!(config.sink.backend, Backend::Local);
            assert!(!config.structured_logging());
            Ok(())
        });
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.listen_addr = "127.0.0.1:8080".to_string();
        config.pipe_capacity = 0;
        assert!(config.validate().is_err());

        config.pipe_capacity = 1;
        config.sink.backend = Backend::S3;
        config.sink.part_size_bytes = 1024;
        assert!(config.validate().is_err());

        config.sink.backend = Backend::Local;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn instance_id_defaults_to_env_prefix() {
        let config = ServerConfig::default();
        assert!(config.instance_id().starts_with("local-"));

        let mut config = ServerConfig::default();
        config.telemetry.instance_id = Some("relay-1".to_string());
        assert_eq!(config.instance_id(), "relay-1");
    }
}
