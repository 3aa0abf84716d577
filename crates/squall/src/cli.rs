//! Command line entry points.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::PushMessage;
use crate::config::PipelineConfig;
use crate::envelope::StatusEnvelope;
use crate::error::{ConfigError, DecodeError, PublishError, ServiceError, StorageError};
use crate::orchestrator::Orchestrator;
use squall_core::MetricsError;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliArgs {
    /// Path to a YAML configuration file. Without it the configuration is
    /// read from the environment.
    #[arg(short, long, global = true, env = "SQUALL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the cluster and submit the batch job.
    Start,
    /// Handle one status envelope: load the results and delete the cluster.
    OnMessage {
        /// File holding the payload, or `-` for stdin.
        #[arg(long)]
        payload: PathBuf,
        /// Treat the input as a push delivery body instead of a raw envelope.
        #[arg(long)]
        push: bool,
    },
    /// Validate a status envelope and publish it to the completion topic.
    Publish {
        /// File holding the envelope, or `-` for stdin.
        #[arg(long)]
        envelope: PathBuf,
    },
    /// Serve the HTTP endpoints until interrupted.
    Serve,
}

impl CliArgs {
    /// Build the pipeline configuration.
    pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
        match &self.config {
            Some(path) => PipelineConfig::from_file(path),
            None => PipelineConfig::from_env(),
        }
    }
}

/// Errors surfaced by the CLI.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Failed to load configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Failed to open output storage: {source}"))]
    Storage { source: StorageError },

    #[snafu(display("Failed to connect to Google Cloud: {source}"))]
    Connect { source: ServiceError },

    #[snafu(display("Failed to read {}: {source}", path.display()))]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Invalid input: {source}"))]
    Input { source: DecodeError },

    #[snafu(display("{source}"))]
    Publish { source: PublishError },

    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },

    #[snafu(display("Server error: {source}"))]
    Serve { source: std::io::Error },

    #[snafu(display("Failed to render output: {source}"))]
    Render { source: serde_json::Error },

    #[snafu(display("squall was built without the gcp feature"))]
    GcpDisabled,
}

/// Read a file, or stdin for `-`.
pub fn read_input(path: &Path) -> Result<Vec<u8>, CliError> {
    let result = if path == Path::new("-") {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes).map(|_| bytes)
    } else {
        std::fs::read(path)
    };
    result.context(ReadInputSnafu { path })
}

/// Unwrap a push delivery body into the envelope payload.
pub fn unwrap_payload(input: Vec<u8>, push: bool) -> Result<Vec<u8>, DecodeError> {
    if push {
        PushMessage::from_slice(&input)?.payload()
    } else {
        Ok(input)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).context(RenderSnafu)?;
    println!("{rendered}");
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run one command.
pub async fn run(args: CliArgs) -> Result<ExitCode, CliError> {
    let config = args.load_config().context(ConfigSnafu)?;

    match args.command {
        Command::Start => {
            let orchestrator = connect(config).await?;
            let outcome = orchestrator.start().await;
            print_json(&outcome)?;
            Ok(exit_code(outcome.is_success()))
        }
        Command::OnMessage { payload, push } => {
            let input = read_input(&payload)?;
            let payload = unwrap_payload(input, push).context(InputSnafu)?;
            let orchestrator = connect(config).await?;
            let outcome = orchestrator.on_message(&payload).await;
            print_json(&outcome)?;
            Ok(exit_code(outcome.is_success()))
        }
        Command::Publish { envelope } => {
            let input = read_input(&envelope)?;
            let envelope = StatusEnvelope::decode(&input).context(InputSnafu)?;
            let message_id = publish(&config, &envelope).await?;
            print_json(&serde_json::json!({
                "topic": config.completion_topic,
                "message_id": message_id,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            if config.metrics.enabled {
                squall_core::init_metrics().context(MetricsSnafu)?;
            }
            let address = config.server.address.clone();
            let orchestrator = Arc::new(connect(config).await?);

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                squall_core::shutdown_signal().await;
                info!("Shutdown signal received");
                trigger.cancel();
            });

            crate::server::serve(orchestrator, &address, shutdown)
                .await
                .context(ServeSnafu)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(feature = "gcp")]
async fn connect(config: PipelineConfig) -> Result<Orchestrator, CliError> {
    use crate::gcp::GcpServices;
    use squall_core::StorageProvider;

    let storage = StorageProvider::for_url(&config.output_url())
        .await
        .context(StorageSnafu)?;
    let gcp = GcpServices::connect(&config).await.context(ConnectSnafu)?;
    Ok(Orchestrator::new(config, gcp.services(storage)))
}

#[cfg(not(feature = "gcp"))]
async fn connect(_config: PipelineConfig) -> Result<Orchestrator, CliError> {
    GcpDisabledSnafu.fail()
}

#[cfg(feature = "gcp")]
async fn publish(config: &PipelineConfig, envelope: &StatusEnvelope) -> Result<String, CliError> {
    use crate::gcp::GcpServices;

    let gcp = GcpServices::connect(config).await.context(ConnectSnafu)?;
    crate::bus::publish_status(gcp.bus.as_ref(), &config.completion_topic, envelope)
        .await
        .context(PublishSnafu)
}

#[cfg(not(feature = "gcp"))]
async fn publish(_config: &PipelineConfig, _envelope: &StatusEnvelope) -> Result<String, CliError> {
    GcpDisabledSnafu.fail()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_on_message() {
        let args = CliArgs::try_parse_from([
            "squall",
            "--config",
            "squall.yaml",
            "on-message",
            "--payload",
            "-",
            "--push",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("squall.yaml")));
        assert!(matches!(
            args.command,
            Command::OnMessage { push: true, ref payload } if payload == Path::new("-")
        ));
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(CliArgs::try_parse_from(["squall"]).is_err());
    }

    #[test]
    fn test_unwrap_push_payload() {
        let push = PushMessage::wrap(b"{}", "1");
        let body = serde_json::to_vec(&push).unwrap();
        assert_eq!(unwrap_payload(body, true).unwrap(), b"{}");
        assert_eq!(unwrap_payload(b"raw".to_vec(), false).unwrap(), b"raw");
        assert!(unwrap_payload(b"raw".to_vec(), true).is_err());
    }

    #[test]
    fn test_read_input_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("envelope.json");
        std::fs::write(&path, b"{\"status\":\"FAILED\"}").unwrap();
        assert_eq!(read_input(&path).unwrap(), b"{\"status\":\"FAILED\"}");
        assert!(matches!(
            read_input(&dir.path().join("missing.json")),
            Err(CliError::ReadInput { .. })
        ));
    }
}
