//! pinrolld — the pinroll daemon.
//!
//! Resolves artifact snapshots from a versioned S3 bucket and rolls the
//! newest snapshot timestamp out to ECS services as a version marker.
//!
//! # Usage
//!
//! ```text
//! pinrolld init --bucket plugins --cluster prod --service api
//! pinrolld list
//! pinrolld timestamp
//! pinrolld fetch auth --out ./artifacts
//! pinrolld list --source s3://staging/libraries
//! pinrolld rollout
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pinroll_core::PinrollConfig;
use pinroll_rollout::{EcsOrchestrator, RolloutOrchestrator};
use pinroll_source::{ArtifactSource, S3ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod commands;

#[derive(Parser)]
#[command(
    name = "pinrolld",
    about = "pinroll — versioned artifact snapshots and rolling marker updates",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "pinroll.toml")]
    config: PathBuf,

    /// Read artifacts from this `s3://bucket/prefix` instead of the
    /// configured source.
    #[arg(long, global = true)]
    source: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List artifact names with a consistent code/config pair.
    List,
    /// Print the newest snapshot timestamp, or `none`.
    Timestamp,
    /// Write an artifact's code and config to a local directory.
    Fetch {
        /// Artifact name.
        name: String,
        /// Root directory for materialized artifacts.
        #[arg(long, default_value = ".pinroll/artifacts")]
        out: PathBuf,
    },
    /// Roll the newest snapshot timestamp out to every configured service.
    Rollout,
    /// Write a scaffold configuration file.
    Init {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        service: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,pinroll=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Loaded configuration, artifact source, and the run's cancellation token.
struct Session {
    config: PinrollConfig,
    source: Arc<ArtifactSource>,
    cancel: CancellationToken,
}

impl Session {
    async fn open(path: &Path, source_override: Option<&str>) -> anyhow::Result<Self> {
        let mut config = PinrollConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        if let Some(uri) = source_override {
            config.source.override_location(uri)?;
        }
        let location = config.source.location()?;
        let store = Arc::new(S3ObjectStore::from_env(location.bucket).await);
        let source = Arc::new(ArtifactSource::from_config(store, &config.source)?);

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                on_signal.cancel();
            }
        });

        Ok(Self {
            config,
            source,
            cancel,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::Init {
            bucket,
            cluster,
            service,
            force,
        } => commands::init(&cli.config, &bucket, &cluster, &service, force, &mut stdout),
        Command::List => {
            let session = Session::open(&cli.config, cli.source.as_deref()).await?;
            commands::list(&session.source, &session.cancel, &mut stdout).await
        }
        Command::Timestamp => {
            let session = Session::open(&cli.config, cli.source.as_deref()).await?;
            commands::timestamp(&session.source, &session.cancel, &mut stdout).await
        }
        Command::Fetch { name, out } => {
            let session = Session::open(&cli.config, cli.source.as_deref()).await?;
            commands::fetch(session.source, &name, out, &session.cancel, &mut stdout).await
        }
        Command::Rollout => {
            let session = Session::open(&cli.config, cli.source.as_deref()).await?;
            let backend = Arc::new(EcsOrchestrator::from_env().await);
            let orchestrator =
                RolloutOrchestrator::new(backend, session.source, session.config.rollout);
            commands::rollout(&orchestrator, &session.cancel, &mut stdout).await
        }
    }
}
