//! Subcommand implementations. Each writes its result to `out`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use pinroll_core::{ArtifactName, PinrollConfig, format_marker};
use pinroll_rollout::RolloutOrchestrator;
use pinroll_source::{ArtifactCatalog, ArtifactMaterializer, ArtifactSource, LibrarySource};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn list(
    source: &ArtifactSource,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let names = source.list_names(cancel).await?;
    info!(source = %source.name(), count = names.len(), "listed artifacts");
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

pub async fn timestamp(
    source: &ArtifactSource,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match source.timestamp(cancel).await? {
        Some(ts) => writeln!(out, "{}", format_marker(&ts))?,
        None => writeln!(out, "none")?,
    }
    Ok(())
}

pub async fn fetch(
    source: Arc<ArtifactSource>,
    name: &str,
    root: PathBuf,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let source: Arc<dyn LibrarySource> = source;
    let catalog = ArtifactCatalog::new(vec![source]);
    let Some(artifact) = catalog.find(&ArtifactName::from(name), cancel).await? else {
        bail!("no consistent snapshot for artifact {name}");
    };
    let dir = ArtifactMaterializer::new(root)
        .materialize(&artifact, cancel)
        .await?;
    writeln!(out, "{}", dir.display())?;
    Ok(())
}

pub async fn rollout(
    orchestrator: &RolloutOrchestrator,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let report = orchestrator.run(cancel).await?;
    if report.failed() > 0 {
        warn!(failed = report.failed(), "some targets failed to update");
    }
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

pub fn init(
    path: &Path,
    bucket: &str,
    cluster: &str,
    service: &str,
    force: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = PinrollConfig::scaffold(bucket, cluster, service);
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    writeln!(out, "wrote {}", path.display())?;
    Ok(())
}
