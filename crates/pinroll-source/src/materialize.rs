//! Local on-disk copies of artifacts.
//!
//! Each resolved snapshot gets its own directory, so a republished
//! artifact lands next to the old copy instead of being masked by it:
//!
//! ```text
//! {root}/
//!   {sha256(source name)[..16]}/
//!     {sanitized artifact name}/
//!       {sha256(code and config versions)[..16]}/
//!         code.zip
//!         config.json
//! ```

use std::path::{Path, PathBuf};

use pinroll_core::{ArtifactName, Snapshot};
use pinroll_flight::{EvictionPolicy, SingleFlight};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ArtifactRef;
use crate::error::{SourceError, SourceResult};
use crate::source::LibrarySource;

/// File name of the code payload inside an artifact directory.
pub const CODE_FILE: &str = "code.zip";
/// File name of the config payload inside an artifact directory.
pub const CONFIG_FILE: &str = "config.json";

const DIGEST_LEN: usize = 16;

type FlightKey = (String, ArtifactName, String);

/// Writes artifacts below a root directory, once per resolved snapshot.
pub struct ArtifactMaterializer {
    root: PathBuf,
    flights: SingleFlight<FlightKey, PathBuf, SourceError>,
}

impl ArtifactMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flights: SingleFlight::with_policy(EvictionPolicy::OnAnyError),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `snapshot` of `artifact`.
    pub fn artifact_dir(&self, artifact: &ArtifactRef, snapshot: &Snapshot) -> PathBuf {
        self.root
            .join(source_digest(artifact.source_name()))
            .join(sanitize_name(artifact.name().as_str()))
            .join(snapshot_digest(snapshot))
    }

    /// Resolve the current snapshot of `artifact`, ensure its `code.zip`
    /// and `config.json` exist, and return their directory. A directory
    /// for the same snapshot is reused as is.
    pub async fn materialize(
        &self,
        artifact: &ArtifactRef,
        cancel: &CancellationToken,
    ) -> SourceResult<PathBuf> {
        let snapshot = artifact
            .snapshot(cancel)
            .await?
            .ok_or_else(|| SourceError::ArtifactIncomplete(artifact.to_string()))?;
        let dir = self.artifact_dir(artifact, &snapshot);
        let key = (
            artifact.source_name().to_string(),
            artifact.name().clone(),
            snapshot_digest(&snapshot),
        );
        let artifact = artifact.clone();
        let cancel = cancel.clone();
        self.flights
            .get_or_compute(key, move |_| write_artifact(artifact, snapshot, dir, cancel))
            .await
    }
}

async fn write_artifact(
    artifact: ArtifactRef,
    snapshot: Snapshot,
    dir: PathBuf,
    cancel: CancellationToken,
) -> SourceResult<PathBuf> {
    if tokio::fs::try_exists(&dir).await? {
        debug!(%artifact, dir = %dir.display(), "reusing materialized artifact");
        return Ok(dir);
    }

    match download_into(&artifact, &snapshot, &dir, &cancel).await {
        Ok(()) => {
            info!(
                %artifact,
                code_version = %snapshot.code_version.version_id,
                config_version = %snapshot.config_version.version_id,
                dir = %dir.display(),
                "materialized artifact"
            );
            Ok(dir)
        }
        Err(e) => {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(dir = %dir.display(), "removed partial artifact"),
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => {
                    warn!(dir = %dir.display(), error = %cleanup, "failed to remove partial artifact")
                }
            }
            Err(e)
        }
    }
}

async fn download_into(
    artifact: &ArtifactRef,
    snapshot: &Snapshot,
    dir: &Path,
    cancel: &CancellationToken,
) -> SourceResult<()> {
    let (code, config) = artifact.source().fetch_snapshot(snapshot, cancel).await?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(CODE_FILE), &code).await?;
    tokio::fs::write(dir.join(CONFIG_FILE), &config).await?;
    Ok(())
}

fn short_digest(input: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(input));
    digest.truncate(DIGEST_LEN);
    digest
}

fn snapshot_digest(snapshot: &Snapshot) -> String {
    let code = &snapshot.code_version;
    let config = &snapshot.config_version;
    short_digest(
        format!(
            "{}@{}\n{}@{}",
            code.key, code.version_id, config.key, config.version_id
        )
        .as_bytes(),
    )
}

fn source_digest(source_name: &str) -> String {
    short_digest(source_name.as_bytes())
}

/// Replace anything outside `[A-Za-z0-9._-]` so the name is a single safe
/// path component.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}
