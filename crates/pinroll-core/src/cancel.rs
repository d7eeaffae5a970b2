//! Cooperative cancellation at suspension points.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Marker error produced when a [`CancellationToken`] fires first.
///
/// Crate error types implement `From<Cancelled>` so [`cancellable`] can be
/// used with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Race `fut` against `cancel`. A token that is already cancelled wins
/// without polling `fut`.
pub async fn cancellable<F, T, E>(cancel: &CancellationToken, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Cancelled>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled.into()),
        result = fut => result,
    }
}
