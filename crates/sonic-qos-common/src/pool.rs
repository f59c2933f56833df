//! Bounded worker pool for fanning out independent per-device work.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{HarnessError, HarnessResult};

/// Default number of concurrent units.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Runs every unit with at most `max_workers` in flight.
///
/// All units are joined even when some fail, so a failing stop command on
/// one device never leaves the others half-done. The first failure observed
/// is returned after everything has finished; on success the outputs come
/// back in submission order.
pub async fn run_bounded<T, Fut>(max_workers: usize, units: Vec<Fut>) -> HarnessResult<Vec<T>>
where
    T: Send + 'static,
    Fut: Future<Output = HarnessResult<T>> + Send + 'static,
{
    let total = units.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut in_flight = JoinSet::new();

    for (idx, unit) in units.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        in_flight.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| HarnessError::worker(format!("worker pool closed: {}", e)))?;
            unit.await.map(|out| (idx, out))
        });
    }

    let mut outputs = Vec::with_capacity(total);
    let mut first_error = None;

    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(Ok(out)) => outputs.push(out),
            Ok(Err(e)) => {
                warn!(error = %e, "Worker unit failed");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                warn!(error = %e, "Worker unit panicked or was cancelled");
                first_error.get_or_insert(HarnessError::worker(e.to_string()));
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    outputs.sort_by_key(|(idx, _)| *idx);
    Ok(outputs.into_iter().map(|(_, out)| out).collect())
}
