//! Deadline racing and the degrading-call wrapper used at every external
//! call site.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tracing::warn;

pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(20_000);

/// Result of racing an operation against a deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    Completed(T),
    /// The deadline won; carries the synthesized fallback.
    TimedOut(T),
}

impl<T> Guarded<T> {
    pub fn timed_out(&self) -> bool {
        matches!(self, Guarded::TimedOut(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Guarded::Completed(v) | Guarded::TimedOut(v) => v,
        }
    }
}

/// Races `operation` against `deadline`.
///
/// The operation runs on its own task. When the deadline wins the task is
/// left running and its eventual output is dropped; nothing is cancelled on
/// the remote side. A panic inside the operation comes back as `Err`.
pub async fn with_timeout<F, D>(
    operation: F,
    deadline: Duration,
    on_timeout: D,
) -> Result<Guarded<F::Output>, JoinError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    D: FnOnce() -> F::Output,
{
    let handle = tokio::spawn(operation);
    match tokio::time::timeout(deadline, handle).await {
        Ok(joined) => joined.map(Guarded::Completed),
        Err(_elapsed) => Ok(Guarded::TimedOut(on_timeout())),
    }
}

/// Awaits `operation`, replacing any error with `default` after logging it
/// under `tag`. Retry policy, if ever added, belongs here.
pub async fn degrade<T, E, F>(tag: &'static str, default: T, operation: F) -> T
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match operation.await {
        Ok(value) => value,
        Err(e) => {
            warn!(tag, error = %e, "⚠️ External call failed, using degraded result");
            default
        }
    }
}
