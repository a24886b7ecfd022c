use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AppError;

/// Attempts for idempotent reads. Writes never go through here.
pub const READ_ATTEMPTS: u32 = 3;

const BASE_DELAY_MS: u64 = 50;

/// Runs `f` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is reached. Delays double per attempt with up to 20ms of
/// jitter.
pub async fn with_backoff<F, Fut, R>(max_attempts: u32, mut f: F) -> Result<R, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt + 1 < max_attempts => {
                let jitter = rand::rng().random_range(0..20);
                let delay = Duration::from_millis(BASE_DELAY_MS * (1 << attempt) + jitter);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient storage error; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_)
    )
}
