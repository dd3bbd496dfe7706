use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

const MAX_ATTEMPTS: u32 = 5;
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Retries a failing `Store` call up to 5 times at 5-second intervals
/// before surfacing the error, per the core's database-failure recovery
/// policy. Successes on the first try never sleep.
pub async fn with_retry<T, F, Fut>(operation_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    "database operation failed, retrying"
                );
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                error!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    critical = true,
                    "database operation exhausted retries"
                );
                return Err(e);
            }
        }
    }
}
