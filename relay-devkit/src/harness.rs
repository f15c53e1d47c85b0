/*!
Test harness helpers: logging set-up and polling waits.
*/

use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};

/// Routes `log` output to stderr for the test run. Safe to call repeatedly.
pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Polls `condition` every 25ms until it returns `true` or `timeout` expires.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if condition().await {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            log::warn!("⏰ condition still false after {timeout:?}");
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
