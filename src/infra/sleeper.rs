use std::time::Duration;

use async_trait::async_trait;

use crate::app::ports::SleeperPort;

/// Real wall-clock waits for the inference pacing and retry backoff
pub struct TokioSleeper;

#[async_trait]
impl SleeperPort for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
