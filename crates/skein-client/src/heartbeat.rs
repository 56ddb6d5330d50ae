//! Client heartbeat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::errors::ClientError;

/// Sends one liveness check. The default sends a ping frame; replace it to
/// check with an application event instead.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    /// Check once. An error ends the session.
    async fn beat(&self, client: &Client) -> Result<(), ClientError>;
}

/// Default heartbeat: a ping frame in the session's protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct PingHeartbeat;

#[async_trait]
impl Heartbeat for PingHeartbeat {
    async fn beat(&self, client: &Client) -> Result<(), ClientError> {
        client.ping().await
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug)]
pub enum HeartbeatResult {
    /// A beat failed.
    Failed(ClientError),
    /// The session ended first.
    Cancelled,
}

/// Beat every `interval` until a beat fails or `cancel` fires. The first beat
/// goes out one interval after the session opens.
pub async fn run_heartbeat(
    client: Client,
    heartbeat: Arc<dyn Heartbeat>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = heartbeat.beat(&client).await {
                    return HeartbeatResult::Failed(e);
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}
