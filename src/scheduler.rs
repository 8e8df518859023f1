use crate::prelude::*;

use anyhow::Result;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Polls every device at the configured interval.
pub struct Scheduler {
    interval: Duration,
    devices: Vec<Arc<dyn Device>>,
}

impl Scheduler {
    pub fn new(config: &ConfigWrapper, devices: Vec<Arc<dyn Device>>) -> Self {
        Self {
            interval: config.scheduler().interval(),
            devices,
        }
    }

    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        // a slow poll delays the next one rather than stacking them up
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "polling {} devices every {}s",
            self.devices.len(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("scheduler: received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    self.poll_all().await;
                }
            }
        }

        Ok(())
    }

    /// One concurrent poll of every device.
    pub async fn poll_all(&self) -> Vec<(String, crate::error::Result<Arc<Snapshot>>)> {
        let polls = self.devices.iter().map(|device| async move {
            let result = device.read_all_data().await;
            match &result {
                Ok(snapshot) => {
                    info!(
                        "{}: {} values, {} unavailable",
                        device.name(),
                        snapshot.len(),
                        snapshot.unavailable.len()
                    );
                    debug!("{}: {}", device.name(), snapshot.to_json());
                }
                Err(e) => error!("{}: poll failed: {}", device.name(), e),
            }
            (device.name().to_string(), result)
        });

        futures::future::join_all(polls).await
    }
}
