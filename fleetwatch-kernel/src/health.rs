use crate::state::{Fleets, SharedFleets};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tracing::{debug, warn};

pub const HEALTH_TOPIC: &str = "fleetwatch/kernel/health@v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub collections: u32,
    pub assets_tracked: u32,
    pub assets_down: u32,
    pub incidents_logged: u32,
    pub snapshots_applied: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, fleets: &Fleets) -> KernelHealth {
        let mut health = KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            collections: fleets.len() as u32,
            assets_tracked: 0,
            assets_down: 0,
            incidents_logged: 0,
            snapshots_applied: 0,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        };
        for engine in fleets.engines() {
            health.assets_tracked += engine.store().len() as u32;
            health.assets_down += engine.down_count() as u32;
            health.incidents_logged += engine.incident_count() as u32;
            health.snapshots_applied += engine.snapshots_applied();
        }
        health
    }

    /// Publication du health kernel toutes les 30s sur le client partagé
    /// (l'eventloop est piloté par le listener MQTT).
    pub fn spawn_health_publisher(&self, client: AsyncClient, fleets: SharedFleets) {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let health = health_tracker.get_health(&fleets.lock());
                let payload = match serde_json::to_string(&health) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[health] serialization failed: {e}");
                        continue;
                    }
                };
                match client.publish(HEALTH_TOPIC, QoS::AtLeastOnce, false, payload).await {
                    Ok(()) => debug!(
                        uptime = health.uptime_seconds,
                        assets = health.assets_tracked,
                        down = health.assets_down,
                        "[health] published kernel health"
                    ),
                    Err(e) => warn!("[health] failed to publish: {e:?}"),
                }
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb) = line.split_whitespace().nth(1).and_then(|s| s.parse::<u64>().ok()) {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::models::WireAssetRecord;
    use time::macros::datetime;

    #[test]
    fn health_aggregates_every_collection() {
        let mut fleets = Fleets::from_config(&KernelConfig::default());
        let now = datetime!(2024-05-01 10:00 UTC);
        let record = |id: &str, status: &str| WireAssetRecord {
            id: Some(id.into()),
            status: Some(status.into()),
            ..Default::default()
        };
        fleets.get_mut("cameras").unwrap().apply_snapshot(vec![record("CAM-1", "offline"), record("CAM-2", "working")], now);
        fleets.get_mut("rt_inventory").unwrap().apply_snapshot(vec![record("RT-1", "offline")], now);

        let tracker = HealthTracker::new();
        let health = tracker.get_health(&fleets);
        assert_eq!(health.collections, 2);
        assert_eq!(health.assets_tracked, 3);
        assert_eq!(health.assets_down, 2);
        assert_eq!(health.snapshots_applied, 2);
        assert_eq!(health.mqtt_status, "connecting");
    }

    #[test]
    fn reconnects_are_counted() {
        let tracker = HealthTracker::new();
        tracker.increment_reconnects();
        tracker.increment_reconnects();
        let fleets = Fleets::from_config(&KernelConfig::default());
        let health = tracker.get_health(&fleets);
        assert_eq!(health.mqtt_reconnects, 2);
        assert_eq!(health.mqtt_status, "reconnecting");

        tracker.mark_mqtt_connected();
        assert_eq!(tracker.get_health(&fleets).mqtt_status, "connected");
    }
}
