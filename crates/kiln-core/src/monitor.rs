//! System/resource monitor.
//!
//! Samples CPU, memory, swap, disk, and network at a fixed interval and
//! publishes snapshots on the event bus, folding in running token-usage
//! totals. Strictly observational; nothing here can affect ingestion,
//! retrieval, or training.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use kiln_llm::TokenUsage;

use crate::events::{Event, EventBus};

/// Point-in-time resource snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    /// Global CPU utilization in percent.
    pub cpu_usage: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub swap_used: u64,
    pub swap_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub network_received: u64,
    pub network_transmitted: u64,
    /// Cumulative generation token usage since process start.
    pub tokens: TokenUsage,
}

fn collect(sys: &System, tokens: TokenUsage) -> SystemStats {
    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_available) = disks
        .iter()
        .fold((0u64, 0u64), |(total, avail), disk| {
            (total + disk.total_space(), avail + disk.available_space())
        });

    let networks = Networks::new_with_refreshed_list();
    let (network_received, network_transmitted) = networks
        .iter()
        .fold((0u64, 0u64), |(rx, tx), (_, data)| {
            (rx + data.total_received(), tx + data.total_transmitted())
        });

    SystemStats {
        cpu_usage: sys.global_cpu_usage(),
        memory_used: sys.used_memory(),
        memory_total: sys.total_memory(),
        swap_used: sys.used_swap(),
        swap_total: sys.total_swap(),
        disk_used: disk_total.saturating_sub(disk_available),
        disk_total,
        network_received,
        network_transmitted,
        tokens,
    }
}

/// Take a single snapshot. Two CPU refreshes are needed for a meaningful
/// utilization figure, so this waits the minimum update interval in between.
pub async fn sample_once(tokens: TokenUsage) -> SystemStats {
    let mut sys = System::new_all();
    sys.refresh_all();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    collect(&sys, tokens)
}

/// Periodic sampler driving `Event::SystemStats` on the bus.
#[derive(Debug)]
pub struct SystemMonitor {
    interval: Duration,
}

impl SystemMonitor {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run the sampling loop until `shutdown` flips to `true` or its sender
    /// is dropped. Every snapshot carries the bus-wide token totals, so the
    /// stream agrees with one-shot [`sample_once`] calls fed the same
    /// totals.
    pub fn spawn(
        self,
        bus: Arc<EventBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sys = System::new_all();
            sys.refresh_all();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sys.refresh_all();
                        let stats = collect(&sys, bus.token_totals());
                        tracing::trace!(cpu = stats.cpu_usage, "system snapshot");
                        bus.publish(Event::SystemStats(stats));
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("system monitor stopped");
        })
    }
}
