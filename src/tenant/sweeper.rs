use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::ShutdownSignal;
use crate::tenant::{TenantConnector, TenantRegistry};

/// 启动后台空闲连接清理任务，收到关闭信号后退出
pub fn spawn_sweeper<C: TenantConnector>(
    registry: TenantRegistry<C>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一次 tick 立即完成，跳过
        ticker.tick().await;

        tracing::info!(interval_secs = interval.as_secs(), "Tenant connection sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = registry.sweep().await;
                    if closed > 0 {
                        let stats = registry.stats();
                        tracing::info!(closed, open = stats.open_connections, "Idle tenant connections swept");
                    }
                }
                _ = shutdown.triggered() => {
                    tracing::info!("Tenant connection sweeper stopping");
                    break;
                }
            }
        }
    })
}
