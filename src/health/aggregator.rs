use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::health::probe::{HealthProbe, ProbeKind};
use crate::health::{ComponentHealth, HealthStatus, Status};

/// 汇总多个探测结果为一个整体状态
///
/// 外部依赖全部 down 时整体为 down，部分 down 或任一组件 degraded 时为 degraded。
/// `strict_primary` 打开后主库 down 直接判定整体 down。
pub struct HealthAggregator {
    probes: Vec<Arc<dyn HealthProbe>>,
    timeout: Duration,
    strict_primary: bool,
    started_at: Instant,
}

impl HealthAggregator {
    pub fn new(timeout: Duration, strict_primary: bool) -> Self {
        Self {
            probes: Vec::new(),
            timeout,
            strict_primary,
            started_at: Instant::now(),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.probe_timeout(), config.strict_primary)
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// 并发执行全部探测
    pub async fn check(&self) -> HealthStatus {
        let results = join_all(self.probes.iter().map(|probe| self.run_probe(probe.as_ref()))).await;

        let status = self.aggregate(&results);
        let components = results.into_iter().map(|(_, component)| component).collect();

        HealthStatus {
            status,
            timestamp: Utc::now(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            components,
        }
    }

    async fn run_probe(&self, probe: &dyn HealthProbe) -> (ProbeKind, ComponentHealth) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, probe.probe()).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let (status, message, details) = match outcome {
            Ok(Ok(report)) => (report.status, report.message, report.details),
            Ok(Err(e)) => (Status::Down, Some(e.to_string()), None),
            Err(_) => (
                Status::Down,
                Some(format!("probe timed out after {}ms", self.timeout.as_millis())),
                None,
            ),
        };

        if status != Status::Up {
            tracing::warn!(component = probe.name(), ?status, message = message.as_deref().unwrap_or(""), "Health probe not up");
        }

        (
            probe.kind(),
            ComponentHealth {
                name: probe.name().to_string(),
                status,
                response_time_ms,
                message,
                details,
            },
        )
    }

    fn aggregate(&self, results: &[(ProbeKind, ComponentHealth)]) -> Status {
        let mut dependencies = 0;
        let mut dependencies_down = 0;
        let mut any_not_up = false;

        for (kind, component) in results {
            if component.status != Status::Up {
                any_not_up = true;
            }

            match kind {
                ProbeKind::Primary | ProbeKind::Dependency => {
                    dependencies += 1;
                    if component.status == Status::Down {
                        dependencies_down += 1;
                        if *kind == ProbeKind::Primary && self.strict_primary {
                            return Status::Down;
                        }
                    }
                }
                ProbeKind::Informational => {}
            }
        }

        if dependencies > 0 && dependencies_down == dependencies {
            Status::Down
        } else if any_not_up {
            Status::Degraded
        } else {
            Status::Up
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probe::{ProbeError, ProbeReport};
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        kind: ProbeKind,
        status: Option<Status>,
        delay: Duration,
    }

    #[async_trait]
    impl HealthProbe for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> ProbeKind {
            self.kind
        }

        async fn probe(&self) -> Result<ProbeReport, ProbeError> {
            tokio::time::sleep(self.delay).await;
            match self.status {
                Some(Status::Up) => Ok(ProbeReport::up()),
                Some(_) => Ok(ProbeReport::degraded("slow")),
                None => Err(ProbeError("connection refused".into())),
            }
        }
    }

    fn probe(name: &'static str, kind: ProbeKind, status: Option<Status>) -> Arc<dyn HealthProbe> {
        Arc::new(Fixed {
            name,
            kind,
            status,
            delay: Duration::ZERO,
        })
    }

    fn aggregator(strict: bool) -> HealthAggregator {
        HealthAggregator::new(Duration::from_millis(500), strict)
    }

    #[tokio::test]
    async fn all_up_is_up() {
        let health = aggregator(false)
            .with_probe(probe("database", ProbeKind::Primary, Some(Status::Up)))
            .with_probe(probe("cache", ProbeKind::Dependency, Some(Status::Up)))
            .check()
            .await;
        assert_eq!(health.status, Status::Up);
        assert_eq!(health.components.len(), 2);
    }

    #[tokio::test]
    async fn everything_down_is_down() {
        let health = aggregator(false)
            .with_probe(probe("database", ProbeKind::Primary, None))
            .with_probe(probe("cache", ProbeKind::Dependency, None))
            .with_probe(probe("rate_limiter", ProbeKind::Informational, Some(Status::Degraded)))
            .check()
            .await;
        assert_eq!(health.status, Status::Down);
    }

    #[tokio::test]
    async fn strict_primary_failure_is_down() {
        let health = aggregator(true)
            .with_probe(probe("database", ProbeKind::Primary, None))
            .with_probe(probe("cache", ProbeKind::Dependency, Some(Status::Up)))
            .check()
            .await;
        assert_eq!(health.status, Status::Down);
    }

    #[tokio::test]
    async fn informational_degradation_is_degraded() {
        let health = aggregator(false)
            .with_probe(probe("database", ProbeKind::Primary, Some(Status::Up)))
            .with_probe(probe("rate_limiter", ProbeKind::Informational, Some(Status::Degraded)))
            .check()
            .await;
        assert_eq!(health.status, Status::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out_as_down() {
        let slow: Arc<dyn HealthProbe> = Arc::new(Fixed {
            name: "cache",
            kind: ProbeKind::Dependency,
            status: Some(Status::Up),
            delay: Duration::from_secs(30),
        });
        let health = aggregator(false)
            .with_probe(probe("database", ProbeKind::Primary, Some(Status::Up)))
            .with_probe(slow)
            .check()
            .await;

        let cache = health.component("cache").unwrap();
        assert_eq!(cache.status, Status::Down);
        assert!(cache.message.as_deref().unwrap().contains("timed out"));
        assert_eq!(health.status, Status::Degraded);
    }
}
