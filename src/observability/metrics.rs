//! 指标定义
//!
//! 所有指标都在这里声明，业务代码通过 `metrics::counter!(DEF.name)` 记录。

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache_hit_total",
    metric_type: MetricType::Counter,
    description: "Cache reads that returned a live entry",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache_miss_total",
    metric_type: MetricType::Counter,
    description: "Cache reads that found nothing or an expired entry",
};

pub const CACHE_ERROR: MetricDef = MetricDef {
    name: "cache_error_total",
    metric_type: MetricType::Counter,
    description: "Cache backend calls that failed, labelled by op",
};

pub const RATE_LIMIT_ALLOWED: MetricDef = MetricDef {
    name: "rate_limit_allowed_total",
    metric_type: MetricType::Counter,
    description: "Requests admitted by the rate limiter",
};

pub const RATE_LIMIT_REJECTED: MetricDef = MetricDef {
    name: "rate_limit_rejected_total",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the rate limiter",
};

pub const RATE_LIMIT_FAIL_OPEN: MetricDef = MetricDef {
    name: "rate_limit_fail_open_total",
    metric_type: MetricType::Counter,
    description: "Requests admitted because the counter store was unavailable",
};

pub const TENANT_CONNECT: MetricDef = MetricDef {
    name: "tenant_connect_total",
    metric_type: MetricType::Counter,
    description: "Tenant connection establishments, labelled by outcome",
};

pub const TENANT_EVICT: MetricDef = MetricDef {
    name: "tenant_evict_total",
    metric_type: MetricType::Counter,
    description: "Tenant connections closed, labelled by reason",
};

pub const TENANT_CAPACITY_REJECTED: MetricDef = MetricDef {
    name: "tenant_capacity_rejected_total",
    metric_type: MetricType::Counter,
    description: "Resolves refused because every open connection was borrowed",
};

pub const TENANT_OPEN_CONNECTIONS: MetricDef = MetricDef {
    name: "tenant_open_connections",
    metric_type: MetricType::Gauge,
    description: "Currently open tenant connections",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_ERROR,
    RATE_LIMIT_ALLOWED,
    RATE_LIMIT_REJECTED,
    RATE_LIMIT_FAIL_OPEN,
    TENANT_CONNECT,
    TENANT_EVICT,
    TENANT_CAPACITY_REJECTED,
    TENANT_OPEN_CONNECTIONS,
];

/// 安装全局 Prometheus 记录器并注册指标描述
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
        }
    }

    tracing::info!(metrics = ALL_METRICS.len(), "Prometheus recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prometheus_safe() {
        let mut seen = HashSet::new();
        for def in ALL_METRICS {
            assert!(seen.insert(def.name), "duplicate metric {}", def.name);
            assert!(
                def.name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_'),
                "bad metric name {}",
                def.name
            );
        }
    }
}
