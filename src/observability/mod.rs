//! 可观测性：指标定义与 Prometheus 导出

pub mod metrics;

pub use self::metrics::{MetricDef, MetricType, init_metrics};
