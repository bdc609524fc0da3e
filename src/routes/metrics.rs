use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus 文本格式
pub async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
