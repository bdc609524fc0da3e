use std::net::{IpAddr, SocketAddr};

use tenant_core::{
    AppState, config::Config, lifecycle::Shutdown, observability, tenant::spawn_sweeper,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    let metrics = match observability::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder, /metrics disabled");
            None
        }
    };

    // 关闭信号
    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.trigger();
        });
    }

    // 设置应用状态
    let state = AppState::init(config, &shutdown).await?;

    // 后台预热，不阻塞启动
    {
        let state = state.clone();
        tokio::spawn(async move {
            state.warm_up().await;
        });
    }

    let sweeper = spawn_sweeper(
        state.registry.clone(),
        state.config.registry.sweep_interval(),
        shutdown.subscribe(),
    );

    let app = state.router(metrics);

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server.host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server.port,
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let mut signal = shutdown.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { signal.triggered().await })
    .await?;

    // 服务器已经停止接收请求，依次回收资源
    shutdown.trigger();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweeper task ended abnormally");
    }
    state.registry.close_all().await;
    state.pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
