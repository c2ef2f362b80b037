use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use governance::{
    AppState, build_router, cache::CacheStore, clock::system_clock, config::Config,
    maintenance::spawn_maintenance,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    // 初始化日志
    init_tracing();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置缓存，redis 不可达时以降级状态启动
    let clock = system_clock();
    let cache = CacheStore::connect(&config, clock.clone())
        .await
        .expect("Failed to create cache client");

    // 设置应用状态
    let state = AppState::new(config.clone(), Arc::new(cache), clock);
    tracing::info!(
        default_limit = ?config.rate_limit.default_limit,
        policy = ?config.admission_policy(),
        retention = %config.metrics.retention,
        "Governance initialized"
    );

    let maintenance = spawn_maintenance(state.clone(), config.maintenance_interval());

    // 业务路由由上层挂载，这里只提供运维接口
    let router = build_router(state.clone(), Router::new());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        // 设置开发环境的CORS，允许所有来源
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    maintenance.abort();
    tracing::info!("Server stopped");
}
