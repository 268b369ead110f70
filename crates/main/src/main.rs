//! 主应用程序入口
//!
//! 启动 WebSocket 网关服务。

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use application::{
    CallService, CallServiceDependencies, FanoutEngine, PinService, PinServiceDependencies,
    SystemClock,
};
use config::AppConfig;
use infrastructure::repository::create_pg_pool;
use infrastructure::{PgPresenceRegistry, PgStorage};
use web_api::{router, AppState, SocketRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();
    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );

    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 运行迁移
    sqlx::migrate!("../../migrations").run(&pg_pool).await?;

    // 存储适配器
    let storage = PgStorage::new(pg_pool.clone());
    let presence: Arc<dyn application::PresenceRegistry> =
        Arc::new(PgPresenceRegistry::new(pg_pool));
    let membership = Arc::new(storage.membership);
    let messages = Arc::new(storage.messages);
    let rooms = Arc::new(storage.rooms);
    let users = Arc::new(storage.users);

    // 传输层注册表是广播能力的唯一实现
    let registry = Arc::new(SocketRegistry::new());
    let fanout = Arc::new(FanoutEngine::new(membership.clone(), registry.clone()));
    let clock: Arc<dyn application::Clock> = Arc::new(SystemClock);

    // 应用层服务
    let pin_service = Arc::new(PinService::new(PinServiceDependencies {
        message_store: messages,
        fanout: fanout.clone(),
        clock: clock.clone(),
    }));
    let call_service = Arc::new(CallService::new(CallServiceDependencies {
        rooms,
        membership,
        users,
        fanout,
        clock,
    }));

    let state = AppState::new(presence, pin_service, call_service, registry);

    // 启动 Web 服务器
    let app = router(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("消息网关启动在 http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
