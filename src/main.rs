use axum::{routing::{get, post}, Router};
use invoice_reconcile::{api, create_pool, AppConfig, Collaborators, PgRepository, WorkflowOrchestrator};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    // 所有协作方均由 Postgres 提供，暂无外部匹配复核
    let repo = Arc::new(PgRepository::new(pool));
    let collaborators = Collaborators {
        extraction: repo.clone(),
        orders: repo.clone(),
        vendors: repo.clone(),
        store: repo,
        advisor: None,
    };
    let orchestrator = Arc::new(WorkflowOrchestrator::new(collaborators, config.pipeline.clone()));

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/documents/:document_id/process", post(api::process_document))
        .route("/api/documents/:document_id/reprocess", post(api::reprocess_document))
        .route("/api/documents/:document_id/status", get(api::document_status))
        .route("/api/decisions/export", get(api::export_decisions))
        .with_state(orchestrator)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/documents/:id/process    - run the reconciliation pipeline");
    info!("  POST /api/documents/:id/reprocess  - clear prior results and run again");
    info!("  GET  /api/documents/:id/status     - last recorded outcome");
    info!("  GET  /api/decisions/export         - recent decisions as CSV");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
