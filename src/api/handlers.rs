use crate::db::write_decisions_csv;
use crate::models::{StatusSummary, WorkflowState};
use crate::service::WorkflowOrchestrator;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 请求体: 可选的供应商ID
#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub vendor_id: Option<String>,
}

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// 导出参数
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub limit: Option<i64>,
}

fn error_response(status: StatusCode, message: String) -> Response {
    let response = ApiResponse {
        success: false,
        message,
    };
    (status, Json(response)).into_response()
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 处理单据，返回完整终态
pub async fn process_document(
    State(orchestrator): State<Arc<WorkflowOrchestrator>>,
    Path(document_id): Path<String>,
    body: Option<Json<ProcessRequest>>,
) -> Json<WorkflowState> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Json(orchestrator.process(&document_id, req.vendor_id).await)
}

/// 清除旧结果后重新处理
pub async fn reprocess_document(
    State(orchestrator): State<Arc<WorkflowOrchestrator>>,
    Path(document_id): Path<String>,
    body: Option<Json<ProcessRequest>>,
) -> Json<WorkflowState> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Json(orchestrator.reprocess(&document_id, req.vendor_id).await)
}

/// 查询最后一次终态摘要
pub async fn document_status(
    State(orchestrator): State<Arc<WorkflowOrchestrator>>,
    Path(document_id): Path<String>,
) -> Response {
    match orchestrator.status(&document_id).await {
        Ok(Some(summary)) => (StatusCode::OK, Json::<StatusSummary>(summary)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("No result recorded for document {}", document_id),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)),
    }
}

/// 导出最近的决策 (CSV)
pub async fn export_decisions(
    State(orchestrator): State<Arc<WorkflowOrchestrator>>,
    Query(query): Query<ExportQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(1000).clamp(1, 10_000);
    let states = match orchestrator.recent_states(limit).await {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)),
    };

    let mut buf = Vec::new();
    if let Err(e) = write_decisions_csv(&states, &mut buf) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e));
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        buf,
    )
        .into_response()
}
