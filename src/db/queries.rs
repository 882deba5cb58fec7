use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::models::{
    ExtractedInvoice, ExtractionRecord, HistoricalInvoice, LineItem, OrderStatus, PurchaseOrder,
    WorkflowState,
};

/// 抽取结果行
#[derive(Debug, FromRow)]
pub struct ExtractionRow {
    pub document_id: String,
    pub completed: bool,
    pub invoice: Option<Json<ExtractedInvoice>>,
    pub confidence: Option<Json<indexmap::IndexMap<String, f64>>>,
    pub error: Option<String>,
}

impl From<ExtractionRow> for ExtractionRecord {
    fn from(row: ExtractionRow) -> Self {
        Self {
            document_id: row.document_id,
            completed: row.completed,
            invoice: row.invoice.map(|j| j.0),
            confidence: row.confidence.map(|j| j.0).unwrap_or_default(),
            error: row.error,
        }
    }
}

/// 采购订单行
#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub order_id: String,
    pub order_number: String,
    pub vendor_id: Option<String>,
    pub vendor_name: String,
    pub order_date: NaiveDate,
    pub currency: String,
    pub total: BigDecimal,
    pub line_items: Json<Vec<LineItem>>,
    pub status: String,
}

impl OrderRow {
    pub fn into_order(self) -> Option<PurchaseOrder> {
        let Some(status) = OrderStatus::parse(&self.status) else {
            tracing::warn!("Order {} has unknown status '{}', skipping", self.order_id, self.status);
            return None;
        };
        Some(PurchaseOrder {
            order_id: self.order_id,
            order_number: self.order_number,
            vendor_id: self.vendor_id,
            vendor_name: self.vendor_name,
            order_date: self.order_date,
            currency: self.currency,
            total: self.total,
            line_items: self.line_items.0,
            status,
        })
    }
}

/// 供应商主表行
#[derive(Debug, FromRow)]
pub struct VendorRow {
    pub vendor_id: String,
    pub vendor_name: String,
    pub bank_accounts: Vec<String>,
    pub tax_id: Option<String>,
    pub payment_terms_days: Option<i32>,
    pub risk_score: f64,
}

/// 历史发票行
#[derive(Debug, FromRow)]
pub struct HistoryRow {
    pub document_id: String,
    pub vendor_id: Option<String>,
    pub vendor_name: String,
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub currency: String,
    pub total: BigDecimal,
    pub line_items: Json<Vec<LineItem>>,
    pub content_hash: String,
}

impl From<HistoryRow> for HistoricalInvoice {
    fn from(row: HistoryRow) -> Self {
        Self {
            document_id: row.document_id,
            vendor_id: row.vendor_id,
            vendor_name: row.vendor_name,
            invoice_number: row.invoice_number,
            invoice_date: row.invoice_date,
            currency: row.currency,
            total: row.total,
            line_items: row.line_items.0,
            content_hash: row.content_hash,
        }
    }
}

/// 查询单据的抽取结果
pub async fn get_extraction(
    pool: &PgPool,
    document_id: &str,
) -> Result<Option<ExtractionRow>, sqlx::Error> {
    sqlx::query_as::<_, ExtractionRow>(
        r#"
        SELECT document_id, completed, invoice, confidence, error
        FROM invoice_extractions
        WHERE document_id = $1
        "#
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await
}

/// 查询候选订单 (未完结，按订单日期降序)
pub async fn list_open_orders(
    pool: &PgPool,
    vendor_id: Option<&str>,
    vendor_name: &str,
) -> Result<Vec<OrderRow>, sqlx::Error> {
    sqlx::query_as::<_, OrderRow>(
        r#"
        SELECT order_id, order_number, vendor_id, vendor_name, order_date,
               currency, total, line_items, status
        FROM purchase_orders
        WHERE status IN ('open', 'partially_fulfilled')
          AND ($1::text IS NULL
               OR vendor_id = $1
               OR lower(vendor_name) = lower($2))
        ORDER BY order_date DESC, order_id
        LIMIT 500
        "#
    )
    .bind(vendor_id)
    .bind(vendor_name)
    .fetch_all(pool)
    .await
}

/// 查询供应商主表
pub async fn get_vendor(pool: &PgPool, vendor_id: &str) -> Result<Option<VendorRow>, sqlx::Error> {
    sqlx::query_as::<_, VendorRow>(
        r#"
        SELECT vendor_id, vendor_name, bank_accounts, tax_id, payment_terms_days, risk_score
        FROM vendors
        WHERE vendor_id = $1
        "#
    )
    .bind(vendor_id)
    .fetch_optional(pool)
    .await
}

/// 按名称 (忽略大小写) 查找供应商ID
pub async fn find_vendor_by_name(pool: &PgPool, vendor_name: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT vendor_id
        FROM vendors
        WHERE lower(vendor_name) = lower($1)
        ORDER BY vendor_id
        LIMIT 1
        "#
    )
    .bind(vendor_name.trim())
    .fetch_optional(pool)
    .await
}

/// 供应商历史发票金额 (用于金额基线)
pub async fn list_vendor_amounts(pool: &PgPool, vendor_id: &str) -> Result<Vec<BigDecimal>, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT total
        FROM invoice_history
        WHERE vendor_id = $1
        ORDER BY invoice_date DESC NULLS LAST
        LIMIT 200
        "#
    )
    .bind(vendor_id)
    .fetch_all(pool)
    .await
}

/// 近期历史发票
pub async fn list_recent_invoices(
    pool: &PgPool,
    vendor_id: Option<&str>,
    vendor_name: &str,
    since: NaiveDate,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT document_id, vendor_id, vendor_name, invoice_number, invoice_date,
               currency, total, line_items, content_hash
        FROM invoice_history
        WHERE (vendor_id = $1 OR lower(vendor_name) = lower($2))
          AND (invoice_date IS NULL OR invoice_date >= $3)
        ORDER BY invoice_date DESC NULLS LAST, document_id
        "#
    )
    .bind(vendor_id)
    .bind(vendor_name)
    .bind(since)
    .fetch_all(pool)
    .await
}

/// 写入终态 + 更新单据处理状态 (同一事务)
pub async fn upsert_terminal_state(pool: &PgPool, state: &WorkflowState) -> Result<(), sqlx::Error> {
    let decision = state.decision.as_ref().map(|d| d.kind.as_str());
    let requires_review = state
        .decision
        .as_ref()
        .map(|d| d.requires_manual_review)
        .unwrap_or(true);

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO document_states (document_id, status, decision, requires_manual_review, state, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (document_id) DO UPDATE
        SET status = EXCLUDED.status,
            decision = EXCLUDED.decision,
            requires_manual_review = EXCLUDED.requires_manual_review,
            state = EXCLUDED.state,
            updated_at = EXCLUDED.updated_at
        "#
    )
    .bind(&state.document_id)
    .bind(state.status.as_str())
    .bind(decision)
    .bind(requires_review)
    .bind(Json(state))
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE documents SET processing_status = $2 WHERE document_id = $1")
        .bind(&state.document_id)
        .bind(state.status.as_str())
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// 读取终态载荷
pub async fn get_terminal_state(
    pool: &PgPool,
    document_id: &str,
) -> Result<Option<Json<WorkflowState>>, sqlx::Error> {
    sqlx::query_scalar::<_, Json<WorkflowState>>(
        "SELECT state FROM document_states WHERE document_id = $1",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await
}

/// 删除终态
pub async fn delete_terminal_state(pool: &PgPool, document_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM document_states WHERE document_id = $1")
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// 最近的终态列表
pub async fn list_terminal_states(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<Json<WorkflowState>>, sqlx::Error> {
    sqlx::query_scalar::<_, Json<WorkflowState>>(
        "SELECT state FROM document_states ORDER BY updated_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
