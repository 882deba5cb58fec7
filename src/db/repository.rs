//! 协作方接口。
//!
//! 流水线只通过这些只读接口 (以及唯一的终态写入) 访问外部数据，
//! 每个接口都有 Postgres 实现 ([`crate::db::postgres`]) 和内存实现 ([`crate::db::memory`])。

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::RepositoryError;
use crate::models::{
    ExtractedInvoice, ExtractionRecord, PurchaseOrder, RecentInvoiceIndex, VendorProfile,
    WorkflowState,
};

/// 抽取服务 (OCR + 字段抽取的黑盒产出)
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// 返回 `None` 表示该单据尚无抽取记录
    async fn extraction(&self, document_id: &str) -> Result<Option<ExtractionRecord>, RepositoryError>;
}

/// 采购订单仓库
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 供应商范围内未完结的订单
    async fn candidate_orders(
        &self,
        vendor_id: Option<&str>,
        vendor_name: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError>;
}

/// 供应商画像与历史发票
#[async_trait]
pub trait VendorRepository: Send + Sync {
    async fn vendor_profile(&self, vendor_id: &str) -> Result<Option<VendorProfile>, RepositoryError>;

    /// 按名称推断供应商ID
    async fn find_vendor_id(&self, vendor_name: &str) -> Result<Option<String>, RepositoryError>;

    async fn recent_invoices(
        &self,
        vendor_id: Option<&str>,
        vendor_name: &str,
        since: NaiveDate,
    ) -> Result<RecentInvoiceIndex, RepositoryError>;
}

/// 终态存储
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 写入终态并更新单据处理状态
    async fn save_terminal(&self, state: &WorkflowState) -> Result<(), RepositoryError>;

    async fn load(&self, document_id: &str) -> Result<Option<WorkflowState>, RepositoryError>;

    /// 清除上一次运行的结果 (重新处理前调用)
    async fn clear(&self, document_id: &str) -> Result<(), RepositoryError>;

    /// 最近的终态，按完成时间倒序
    async fn list_terminal(&self, limit: i64) -> Result<Vec<WorkflowState>, RepositoryError>;
}

/// 可选的外部匹配复核 (结构化抽取模型)，用于消歧模糊匹配
#[async_trait]
pub trait MatchAdvisor: Send + Sync {
    /// 返回复核后的匹配分；`None` 表示无意见
    async fn confirm(
        &self,
        invoice: &ExtractedInvoice,
        order: &PurchaseOrder,
    ) -> Result<Option<f64>, RepositoryError>;
}
