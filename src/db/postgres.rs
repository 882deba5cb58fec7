use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::db::queries;
use crate::db::repository::{ExtractionProvider, OrderRepository, StateStore, VendorRepository};
use crate::error::RepositoryError;
use crate::models::{
    ExtractionRecord, HistoricalInvoice, PurchaseOrder, RecentInvoiceIndex, VendorProfile,
    WorkflowState,
};

/// 基于 Postgres 的全部协作方实现
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExtractionProvider for PgRepository {
    async fn extraction(&self, document_id: &str) -> Result<Option<ExtractionRecord>, RepositoryError> {
        let row = queries::get_extraction(&self.pool, document_id).await?;
        Ok(row.map(ExtractionRecord::from))
    }
}

#[async_trait]
impl OrderRepository for PgRepository {
    async fn candidate_orders(
        &self,
        vendor_id: Option<&str>,
        vendor_name: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        let rows = queries::list_open_orders(&self.pool, vendor_id, vendor_name).await?;
        Ok(rows.into_iter().filter_map(|r| r.into_order()).collect())
    }
}

#[async_trait]
impl VendorRepository for PgRepository {
    async fn vendor_profile(&self, vendor_id: &str) -> Result<Option<VendorProfile>, RepositoryError> {
        let Some(row) = queries::get_vendor(&self.pool, vendor_id).await? else {
            return Ok(None);
        };
        let historical_amounts = queries::list_vendor_amounts(&self.pool, vendor_id).await?;
        Ok(Some(VendorProfile {
            vendor_id: row.vendor_id,
            vendor_name: row.vendor_name,
            historical_amounts,
            bank_accounts: row.bank_accounts,
            tax_id: row.tax_id,
            payment_terms_days: row.payment_terms_days,
            risk_score: row.risk_score,
        }))
    }

    async fn find_vendor_id(&self, vendor_name: &str) -> Result<Option<String>, RepositoryError> {
        Ok(queries::find_vendor_by_name(&self.pool, vendor_name).await?)
    }

    async fn recent_invoices(
        &self,
        vendor_id: Option<&str>,
        vendor_name: &str,
        since: NaiveDate,
    ) -> Result<RecentInvoiceIndex, RepositoryError> {
        let rows = queries::list_recent_invoices(&self.pool, vendor_id, vendor_name, since).await?;
        Ok(RecentInvoiceIndex::new(
            rows.into_iter().map(HistoricalInvoice::from).collect(),
        ))
    }
}

#[async_trait]
impl StateStore for PgRepository {
    async fn save_terminal(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        // 写入超时控制: 30秒
        let timeout = std::time::Duration::from_secs(30);
        match tokio::time::timeout(timeout, queries::upsert_terminal_state(&self.pool, state)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::error!("✗ terminal state write timed out for document {}", state.document_id);
                Err(RepositoryError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn load(&self, document_id: &str) -> Result<Option<WorkflowState>, RepositoryError> {
        Ok(queries::get_terminal_state(&self.pool, document_id)
            .await?
            .map(|j| j.0))
    }

    async fn clear(&self, document_id: &str) -> Result<(), RepositoryError> {
        let removed = queries::delete_terminal_state(&self.pool, document_id).await?;
        tracing::debug!("Cleared {} stored state rows for document {}", removed, document_id);
        Ok(())
    }

    async fn list_terminal(&self, limit: i64) -> Result<Vec<WorkflowState>, RepositoryError> {
        Ok(queries::list_terminal_states(&self.pool, limit)
            .await?
            .into_iter()
            .map(|j| j.0)
            .collect())
    }
}
