//! 内存实现 - 本地运行与测试使用。
//!
//! 每个仓库都可以通过 `set_unavailable(true)` 模拟协作方故障。

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::db::repository::{
    ExtractionProvider, MatchAdvisor, OrderRepository, StateStore, VendorRepository,
};
use crate::error::RepositoryError;
use crate::models::{
    ExtractedInvoice, ExtractionRecord, HistoricalInvoice, PurchaseOrder, RecentInvoiceIndex,
    VendorProfile, WorkflowState,
};
use crate::service::fingerprint::normalize;

fn check(flag: &AtomicBool, name: &str) -> Result<(), RepositoryError> {
    if flag.load(Ordering::SeqCst) {
        return Err(RepositoryError::Unavailable(name.to_string()));
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryExtractionProvider {
    records: DashMap<String, ExtractionRecord>,
    unavailable: AtomicBool,
}

impl InMemoryExtractionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ExtractionRecord) {
        self.records.insert(record.document_id.clone(), record);
    }

    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionProvider for InMemoryExtractionProvider {
    async fn extraction(&self, document_id: &str) -> Result<Option<ExtractionRecord>, RepositoryError> {
        check(&self.unavailable, "extraction provider")?;
        Ok(self.records.get(document_id).map(|r| r.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<String, PurchaseOrder>,
    unavailable: AtomicBool,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: PurchaseOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn candidate_orders(
        &self,
        vendor_id: Option<&str>,
        vendor_name: &str,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        check(&self.unavailable, "order repository")?;
        let name = normalize(vendor_name);
        let mut orders: Vec<PurchaseOrder> = self
            .orders
            .iter()
            .filter(|o| o.status.is_matchable())
            .filter(|o| match vendor_id {
                None => true,
                Some(id) => o.vendor_id.as_deref() == Some(id) || normalize(&o.vendor_name) == name,
            })
            .map(|o| o.value().clone())
            .collect();
        // DashMap 无序，排序以保证确定性
        orders.sort_by(|a, b| {
            b.order_date
                .cmp(&a.order_date)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(orders)
    }
}

#[derive(Default)]
pub struct InMemoryVendorRepository {
    profiles: DashMap<String, VendorProfile>,
    history: DashMap<String, HistoricalInvoice>,
    unavailable: AtomicBool,
}

impl InMemoryVendorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&self, profile: VendorProfile) {
        self.profiles.insert(profile.vendor_id.clone(), profile);
    }

    pub fn record_invoice(&self, invoice: HistoricalInvoice) {
        self.history.insert(invoice.document_id.clone(), invoice);
    }

    pub fn remove_invoice(&self, document_id: &str) {
        self.history.remove(document_id);
    }

    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl VendorRepository for InMemoryVendorRepository {
    async fn vendor_profile(&self, vendor_id: &str) -> Result<Option<VendorProfile>, RepositoryError> {
        check(&self.unavailable, "vendor repository")?;
        Ok(self.profiles.get(vendor_id).map(|p| p.clone()))
    }

    async fn find_vendor_id(&self, vendor_name: &str) -> Result<Option<String>, RepositoryError> {
        check(&self.unavailable, "vendor repository")?;
        let name = normalize(vendor_name);
        let mut ids: Vec<String> = self
            .profiles
            .iter()
            .filter(|p| normalize(&p.vendor_name) == name)
            .map(|p| p.vendor_id.clone())
            .collect();
        ids.sort();
        Ok(ids.into_iter().next())
    }

    async fn recent_invoices(
        &self,
        vendor_id: Option<&str>,
        vendor_name: &str,
        since: NaiveDate,
    ) -> Result<RecentInvoiceIndex, RepositoryError> {
        check(&self.unavailable, "vendor repository")?;
        let mut entries: Vec<HistoricalInvoice> = self
            .history
            .iter()
            .filter(|e| e.is_same_vendor(vendor_id, vendor_name))
            .filter(|e| e.invoice_date.map_or(true, |d| d >= since))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(RecentInvoiceIndex::new(entries))
    }
}

/// 终态存储，记录每个单据的写入次数
#[derive(Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, WorkflowState>,
    writes: DashMap<String, usize>,
    unavailable: AtomicBool,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self, document_id: &str) -> usize {
        self.writes.get(document_id).map(|c| *c).unwrap_or(0)
    }

    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_terminal(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        check(&self.unavailable, "state store")?;
        self.states.insert(state.document_id.clone(), state.clone());
        *self.writes.entry(state.document_id.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn load(&self, document_id: &str) -> Result<Option<WorkflowState>, RepositoryError> {
        check(&self.unavailable, "state store")?;
        Ok(self.states.get(document_id).map(|s| s.clone()))
    }

    async fn clear(&self, document_id: &str) -> Result<(), RepositoryError> {
        check(&self.unavailable, "state store")?;
        self.states.remove(document_id);
        Ok(())
    }

    async fn list_terminal(&self, limit: i64) -> Result<Vec<WorkflowState>, RepositoryError> {
        check(&self.unavailable, "state store")?;
        let mut states: Vec<WorkflowState> = self.states.iter().map(|s| s.value().clone()).collect();
        states.sort_by(|a, b| {
            b.metadata
                .finished_at
                .cmp(&a.metadata.finished_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        states.truncate(limit.max(0) as usize);
        Ok(states)
    }
}

/// 固定返回值的复核器，统计调用次数
pub struct FixedAdvisor {
    score: Option<f64>,
    calls: AtomicUsize,
}

impl FixedAdvisor {
    pub fn new(score: Option<f64>) -> Self {
        Self {
            score,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchAdvisor for FixedAdvisor {
    async fn confirm(
        &self,
        _invoice: &ExtractedInvoice,
        _order: &PurchaseOrder,
    ) -> Result<Option<f64>, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.score)
    }
}
