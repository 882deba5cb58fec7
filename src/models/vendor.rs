use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ExtractedInvoice, LineItem};
use crate::service::fingerprint;

/// 供应商风险画像 (只读，由外部协作方维护)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorProfile {
    pub vendor_id: String,
    pub vendor_name: String,
    /// 历史发票金额，用于金额异常基线
    #[serde(default)]
    pub historical_amounts: Vec<BigDecimal>,
    #[serde(default)]
    pub bank_accounts: Vec<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub payment_terms_days: Option<i32>,
    /// 累计风险分 [0,1]
    #[serde(default)]
    pub risk_score: f64,
}

impl VendorProfile {
    pub fn is_new(&self) -> bool {
        self.historical_amounts.is_empty()
    }
}

/// 近期已处理发票
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalInvoice {
    pub document_id: String,
    #[serde(default)]
    pub vendor_id: Option<String>,
    pub vendor_name: String,
    pub invoice_number: String,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    pub currency: String,
    pub total: BigDecimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub content_hash: String,
}

impl HistoricalInvoice {
    pub fn from_invoice(
        document_id: impl Into<String>,
        vendor_id: Option<String>,
        invoice: &ExtractedInvoice,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            vendor_id,
            vendor_name: invoice.vendor_name.clone(),
            invoice_number: invoice.invoice_number.clone(),
            invoice_date: invoice.invoice_date,
            currency: invoice.currency.clone(),
            total: invoice.total.clone(),
            line_items: invoice.line_items.clone(),
            content_hash: fingerprint::content_hash(invoice),
        }
    }

    /// 重建为发票结构，用于特征向量计算
    pub fn as_invoice(&self) -> ExtractedInvoice {
        ExtractedInvoice {
            invoice_number: self.invoice_number.clone(),
            vendor_name: self.vendor_name.clone(),
            po_number: None,
            invoice_date: self.invoice_date,
            currency: self.currency.clone(),
            total: self.total.clone(),
            line_items: self.line_items.clone(),
            bank_account: None,
            tax_id: None,
            payment_terms_days: None,
        }
    }

    /// 同一供应商判定：双方都有ID时比ID，否则比规范化名称
    pub fn is_same_vendor(&self, vendor_id: Option<&str>, vendor_name: &str) -> bool {
        match (self.vendor_id.as_deref(), vendor_id) {
            (Some(a), Some(b)) => a == b,
            _ => fingerprint::normalize(&self.vendor_name) == fingerprint::normalize(vendor_name),
        }
    }
}

/// 近期发票索引 - 带内容哈希倒排索引
#[derive(Debug, Clone, Default)]
pub struct RecentInvoiceIndex {
    entries: Vec<HistoricalInvoice>,
    by_hash: HashMap<String, Vec<usize>>,
}

impl RecentInvoiceIndex {
    pub fn new(entries: Vec<HistoricalInvoice>) -> Self {
        let mut by_hash: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_hash.entry(entry.content_hash.clone()).or_default().push(idx);
        }
        Self { entries, by_hash }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoricalInvoice] {
        &self.entries
    }

    /// 按内容哈希查找，排除当前单据自身
    pub fn find_by_hash(&self, hash: &str, exclude_document: &str) -> Option<&HistoricalInvoice> {
        self.by_hash
            .get(hash)?
            .iter()
            .map(|&idx| &self.entries[idx])
            .find(|e| e.document_id != exclude_document)
    }

    /// 同一供应商的其他单据
    pub fn for_vendor<'a>(
        &'a self,
        vendor_id: Option<&'a str>,
        vendor_name: &'a str,
        exclude_document: &'a str,
    ) -> impl Iterator<Item = &'a HistoricalInvoice> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.document_id != exclude_document)
            .filter(move |e| e.is_same_vendor(vendor_id, vendor_name))
    }
}
