use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 发票明细行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: BigDecimal, unit_price: BigDecimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    /// 行金额 = 数量 × 单价
    pub fn amount(&self) -> BigDecimal {
        &self.quantity * &self.unit_price
    }
}

/// 结构化发票 (抽取结果)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    pub invoice_number: String,
    pub vendor_name: String,
    /// 发票上引用的采购订单号
    #[serde(default)]
    pub po_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    pub currency: String,
    pub total: BigDecimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub bank_account: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    /// 付款期限 (天)
    #[serde(default)]
    pub payment_terms_days: Option<i32>,
}

/// 抽取服务返回的原始记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub document_id: String,
    pub completed: bool,
    #[serde(default)]
    pub invoice: Option<ExtractedInvoice>,
    /// 字段 -> 置信度 (保序，便于审计输出)
    #[serde(default)]
    pub confidence: IndexMap<String, f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 校验通过的抽取结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionData {
    pub invoice: ExtractedInvoice,
    pub confidence: IndexMap<String, f64>,
}
