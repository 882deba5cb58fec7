use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::LineItem;

/// 采购订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFulfilled,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    /// 只有未完结的订单参与匹配
    pub fn is_matchable(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFulfilled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFulfilled => "partially_fulfilled",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(OrderStatus::Open),
            "partially_fulfilled" => Some(OrderStatus::PartiallyFulfilled),
            "fulfilled" => Some(OrderStatus::Fulfilled),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// 采购订单 (候选)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub order_id: String,
    pub order_number: String,
    #[serde(default)]
    pub vendor_id: Option<String>,
    pub vendor_name: String,
    pub order_date: NaiveDate,
    pub currency: String,
    pub total: BigDecimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub status: OrderStatus,
}
