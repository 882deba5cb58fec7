use serde::{Deserialize, Serialize};

use crate::config::{MatchThresholds, RiskLevelThresholds};

/// 匹配档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    None,
    Partial,
    Fuzzy,
    Exact,
}

impl MatchTier {
    pub fn from_score(score: f64, thresholds: &MatchThresholds) -> Self {
        if score >= thresholds.exact {
            MatchTier::Exact
        } else if score >= thresholds.fuzzy {
            MatchTier::Fuzzy
        } else if score >= thresholds.partial {
            MatchTier::Partial
        } else {
            MatchTier::None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::None => "none",
            MatchTier::Partial => "partial",
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::Exact => "exact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    AmountMismatch,
    QuantityMismatch,
    MissingLineItem,
    ExtraLineItem,
    ToleranceExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancySeverity {
    Informational,
    Warning,
    Critical,
}

/// 发票与订单之间的差异
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub severity: DiscrepancySeverity,
    /// 发票值 - 订单值
    pub delta: f64,
    /// 涉及的明细行描述 (整单比较时为空)
    #[serde(default)]
    pub item: Option<String>,
    pub description: String,
}

/// 匹配引擎输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub order_id: Option<String>,
    pub order_number: Option<String>,
    pub score: f64,
    pub tier: MatchTier,
    pub discrepancies: Vec<Discrepancy>,
    pub candidates_considered: usize,
    /// 单个候选评分失败的记录
    #[serde(default)]
    pub errors: Vec<String>,
}

impl MatchResult {
    pub fn unmatched(candidates_considered: usize, errors: Vec<String>) -> Self {
        Self {
            order_id: None,
            order_number: None,
            score: 0.0,
            tier: MatchTier::None,
            discrepancies: Vec::new(),
            candidates_considered,
            errors,
        }
    }

    pub fn has_critical_discrepancy(&self) -> bool {
        self.discrepancies
            .iter()
            .any(|d| d.severity == DiscrepancySeverity::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlagType {
    DuplicateInvoice,
    VendorMismatch,
    AmountAnomaly,
    PriceSpike,
    SuspiciousPattern,
}

impl RiskFlagType {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskFlagType::DuplicateInvoice => "duplicate_invoice",
            RiskFlagType::VendorMismatch => "vendor_mismatch",
            RiskFlagType::AmountAnomaly => "amount_anomaly",
            RiskFlagType::PriceSpike => "price_spike",
            RiskFlagType::SuspiciousPattern => "suspicious_pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// 单个风险信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub flag_type: RiskFlagType,
    pub severity: FlagSeverity,
    /// [0,1]
    pub confidence: f64,
    pub description: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl RiskFlag {
    pub fn new(
        flag_type: RiskFlagType,
        severity: FlagSeverity,
        confidence: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            flag_type,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTier {
    Exact,
    Near,
    Similarity,
}

/// 重复发票判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub tier: DuplicateTier,
    pub matched_document_id: String,
    pub confidence: f64,
}

/// 各分项得分
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskComponents {
    pub duplicate: f64,
    pub vendor: f64,
    pub price: f64,
    pub amount: f64,
}

/// 风险引擎输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f64,
    pub is_duplicate: bool,
    #[serde(default)]
    pub duplicate: Option<DuplicateVerdict>,
    pub flags: Vec<RiskFlag>,
    pub components: RiskComponents,
    /// 降级子检查的说明
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RiskAssessment {
    pub fn count_severity(&self, severity: FlagSeverity) -> usize {
        self.flags.iter().filter(|f| f.severity == severity).count()
    }
}

/// 决策结果 (线上取值见 serde rename)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AutoApproved,
    RequiresReview,
    RequiresInvestigation,
    Escalated,
    Rejected,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::AutoApproved => "auto_approved",
            DecisionKind::RequiresReview => "requires_review",
            DecisionKind::RequiresInvestigation => "requires_investigation",
            DecisionKind::Escalated => "escalated",
            DecisionKind::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub reason: String,
    pub recommended_actions: Vec<String>,
    pub requires_manual_review: bool,
}

impl Decision {
    /// requires_manual_review 由决策类型推导，除 auto_approved 外均为 true
    pub fn new(kind: DecisionKind, reason: impl Into<String>, actions: &[&str]) -> Self {
        Self {
            kind,
            reason: reason.into(),
            recommended_actions: actions.iter().map(|a| a.to_string()).collect(),
            requires_manual_review: kind != DecisionKind::AutoApproved,
        }
    }
}
