use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Decision, DecisionKind, ExtractionData, MatchResult, RiskAssessment, RiskLevel};

/// 流水线生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    ValidatingExtraction,
    Matching,
    AssessingRisk,
    Deciding,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::ValidatingExtraction => "validating_extraction",
            WorkflowStatus::Matching => "matching",
            WorkflowStatus::AssessingRisk => "assessing_risk",
            WorkflowStatus::Deciding => "deciding",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阶段结果：成功载荷或失败原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed { data: T },
    Failed { reason: String },
}

impl<T> StageOutcome<T> {
    pub fn completed(data: T) -> Self {
        StageOutcome::Completed { data }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        StageOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            StageOutcome::Completed { data } => Some(data),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: WorkflowStatus,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elapsed_ms: Option<i64>,
    /// 外部模型调用次数 (抽取 + 匹配复核)
    pub model_invocations: u32,
    pub errors: Vec<ErrorRecord>,
}

/// 阶段结果已写入后不可覆盖
#[derive(Debug, thiserror::Error)]
#[error("{stage} result already recorded for document {document_id}")]
pub struct AlreadyRecorded {
    pub document_id: String,
    pub stage: WorkflowStatus,
}

/// 贯穿流水线的状态记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub document_id: String,
    pub vendor_id: Option<String>,
    pub status: WorkflowStatus,
    pub extraction: Option<StageOutcome<ExtractionData>>,
    pub matching: Option<StageOutcome<MatchResult>>,
    pub risk: Option<StageOutcome<RiskAssessment>>,
    pub decision: Option<Decision>,
    pub metadata: RunMetadata,
}

impl WorkflowState {
    pub fn new(document_id: impl Into<String>, vendor_id: Option<String>) -> Self {
        Self {
            document_id: document_id.into(),
            vendor_id,
            status: WorkflowStatus::Pending,
            extraction: None,
            matching: None,
            risk: None,
            decision: None,
            metadata: RunMetadata {
                started_at: Utc::now(),
                finished_at: None,
                elapsed_ms: None,
                model_invocations: 0,
                errors: Vec::new(),
            },
        }
    }

    pub fn push_error(&mut self, stage: WorkflowStatus, message: impl Into<String>) {
        self.metadata.errors.push(ErrorRecord {
            stage,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn record_extraction(
        &mut self,
        outcome: StageOutcome<ExtractionData>,
    ) -> Result<(), AlreadyRecorded> {
        if self.extraction.is_some() {
            return Err(self.already(WorkflowStatus::ValidatingExtraction));
        }
        self.extraction = Some(outcome);
        Ok(())
    }

    pub fn record_matching(&mut self, outcome: StageOutcome<MatchResult>) -> Result<(), AlreadyRecorded> {
        if self.matching.is_some() {
            return Err(self.already(WorkflowStatus::Matching));
        }
        self.matching = Some(outcome);
        Ok(())
    }

    pub fn record_risk(&mut self, outcome: StageOutcome<RiskAssessment>) -> Result<(), AlreadyRecorded> {
        if self.risk.is_some() {
            return Err(self.already(WorkflowStatus::AssessingRisk));
        }
        self.risk = Some(outcome);
        Ok(())
    }

    pub fn record_decision(&mut self, decision: Decision) -> Result<(), AlreadyRecorded> {
        if self.decision.is_some() {
            return Err(self.already(WorkflowStatus::Deciding));
        }
        self.decision = Some(decision);
        Ok(())
    }

    fn already(&self, stage: WorkflowStatus) -> AlreadyRecorded {
        AlreadyRecorded {
            document_id: self.document_id.clone(),
            stage,
        }
    }

    pub fn invoice(&self) -> Option<&super::ExtractedInvoice> {
        self.extraction
            .as_ref()
            .and_then(|e| e.data())
            .map(|d| &d.invoice)
    }

    pub fn match_result(&self) -> Option<&MatchResult> {
        self.matching.as_ref().and_then(|m| m.data())
    }

    pub fn risk_assessment(&self) -> Option<&RiskAssessment> {
        self.risk.as_ref().and_then(|r| r.data())
    }

    pub fn summary(&self) -> StatusSummary {
        let extraction_status = match &self.extraction {
            None => "not_started",
            Some(StageOutcome::Completed { .. }) => "completed",
            Some(StageOutcome::Failed { .. }) => "failed",
        };
        StatusSummary {
            document_id: self.document_id.clone(),
            status: self.status,
            extraction_status: extraction_status.to_string(),
            matching_completed: self.matching.as_ref().is_some_and(|m| m.is_completed()),
            match_score: self.match_result().map(|m| m.score),
            risk_completed: self.risk.as_ref().is_some_and(|r| r.is_completed()),
            risk_level: self.risk_assessment().map(|r| r.level),
            decision: self.decision.as_ref().map(|d| d.kind),
            requires_review: self
                .decision
                .as_ref()
                .map(|d| d.requires_manual_review)
                .unwrap_or(true),
        }
    }
}

/// 轻量状态查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub document_id: String,
    pub status: WorkflowStatus,
    pub extraction_status: String,
    pub matching_completed: bool,
    pub match_score: Option<f64>,
    pub risk_completed: bool,
    pub risk_level: Option<RiskLevel>,
    pub decision: Option<DecisionKind>,
    pub requires_review: bool,
}
