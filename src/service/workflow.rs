use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;

use crate::config::{ExtractionConfig, PipelineConfig};
use crate::db::repository::{
    ExtractionProvider, MatchAdvisor, OrderRepository, StateStore, VendorRepository,
};
use crate::error::RepositoryError;
use crate::models::{
    ExtractionData, ExtractionRecord, MatchResult, MatchTier, PurchaseOrder, StageOutcome,
    StatusSummary, WorkflowState, WorkflowStatus,
};
use crate::service::decision::{fallback_decision, DecisionEngine};
use crate::service::matcher::MatchingEngine;
use crate::service::risk::{RiskContext, RiskEngine};

/// 流水线依赖的外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub extraction: Arc<dyn ExtractionProvider>,
    pub orders: Arc<dyn OrderRepository>,
    pub vendors: Arc<dyn VendorRepository>,
    pub store: Arc<dyn StateStore>,
    pub advisor: Option<Arc<dyn MatchAdvisor>>,
}

/// 评估基准日来源。历史回溯窗口和未来日期检查都以它为准
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// 固定基准日，用于回放和测试
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// 状态转移表：只依据当前状态和已记录的阶段结果
pub fn next_status(state: &WorkflowState) -> WorkflowStatus {
    use WorkflowStatus::*;
    match state.status {
        Pending => ValidatingExtraction,
        ValidatingExtraction => match &state.extraction {
            Some(StageOutcome::Completed { .. }) => Matching,
            _ => Failed,
        },
        Matching => AssessingRisk,
        AssessingRisk => {
            let matched = state.matching.as_ref().is_some_and(|m| m.is_completed());
            let assessed = state.risk.as_ref().is_some_and(|r| r.is_completed());
            if matched || assessed {
                Deciding
            } else {
                Failed
            }
        }
        Deciding => Completed,
        Completed => Completed,
        Failed => Failed,
    }
}

/// 抽取校验：返回阶段结果和非致命告警
pub fn validate_extraction(
    record: Option<ExtractionRecord>,
    config: &ExtractionConfig,
) -> (StageOutcome<ExtractionData>, Vec<String>) {
    let Some(record) = record else {
        return (StageOutcome::failed("extraction missing"), Vec::new());
    };
    if let Some(err) = &record.error {
        return (StageOutcome::failed(format!("extraction errored: {err}")), Vec::new());
    }
    if !record.completed {
        return (StageOutcome::failed("extraction incomplete"), Vec::new());
    }
    let Some(invoice) = record.invoice else {
        return (StageOutcome::failed("extraction produced no invoice record"), Vec::new());
    };

    let mut missing = Vec::new();
    if invoice.invoice_number.trim().is_empty() {
        missing.push("invoice_number");
    }
    if invoice.vendor_name.trim().is_empty() {
        missing.push("vendor_name");
    }
    if invoice.currency.trim().is_empty() {
        missing.push("currency");
    }
    if invoice.total <= bigdecimal::BigDecimal::from(0) {
        missing.push("total");
    }
    if !missing.is_empty() {
        return (
            StageOutcome::failed(format!("required fields missing or invalid: {}", missing.join(", "))),
            Vec::new(),
        );
    }

    let warnings = record
        .confidence
        .iter()
        .filter(|(_, c)| **c < config.min_field_confidence)
        .map(|(field, c)| format!("low confidence {c:.2} on field '{field}'"))
        .collect();

    (
        StageOutcome::completed(ExtractionData {
            invoice,
            confidence: record.confidence,
        }),
        warnings,
    )
}

/// 单次运行的临时上下文 (不持久化)
struct Run {
    state: WorkflowState,
    matched_order: Option<PurchaseOrder>,
}

/// 流水线编排器
pub struct WorkflowOrchestrator {
    collaborators: Collaborators,
    config: PipelineConfig,
    matching: Arc<MatchingEngine>,
    risk: RiskEngine,
    decision: DecisionEngine,
    clock: Arc<dyn Clock>,
}

impl WorkflowOrchestrator {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        Self {
            matching: Arc::new(MatchingEngine::new(config.matching.clone())),
            risk: RiskEngine::new(config.risk.clone()),
            decision: DecisionEngine::new(config.matching.thresholds),
            clock: Arc::new(SystemClock),
            collaborators,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 完整运行流水线。任何内部错误都不会抛出，总是返回带决策的终态
    pub async fn process(&self, document_id: &str, vendor_id: Option<String>) -> WorkflowState {
        let mut run = Run {
            state: WorkflowState::new(document_id, vendor_id),
            matched_order: None,
        };
        tracing::info!("[Workflow] document {}: run started", document_id);

        while !run.state.status.is_terminal() {
            match run.state.status {
                WorkflowStatus::Pending => {}
                WorkflowStatus::ValidatingExtraction => self.validate(&mut run).await,
                WorkflowStatus::Matching => self.run_matching(&mut run).await,
                WorkflowStatus::AssessingRisk => self.assess_risk(&mut run).await,
                WorkflowStatus::Deciding => self.decide(&mut run),
                WorkflowStatus::Completed | WorkflowStatus::Failed => break,
            }
            let next = next_status(&run.state);
            tracing::debug!("[Workflow] document {}: {} -> {}", document_id, run.state.status, next);
            run.state.status = next;
        }

        if run.state.status == WorkflowStatus::Failed {
            self.handle_failure(&mut run.state);
        }

        self.finalize(run.state).await
    }

    /// 读取最后一次终态的摘要
    pub async fn status(&self, document_id: &str) -> Result<Option<StatusSummary>, RepositoryError> {
        Ok(self
            .collaborators
            .store
            .load(document_id)
            .await?
            .map(|s| s.summary()))
    }

    /// 最近的终态记录 (用于导出)
    pub async fn recent_states(&self, limit: i64) -> Result<Vec<WorkflowState>, RepositoryError> {
        self.collaborators.store.list_terminal(limit).await
    }

    /// 清除旧结果后重新运行
    pub async fn reprocess(&self, document_id: &str, vendor_id: Option<String>) -> WorkflowState {
        if let Err(e) = self.collaborators.store.clear(document_id).await {
            tracing::warn!("[Workflow] document {}: failed to clear prior results: {}", document_id, e);
        }
        self.process(document_id, vendor_id).await
    }

    async fn validate(&self, run: &mut Run) {
        let state = &mut run.state;
        state.metadata.model_invocations += 1;

        let record = match self.collaborators.extraction.extraction(&state.document_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("[Workflow] document {}: extraction provider failed: {}", state.document_id, e);
                state.push_error(WorkflowStatus::ValidatingExtraction, e.to_string());
                self.record(state, |s| s.record_extraction(StageOutcome::failed(format!("extraction unavailable: {e}"))));
                return;
            }
        };

        let (outcome, warnings) = validate_extraction(record, &self.config.extraction);
        for w in warnings {
            state.push_error(WorkflowStatus::ValidatingExtraction, w);
        }
        if let StageOutcome::Failed { reason } = &outcome {
            tracing::warn!("[Workflow] document {}: {}", state.document_id, reason);
            state.push_error(WorkflowStatus::ValidatingExtraction, reason.clone());
        }
        let vendor_name = outcome.data().map(|d| d.invoice.vendor_name.clone());
        self.record(state, |s| s.record_extraction(outcome));

        // 未指定供应商时按名称推断
        if let (None, Some(name)) = (&state.vendor_id, vendor_name) {
            match self.collaborators.vendors.find_vendor_id(&name).await {
                Ok(Some(id)) => {
                    tracing::info!("[Workflow] document {}: inferred vendor {} from '{}'", state.document_id, id, name);
                    state.vendor_id = Some(id);
                }
                Ok(None) => {}
                Err(e) => state.push_error(
                    WorkflowStatus::ValidatingExtraction,
                    format!("vendor inference failed: {e}"),
                ),
            }
        }
    }

    async fn run_matching(&self, run: &mut Run) {
        let Some(invoice) = run.state.invoice().cloned() else {
            return;
        };
        let document_id = run.state.document_id.clone();
        let vendor_id = run.state.vendor_id.clone();

        let orders = match self
            .collaborators
            .orders
            .candidate_orders(vendor_id.as_deref(), &invoice.vendor_name)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                tracing::error!("[Workflow] document {}: order lookup failed: {}", document_id, e);
                run.state.push_error(WorkflowStatus::Matching, e.to_string());
                self.record(&mut run.state, |s| s.record_matching(StageOutcome::failed(format!("order lookup failed: {e}"))));
                return;
            }
        };

        // 候选评分走 rayon，放到阻塞线程池，避免占住异步工作线程
        let engine = Arc::clone(&self.matching);
        let task_invoice = invoice.clone();
        let task_vendor = vendor_id.clone();
        let scored = tokio::task::spawn_blocking(move || {
            let result = engine.match_invoice(&task_invoice, task_vendor.as_deref(), &orders);
            (result, orders)
        })
        .await;
        let (mut result, orders) = match scored {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("[Workflow] document {}: scoring task failed: {}", document_id, e);
                run.state.push_error(WorkflowStatus::Matching, e.to_string());
                self.record(&mut run.state, |s| s.record_matching(StageOutcome::failed(format!("scoring task failed: {e}"))));
                return;
            }
        };
        for e in &result.errors {
            run.state.push_error(WorkflowStatus::Matching, e.clone());
        }

        let matched_order = result
            .order_id
            .as_ref()
            .and_then(|id| orders.iter().find(|o| &o.order_id == id))
            .cloned();

        if let (Some(order), Some(advisor)) = (&matched_order, &self.collaborators.advisor) {
            if matches!(result.tier, MatchTier::Fuzzy | MatchTier::Partial) {
                self.consult_advisor(&mut run.state, advisor.as_ref(), &invoice, order, &mut result)
                    .await;
            }
        }

        run.matched_order = if result.order_id.is_some() { matched_order } else { None };
        self.record(&mut run.state, |s| s.record_matching(StageOutcome::completed(result)));
    }

    /// 外部复核：有界超时，不重试
    async fn consult_advisor(
        &self,
        state: &mut WorkflowState,
        advisor: &dyn MatchAdvisor,
        invoice: &crate::models::ExtractedInvoice,
        order: &PurchaseOrder,
        result: &mut MatchResult,
    ) {
        let timeout_ms = self.config.matching.advisor_timeout_ms;
        state.metadata.model_invocations += 1;

        let reply = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            advisor.confirm(invoice, order),
        )
        .await;

        match reply {
            Ok(Ok(Some(score))) => {
                let score = score.clamp(0.0, 1.0);
                let tier = MatchTier::from_score(score, &self.config.matching.thresholds);
                tracing::info!(
                    "[Workflow] document {}: advisor rescored order {} {:.3} -> {:.3}",
                    state.document_id, order.order_number, result.score, score
                );
                result.score = score;
                result.tier = tier;
                if tier == MatchTier::None {
                    result.order_id = None;
                    result.order_number = None;
                    result.discrepancies.clear();
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => state.push_error(WorkflowStatus::Matching, format!("match advisor failed: {e}")),
            Err(_) => state.push_error(
                WorkflowStatus::Matching,
                RepositoryError::Timeout(timeout_ms).to_string(),
            ),
        }
    }

    async fn assess_risk(&self, run: &mut Run) {
        let Some(invoice) = run.state.invoice().cloned() else {
            return;
        };
        let document_id = run.state.document_id.clone();
        let vendor_id = run.state.vendor_id.clone();
        let today = self.clock.today();
        let since = today - Duration::days(self.config.risk.history_window_days);

        let vendors = &self.collaborators.vendors;
        let profile_fut = async {
            match vendor_id.as_deref() {
                Some(id) => vendors.vendor_profile(id).await,
                None => Ok(None),
            }
        };
        let recent_fut = vendors.recent_invoices(vendor_id.as_deref(), &invoice.vendor_name, since);
        let (profile, recent) = futures::future::join(profile_fut, recent_fut).await;

        let (profile, recent) = match (profile, recent) {
            (Ok(p), Ok(r)) => (p, r),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("[Workflow] document {}: vendor data unavailable: {}", document_id, e);
                run.state.push_error(WorkflowStatus::AssessingRisk, e.to_string());
                self.record(&mut run.state, |s| s.record_risk(StageOutcome::failed(format!("vendor data unavailable: {e}"))));
                return;
            }
        };

        let assessment = self.risk.assess(&RiskContext {
            document_id: &document_id,
            invoice: &invoice,
            vendor_id: vendor_id.as_deref(),
            vendor_profile: profile.as_ref(),
            recent: &recent,
            matched_order: run.matched_order.as_ref(),
            as_of: today,
        });
        for e in &assessment.errors {
            run.state.push_error(WorkflowStatus::AssessingRisk, e.clone());
        }
        self.record(&mut run.state, |s| s.record_risk(StageOutcome::completed(assessment)));
    }

    fn decide(&self, run: &mut Run) {
        let state = &mut run.state;
        let decision = self.decision.decide(
            state.extraction.as_ref(),
            state.matching.as_ref(),
            state.risk.as_ref(),
        );
        tracing::info!(
            "[Workflow] document {}: decision {} ({})",
            state.document_id, decision.kind.as_str(), decision.reason
        );
        self.record(state, |s| s.record_decision(decision));
    }

    /// 失败路径：抽取失败按规则拒绝，其余给出默认人工复核
    fn handle_failure(&self, state: &mut WorkflowState) {
        if state.decision.is_some() {
            return;
        }
        let extraction_ok = state.extraction.as_ref().is_some_and(|e| e.is_completed());
        let decision = if extraction_ok {
            let errors: Vec<String> = state
                .metadata
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.stage, e.message))
                .collect();
            fallback_decision(&errors)
        } else {
            self.decision.decide(state.extraction.as_ref(), None, None)
        };
        tracing::warn!(
            "[Workflow] document {}: run failed, decision {} ({})",
            state.document_id, decision.kind.as_str(), decision.reason
        );
        self.record(state, |s| s.record_decision(decision));
    }

    /// 补全元数据并只写入一次终态
    async fn finalize(&self, mut state: WorkflowState) -> WorkflowState {
        let finished = Utc::now();
        state.metadata.finished_at = Some(finished);
        state.metadata.elapsed_ms = Some((finished - state.metadata.started_at).num_milliseconds());

        if let Err(e) = self.collaborators.store.save_terminal(&state).await {
            tracing::error!("[Workflow] document {}: failed to persist terminal state: {}", state.document_id, e);
            state.push_error(state.status, format!("persist failed: {e}"));
        }

        tracing::info!(
            "[Workflow] document {}: {} in {} ms, {} errors, {} model calls",
            state.document_id,
            state.status,
            state.metadata.elapsed_ms.unwrap_or(0),
            state.metadata.errors.len(),
            state.metadata.model_invocations
        );
        state
    }

    fn record<F>(&self, state: &mut WorkflowState, f: F)
    where
        F: FnOnce(&mut WorkflowState) -> Result<(), crate::models::AlreadyRecorded>,
    {
        if let Err(e) = f(state) {
            tracing::error!("[Workflow] {}", e);
            let stage = e.stage;
            state.push_error(stage, e.to_string());
        }
    }
}
