use crate::config::MatchThresholds;
use crate::models::{
    Decision, DecisionKind, ExtractionData, FlagSeverity, MatchResult, MatchTier, RiskAssessment,
    RiskLevel, StageOutcome,
};

/// 决策引擎：按优先级顺序求值，首条命中的规则生效。
///
/// 对所有输入 (包括失败的阶段) 都有定义，不会失败。
pub struct DecisionEngine {
    thresholds: MatchThresholds,
}

impl DecisionEngine {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn decide(
        &self,
        extraction: Option<&StageOutcome<ExtractionData>>,
        matching: Option<&StageOutcome<MatchResult>>,
        risk: Option<&StageOutcome<RiskAssessment>>,
    ) -> Decision {
        // 1. 抽取失败
        if !matches!(extraction, Some(StageOutcome::Completed { .. })) {
            return Decision::new(
                DecisionKind::Rejected,
                "extraction failed",
                &["re-submit document"],
            );
        }

        let matched: Option<&MatchResult> = match matching {
            Some(StageOutcome::Completed { data }) => Some(data),
            Some(StageOutcome::Failed { .. }) | None => None,
        };
        let assessed: Option<&RiskAssessment> = match risk {
            Some(StageOutcome::Completed { data }) => Some(data),
            Some(StageOutcome::Failed { .. }) | None => None,
        };

        if let Some(r) = assessed {
            // 2. 重复发票
            if r.is_duplicate {
                let reason = match &r.duplicate {
                    Some(d) => format!("duplicate invoice detected (matches document {})", d.matched_document_id),
                    None => "duplicate invoice detected".to_string(),
                };
                return Decision::new(
                    DecisionKind::Rejected,
                    reason,
                    &["notify vendor of duplicate submission", "link to original invoice"],
                );
            }

            // 3. 严重风险
            let critical = r.count_severity(FlagSeverity::Critical);
            if r.level == RiskLevel::Critical || critical >= 2 {
                return Decision::new(
                    DecisionKind::Rejected,
                    "critical risk factors",
                    &["block payment", "open fraud review"],
                );
            }

            // 4. 单个严重标记 -> 升级
            if critical == 1 {
                let flag = r
                    .flags
                    .iter()
                    .find(|f| f.severity == FlagSeverity::Critical)
                    .map(|f| f.flag_type.as_str())
                    .unwrap_or("unknown");
                return Decision::new(
                    DecisionKind::Escalated,
                    format!("critical risk flag: {flag}"),
                    &["route to senior reviewer", "hold payment"],
                );
            }

            // 5. 高风险
            if r.level == RiskLevel::High || r.count_severity(FlagSeverity::High) >= 2 {
                return Decision::new(
                    DecisionKind::RequiresInvestigation,
                    format!("high risk (score {:.2})", r.score),
                    &["investigate risk flags", "verify vendor details"],
                );
            }
        }

        // 6. 匹配不足或存在严重差异
        let Some(m) = matched else {
            return Decision::new(
                DecisionKind::RequiresReview,
                "no purchase order match available",
                &["match invoice to purchase order manually"],
            );
        };
        if m.tier == MatchTier::None || m.score < self.thresholds.partial {
            return Decision::new(
                DecisionKind::RequiresReview,
                "no matching purchase order",
                &["match invoice to purchase order manually"],
            );
        }
        if m.has_critical_discrepancy() {
            return Decision::new(
                DecisionKind::RequiresReview,
                "critical discrepancies against purchase order",
                &["review discrepancies", "contact vendor for corrected invoice"],
            );
        }

        // 7. 直通
        if m.score >= self.thresholds.exact && assessed.is_some_and(|r| r.level == RiskLevel::Low) {
            return Decision::new(
                DecisionKind::AutoApproved,
                "exact purchase order match with low risk",
                &["schedule payment"],
            );
        }

        // 8. 默认
        Decision::new(
            DecisionKind::RequiresReview,
            format!("match tier {} requires confirmation", m.tier.as_str()),
            &["review match and approve"],
        )
    }
}

/// 失败路径的默认决策
pub fn fallback_decision(errors: &[String]) -> Decision {
    let mut reason = "pipeline failed; manual review required".to_string();
    if !errors.is_empty() {
        reason.push_str(": ");
        reason.push_str(&errors.join("; "));
    }
    Decision::new(
        DecisionKind::RequiresReview,
        reason,
        &["review recorded errors", "reprocess document"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Discrepancy, DiscrepancyKind, DiscrepancySeverity, DuplicateTier, DuplicateVerdict,
        ExtractedInvoice, RiskComponents, RiskFlag, RiskFlagType,
    };
    use bigdecimal::BigDecimal;
    use indexmap::IndexMap;

    fn extraction() -> StageOutcome<ExtractionData> {
        StageOutcome::completed(ExtractionData {
            invoice: ExtractedInvoice {
                invoice_number: "INV-1".to_string(),
                vendor_name: "Acme".to_string(),
                po_number: None,
                invoice_date: None,
                currency: "USD".to_string(),
                total: BigDecimal::from(100),
                line_items: vec![],
                bank_account: None,
                tax_id: None,
                payment_terms_days: None,
            },
            confidence: IndexMap::new(),
        })
    }

    fn matched(score: f64, tier: MatchTier) -> StageOutcome<MatchResult> {
        StageOutcome::completed(MatchResult {
            order_id: Some("PO1".to_string()),
            order_number: Some("PO-1".to_string()),
            score,
            tier,
            discrepancies: vec![],
            candidates_considered: 1,
            errors: vec![],
        })
    }

    fn risk(score: f64, level: RiskLevel, flags: Vec<RiskFlag>) -> StageOutcome<RiskAssessment> {
        StageOutcome::completed(RiskAssessment {
            level,
            score,
            is_duplicate: false,
            duplicate: None,
            flags,
            components: RiskComponents::default(),
            errors: vec![],
        })
    }

    fn flag(severity: FlagSeverity) -> RiskFlag {
        RiskFlag::new(RiskFlagType::VendorMismatch, severity, 0.9, "test")
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(MatchThresholds::default())
    }

    #[test]
    fn failed_extraction_is_rejected() {
        let failed: StageOutcome<ExtractionData> = StageOutcome::failed("ocr empty");
        let d = engine().decide(Some(&failed), None, None);
        assert_eq!(d.kind, DecisionKind::Rejected);
        assert_eq!(d.reason, "extraction failed");
        assert_eq!(d.recommended_actions, vec!["re-submit document".to_string()]);
        assert!(d.requires_manual_review);
    }

    #[test]
    fn duplicate_beats_perfect_match() {
        let mut r = risk(0.4, RiskLevel::Medium, vec![]);
        if let StageOutcome::Completed { data } = &mut r {
            data.is_duplicate = true;
            data.duplicate = Some(DuplicateVerdict {
                tier: DuplicateTier::Near,
                matched_document_id: "doc-1".to_string(),
                confidence: 0.95,
            });
        }
        let d = engine().decide(Some(&extraction()), Some(&matched(1.0, MatchTier::Exact)), Some(&r));
        assert_eq!(d.kind, DecisionKind::Rejected);
        assert!(d.reason.starts_with("duplicate invoice detected"));
    }

    #[test]
    fn critical_level_or_two_critical_flags_reject() {
        let e = extraction();
        let m = matched(1.0, MatchTier::Exact);
        let d = engine().decide(Some(&e), Some(&m), Some(&risk(0.8, RiskLevel::Critical, vec![])));
        assert_eq!(d.kind, DecisionKind::Rejected);
        assert_eq!(d.reason, "critical risk factors");

        let two = vec![flag(FlagSeverity::Critical), flag(FlagSeverity::Critical)];
        let d = engine().decide(Some(&e), Some(&m), Some(&risk(0.3, RiskLevel::Medium, two)));
        assert_eq!(d.kind, DecisionKind::Rejected);
    }

    #[test]
    fn single_critical_flag_escalates() {
        let d = engine().decide(
            Some(&extraction()),
            Some(&matched(1.0, MatchTier::Exact)),
            Some(&risk(0.3, RiskLevel::Medium, vec![flag(FlagSeverity::Critical)])),
        );
        assert_eq!(d.kind, DecisionKind::Escalated);
        assert!(d.reason.contains("vendor_mismatch"));
    }

    #[test]
    fn fuzzy_match_with_two_high_flags_requires_investigation() {
        let flags = vec![flag(FlagSeverity::High), flag(FlagSeverity::High)];
        let d = engine().decide(
            Some(&extraction()),
            Some(&matched(0.92, MatchTier::Fuzzy)),
            Some(&risk(0.65, RiskLevel::High, flags)),
        );
        assert_eq!(d.kind, DecisionKind::RequiresInvestigation);
    }

    #[test]
    fn critical_discrepancy_requires_review() {
        let mut m = matched(0.91, MatchTier::Fuzzy);
        if let StageOutcome::Completed { data } = &mut m {
            data.discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::AmountMismatch,
                severity: DiscrepancySeverity::Critical,
                delta: 200.0,
                item: None,
                description: "total".to_string(),
            });
        }
        let d = engine().decide(Some(&extraction()), Some(&m), Some(&risk(0.0, RiskLevel::Low, vec![])));
        assert_eq!(d.kind, DecisionKind::RequiresReview);
        assert!(d.reason.contains("discrepancies"));
    }

    #[test]
    fn exact_match_low_risk_auto_approves() {
        let d = engine().decide(
            Some(&extraction()),
            Some(&matched(0.97, MatchTier::Exact)),
            Some(&risk(0.05, RiskLevel::Low, vec![])),
        );
        assert_eq!(d.kind, DecisionKind::AutoApproved);
        assert!(!d.requires_manual_review);
        assert!(!d.recommended_actions.is_empty());
    }

    #[test]
    fn failed_engines_fall_through_to_review() {
        let failed_match: StageOutcome<MatchResult> = StageOutcome::failed("db down");
        let failed_risk: StageOutcome<RiskAssessment> = StageOutcome::failed("db down");
        let d = engine().decide(Some(&extraction()), Some(&failed_match), Some(&failed_risk));
        assert_eq!(d.kind, DecisionKind::RequiresReview);

        // 风险失败时即使完美匹配也不能直通
        let d = engine().decide(Some(&extraction()), Some(&matched(1.0, MatchTier::Exact)), Some(&failed_risk));
        assert_eq!(d.kind, DecisionKind::RequiresReview);
    }

    #[test]
    fn medium_risk_defaults_to_review() {
        let d = engine().decide(
            Some(&extraction()),
            Some(&matched(0.97, MatchTier::Exact)),
            Some(&risk(0.3, RiskLevel::Medium, vec![flag(FlagSeverity::Medium)])),
        );
        assert_eq!(d.kind, DecisionKind::RequiresReview);
    }

    #[test]
    fn every_outcome_has_actions() {
        let d = fallback_decision(&["matching: timeout".to_string()]);
        assert_eq!(d.kind, DecisionKind::RequiresReview);
        assert!(d.reason.contains("matching: timeout"));
        assert!(!d.recommended_actions.is_empty());
    }
}
