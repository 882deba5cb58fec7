use chrono::NaiveDate;
use serde_json::json;

use crate::config::RiskConfig;
use crate::models::{
    DuplicateTier, DuplicateVerdict, ExtractedInvoice, FlagSeverity, PurchaseOrder,
    RecentInvoiceIndex, RiskAssessment, RiskComponents, RiskFlag, RiskFlagType, RiskLevel,
    VendorProfile,
};
use crate::service::fingerprint::{
    content_hash, cosine_similarity, feature_vector, normalize, string_similarity, to_f64,
};

/// 风险评估输入
#[derive(Debug, Clone, Copy)]
pub struct RiskContext<'a> {
    pub document_id: &'a str,
    pub invoice: &'a ExtractedInvoice,
    pub vendor_id: Option<&'a str>,
    pub vendor_profile: Option<&'a VendorProfile>,
    pub recent: &'a RecentInvoiceIndex,
    pub matched_order: Option<&'a PurchaseOrder>,
    /// 评估基准日 (用于未来日期检查)
    pub as_of: NaiveDate,
}

/// 单项检查结果
#[derive(Debug, Default)]
struct CheckOutcome {
    score: f64,
    flags: Vec<RiskFlag>,
    notes: Vec<String>,
}

impl CheckOutcome {
    fn raise(&mut self, flag: RiskFlag, score: f64) {
        self.score = self.score.max(score);
        self.flags.push(flag);
    }
}

/// 风险引擎：重复检测 + 供应商校验 + 异常检测，加权汇总
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// 任一子检查失败只把该项贡献降为 0，并记录说明
    pub fn assess(&self, ctx: &RiskContext<'_>) -> RiskAssessment {
        let mut flags = Vec::new();
        let mut errors = Vec::new();
        let mut components = RiskComponents::default();

        let mut take = |name: &str, result: Result<CheckOutcome, String>| -> f64 {
            match result {
                Ok(outcome) => {
                    flags.extend(outcome.flags);
                    errors.extend(outcome.notes.into_iter().map(|n| format!("{name}: {n}")));
                    outcome.score
                }
                Err(e) => {
                    tracing::warn!("[Risk] document {}: {} check degraded: {}", ctx.document_id, name, e);
                    errors.push(format!("{name}: {e}"));
                    0.0
                }
            }
        };

        let (duplicate, dup_outcome) = match self.check_duplicate(ctx) {
            Ok((verdict, outcome)) => (verdict, Ok(outcome)),
            Err(e) => (None, Err(e)),
        };
        components.duplicate = take("duplicate", dup_outcome);
        components.vendor = take("vendor", self.check_vendor(ctx));
        components.price = take("price", self.check_prices(ctx));
        components.amount = take("amount", self.check_amount(ctx));
        let _ = take("pattern", Ok(self.check_patterns(ctx)));

        let w = &self.config.weights;
        let score = (w.duplicate * components.duplicate
            + w.vendor * components.vendor
            + w.price * components.price
            + w.amount * components.amount)
            .clamp(0.0, 1.0);
        let level = RiskLevel::from_score(score, &self.config.levels);

        tracing::info!(
            "[Risk] document {}: score {:.3} level {} duplicate {} flags {}",
            ctx.document_id, score, level.as_str(), duplicate.is_some(), flags.len()
        );

        RiskAssessment {
            level,
            score,
            is_duplicate: duplicate.is_some(),
            duplicate,
            flags,
            components,
            errors,
        }
    }

    /// 三级重复检测，先命中者为准：内容哈希 -> 发票号+供应商+金额 -> 特征相似度
    fn check_duplicate(
        &self,
        ctx: &RiskContext<'_>,
    ) -> Result<(Option<DuplicateVerdict>, CheckOutcome), String> {
        let mut outcome = CheckOutcome::default();
        let invoice = ctx.invoice;

        let verdict = self
            .exact_duplicate(ctx)
            .or_else(|| self.near_duplicate(ctx))
            .map(Ok)
            .or_else(|| self.similar_duplicate(ctx).transpose())
            .transpose()?;

        if let Some(v) = &verdict {
            let flag = RiskFlag::new(
                RiskFlagType::DuplicateInvoice,
                FlagSeverity::Critical,
                v.confidence,
                format!(
                    "invoice {} duplicates document {} ({:?} match)",
                    invoice.invoice_number, v.matched_document_id, v.tier
                ),
            )
            .with_details(json!({
                "tier": v.tier,
                "matched_document_id": v.matched_document_id,
            }));
            outcome.raise(flag, v.confidence);
        }
        Ok((verdict, outcome))
    }

    fn exact_duplicate(&self, ctx: &RiskContext<'_>) -> Option<DuplicateVerdict> {
        let hash = content_hash(ctx.invoice);
        ctx.recent
            .find_by_hash(&hash, ctx.document_id)
            .map(|entry| DuplicateVerdict {
                tier: DuplicateTier::Exact,
                matched_document_id: entry.document_id.clone(),
                confidence: 1.0,
            })
    }

    fn near_duplicate(&self, ctx: &RiskContext<'_>) -> Option<DuplicateVerdict> {
        let invoice = ctx.invoice;
        let number = normalize(&invoice.invoice_number);
        let total = to_f64(&invoice.total)?;

        ctx.recent
            .for_vendor(ctx.vendor_id, &invoice.vendor_name, ctx.document_id)
            .filter(|e| normalize(&e.invoice_number) == number)
            .find_map(|e| {
                let other = to_f64(&e.total)?;
                let base = total.abs().max(other.abs());
                let ratio = if base == 0.0 { 0.0 } else { (total - other).abs() / base };
                if ratio > self.config.duplicate_amount_tolerance {
                    return None;
                }
                Some(DuplicateVerdict {
                    tier: DuplicateTier::Near,
                    matched_document_id: e.document_id.clone(),
                    confidence: if ratio == 0.0 { 0.95 } else { 0.9 },
                })
            })
    }

    fn similar_duplicate(&self, ctx: &RiskContext<'_>) -> Result<Option<DuplicateVerdict>, String> {
        let invoice = ctx.invoice;
        if to_f64(&invoice.total).is_none() {
            return Err("invoice total is not a finite number".to_string());
        }
        let features = feature_vector(invoice);
        let window = self.config.duplicate_date_window_days;

        let mut best: Option<(f64, &str)> = None;
        for entry in ctx
            .recent
            .for_vendor(ctx.vendor_id, &invoice.vendor_name, ctx.document_id)
        {
            // 日期相差超出窗口的视为不同账期
            if let (Some(a), Some(b)) = (invoice.invoice_date, entry.invoice_date) {
                if (a - b).num_days().abs() > window {
                    continue;
                }
            }
            let sim = cosine_similarity(&features, &feature_vector(&entry.as_invoice()));
            if sim > self.config.duplicate_similarity_threshold
                && best.map_or(true, |(s, _)| sim > s)
            {
                best = Some((sim, entry.document_id.as_str()));
            }
        }

        Ok(best.map(|(sim, doc)| DuplicateVerdict {
            tier: DuplicateTier::Similarity,
            matched_document_id: doc.to_string(),
            confidence: sim,
        }))
    }

    /// 供应商校验：未知/新供应商、银行账户、税号、付款期限、与订单供应商不一致
    fn check_vendor(&self, ctx: &RiskContext<'_>) -> Result<CheckOutcome, String> {
        let mut outcome = CheckOutcome::default();
        let invoice = ctx.invoice;

        if let Some(order) = ctx.matched_order {
            let ids_differ = matches!(
                (ctx.vendor_id, order.vendor_id.as_deref()),
                (Some(a), Some(b)) if a != b
            );
            let name_sim = string_similarity(&invoice.vendor_name, &order.vendor_name);
            if ids_differ || name_sim < self.config.vendor_name_similarity_threshold {
                outcome.raise(
                    RiskFlag::new(
                        RiskFlagType::VendorMismatch,
                        FlagSeverity::Medium,
                        1.0 - name_sim.min(0.5),
                        format!(
                            "invoice vendor '{}' differs from order vendor '{}'",
                            invoice.vendor_name, order.vendor_name
                        ),
                    )
                    .with_details(json!({ "name_similarity": name_sim })),
                    0.6,
                );
            }
        }

        let Some(profile) = ctx.vendor_profile else {
            outcome.raise(
                RiskFlag::new(
                    RiskFlagType::VendorMismatch,
                    FlagSeverity::Medium,
                    0.8,
                    format!("vendor '{}' is unknown", invoice.vendor_name),
                ),
                0.5,
            );
            return Ok(outcome);
        };

        outcome.score = outcome.score.max(profile.risk_score.clamp(0.0, 1.0));

        if profile.is_new() {
            outcome.raise(
                RiskFlag::new(
                    RiskFlagType::VendorMismatch,
                    FlagSeverity::Medium,
                    0.7,
                    format!("first invoice from vendor '{}'", profile.vendor_name),
                ),
                0.5,
            );
        }

        if let Some(account) = &invoice.bank_account {
            let known = profile
                .bank_accounts
                .iter()
                .any(|a| compact(a) == compact(account));
            if !profile.bank_accounts.is_empty() && !known {
                outcome.raise(
                    RiskFlag::new(
                        RiskFlagType::VendorMismatch,
                        FlagSeverity::Critical,
                        0.9,
                        "bank account differs from the vendor's registered accounts",
                    )
                    .with_details(json!({ "invoice_account": account })),
                    0.9,
                );
            }
        }

        if let (Some(on_invoice), Some(registered)) = (&invoice.tax_id, &profile.tax_id) {
            if compact(on_invoice) != compact(registered) {
                outcome.raise(
                    RiskFlag::new(
                        RiskFlagType::VendorMismatch,
                        FlagSeverity::High,
                        0.85,
                        "tax identifier differs from the vendor profile",
                    )
                    .with_details(json!({ "invoice_tax_id": on_invoice, "registered_tax_id": registered })),
                    0.8,
                );
            }
        }

        if let (Some(days), Some(norm)) = (invoice.payment_terms_days, profile.payment_terms_days) {
            if (days - norm).abs() > self.config.payment_terms_tolerance_days {
                outcome.raise(
                    RiskFlag::new(
                        RiskFlagType::VendorMismatch,
                        FlagSeverity::Low,
                        0.6,
                        format!("payment terms {days} days, vendor norm is {norm} days"),
                    ),
                    0.3,
                );
            }
        }

        Ok(outcome)
    }

    /// 单价异常：超过 历史均值 + sigma × 标准差
    fn check_prices(&self, ctx: &RiskContext<'_>) -> Result<CheckOutcome, String> {
        let mut outcome = CheckOutcome::default();
        let invoice = ctx.invoice;
        if invoice.line_items.is_empty() {
            return Ok(outcome);
        }

        let history: Vec<_> = ctx
            .recent
            .for_vendor(ctx.vendor_id, &invoice.vendor_name, ctx.document_id)
            .collect();
        if history.is_empty() {
            return Err("no price history for vendor".to_string());
        }

        let sigma = self.config.price_spike_sigma;
        for line in &invoice.line_items {
            let Some(price) = to_f64(&line.unit_price) else {
                outcome.notes.push(format!("unreadable unit price on '{}'", line.description));
                continue;
            };
            let key = normalize(&line.description);
            let samples: Vec<f64> = history
                .iter()
                .flat_map(|e| e.line_items.iter())
                .filter(|l| normalize(&l.description) == key)
                .filter_map(|l| to_f64(&l.unit_price))
                .collect();
            if samples.len() < self.config.min_price_samples {
                continue;
            }

            let (mean, std) = mean_std(&samples);
            let std = std.max(mean.abs() * self.config.price_stddev_floor_ratio);
            if price <= mean + sigma * std {
                continue;
            }

            // 历史价格完全一致时任何上涨都视为极端偏离
            let z = if std == 0.0 { f64::INFINITY } else { (price - mean) / std };
            let (severity, score) = if z > sigma * 1.5 {
                (FlagSeverity::High, 1.0)
            } else {
                (FlagSeverity::Medium, 0.6)
            };
            outcome.raise(
                RiskFlag::new(
                    RiskFlagType::PriceSpike,
                    severity,
                    (z / (sigma * 2.0)).min(1.0),
                    format!("unit price {price:.2} for '{}' is above the mean {mean:.2} (z {z:.1})", line.description),
                )
                .with_details(json!({ "mean": mean, "stddev": std, "samples": samples.len() })),
                score,
            );
        }
        Ok(outcome)
    }

    /// 整单金额异常：超过历史均值的倍数，或大额整数金额
    fn check_amount(&self, ctx: &RiskContext<'_>) -> Result<CheckOutcome, String> {
        let mut outcome = CheckOutcome::default();
        let total = to_f64(&ctx.invoice.total)
            .ok_or_else(|| "invoice total is not a finite number".to_string())?;

        if total >= self.config.round_amount_threshold && total % 1000.0 == 0.0 {
            outcome.raise(
                RiskFlag::new(
                    RiskFlagType::AmountAnomaly,
                    FlagSeverity::Low,
                    0.5,
                    format!("suspiciously round total {total:.2}"),
                ),
                0.5,
            );
        }

        let history: Vec<f64> = ctx
            .vendor_profile
            .map(|p| p.historical_amounts.iter().filter_map(to_f64).collect())
            .unwrap_or_default();
        if history.is_empty() {
            outcome.notes.push("no historical amounts for vendor".to_string());
            return Ok(outcome);
        }

        let (avg, _) = mean_std(&history);
        let limit = avg * self.config.amount_anomaly_multiple;
        if avg > 0.0 && total > limit {
            outcome.raise(
                RiskFlag::new(
                    RiskFlagType::AmountAnomaly,
                    FlagSeverity::High,
                    (total / limit / 2.0).min(1.0),
                    format!("total {total:.2} exceeds {:.1}x the vendor average {avg:.2}", self.config.amount_anomaly_multiple),
                )
                .with_details(json!({ "average": avg, "samples": history.len() })),
                1.0,
            );
        }
        Ok(outcome)
    }

    /// 可疑模式：未来日期、早于订单日期。只产生标记，不计入分数
    fn check_patterns(&self, ctx: &RiskContext<'_>) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();
        let Some(date) = ctx.invoice.invoice_date else {
            return outcome;
        };

        if date > ctx.as_of {
            outcome.flags.push(RiskFlag::new(
                RiskFlagType::SuspiciousPattern,
                FlagSeverity::Medium,
                0.8,
                format!("invoice dated in the future ({date})"),
            ));
        }
        if let Some(order) = ctx.matched_order {
            if date < order.order_date {
                outcome.flags.push(RiskFlag::new(
                    RiskFlagType::SuspiciousPattern,
                    FlagSeverity::Low,
                    0.6,
                    format!("invoice date {date} precedes order date {}", order.order_date),
                ));
            }
        }
        outcome
    }
}

fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(|c| c.to_uppercase())
        .collect()
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoricalInvoice, LineItem, OrderStatus};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn invoice(number: &str, total: &str, price: &str) -> ExtractedInvoice {
        ExtractedInvoice {
            invoice_number: number.to_string(),
            vendor_name: "Acme Supplies".to_string(),
            po_number: None,
            invoice_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            currency: "USD".to_string(),
            total: dec(total),
            line_items: vec![LineItem::new("Printer paper", dec("10"), dec(price))],
            bank_account: Some("DE44 5001 0517 5407 3249 31".to_string()),
            tax_id: Some("TAX-1".to_string()),
            payment_terms_days: Some(30),
        }
    }

    fn profile() -> VendorProfile {
        VendorProfile {
            vendor_id: "V1".to_string(),
            vendor_name: "Acme Supplies".to_string(),
            historical_amounts: vec![dec("1000"), dec("1050"), dec("1150")],
            bank_accounts: vec!["DE44500105175407324931".to_string()],
            tax_id: Some("TAX-1".to_string()),
            payment_terms_days: Some(30),
            risk_score: 0.05,
        }
    }

    fn history() -> RecentInvoiceIndex {
        let past = [("INV-7", "1000", "100"), ("INV-8", "1050", "105"), ("INV-9", "1150", "115")];
        RecentInvoiceIndex::new(
            past.iter()
                .enumerate()
                .map(|(i, (no, total, price))| {
                    let mut inv = invoice(no, total, price);
                    inv.invoice_date = NaiveDate::from_ymd_opt(2024, 1 + i as u32, 10);
                    HistoricalInvoice::from_invoice(format!("doc-{no}"), Some("V1".to_string()), &inv)
                })
                .collect(),
        )
    }

    fn assess(inv: &ExtractedInvoice, profile: Option<&VendorProfile>, recent: &RecentInvoiceIndex) -> RiskAssessment {
        let engine = RiskEngine::new(RiskConfig::default());
        engine.assess(&RiskContext {
            document_id: "doc-new",
            invoice: inv,
            vendor_id: Some("V1"),
            vendor_profile: profile,
            recent,
            matched_order: None,
            as_of: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        })
    }

    #[test]
    fn clean_invoice_from_known_vendor_is_low() {
        let p = profile();
        let result = assess(&invoice("INV-10", "1100", "110"), Some(&p), &history());
        assert_eq!(result.level, RiskLevel::Low);
        assert!(!result.is_duplicate);
        assert!(result.flags.is_empty(), "{:?}", result.flags);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
    }

    #[test]
    fn exact_hash_is_duplicate_with_full_confidence() {
        let p = profile();
        let inv = invoice("INV-10", "1100", "110");
        let mut entries = history().entries().to_vec();
        entries.push(HistoricalInvoice::from_invoice("doc-old", Some("V1".to_string()), &inv));
        let result = assess(&inv, Some(&p), &RecentInvoiceIndex::new(entries));
        assert!(result.is_duplicate);
        let verdict = result.duplicate.as_ref().unwrap();
        assert_eq!(verdict.tier, DuplicateTier::Exact);
        assert_eq!(verdict.confidence, 1.0);
        assert_eq!(verdict.matched_document_id, "doc-old");
        assert_eq!(result.count_severity(FlagSeverity::Critical), 1);
    }

    #[test]
    fn same_number_vendor_and_amount_is_near_duplicate() {
        let p = profile();
        let inv = invoice("INV-9", "1150", "115");
        let mut tweaked = inv.clone();
        tweaked.invoice_date = NaiveDate::from_ymd_opt(2024, 6, 2);
        let index = RecentInvoiceIndex::new(vec![HistoricalInvoice::from_invoice(
            "doc-old",
            Some("V1".to_string()),
            &tweaked,
        )]);
        let result = assess(&inv, Some(&p), &index);
        let verdict = result.duplicate.unwrap();
        assert_eq!(verdict.tier, DuplicateTier::Near);
        assert!(verdict.confidence >= 0.9);
    }

    #[test]
    fn own_document_is_not_a_duplicate() {
        let p = profile();
        let inv = invoice("INV-10", "1100", "110");
        let mut entries = history().entries().to_vec();
        entries.push(HistoricalInvoice::from_invoice("doc-new", Some("V1".to_string()), &inv));
        let result = assess(&inv, Some(&p), &RecentInvoiceIndex::new(entries));
        assert!(!result.is_duplicate);
    }

    #[test]
    fn unknown_vendor_is_flagged_and_missing_history_degrades() {
        let result = assess(&invoice("INV-10", "1100", "110"), None, &RecentInvoiceIndex::default());
        assert!(result
            .flags
            .iter()
            .any(|f| f.flag_type == RiskFlagType::VendorMismatch));
        assert_eq!(result.components.price, 0.0);
        assert!(result.errors.iter().any(|e| e.starts_with("price:")));
        assert!(result.errors.iter().any(|e| e.starts_with("amount:")));
    }

    #[test]
    fn changed_bank_account_is_critical() {
        let p = profile();
        let mut inv = invoice("INV-10", "1100", "110");
        inv.bank_account = Some("GB29 NWBK 6016 1331 9268 19".to_string());
        let result = assess(&inv, Some(&p), &history());
        assert_eq!(result.count_severity(FlagSeverity::Critical), 1);
        assert!(!result.is_duplicate);
        assert!(result.components.vendor >= 0.9);
        assert_ne!(result.level, RiskLevel::Critical);
    }

    #[test]
    fn changed_tax_id_is_high() {
        let p = profile();
        let mut inv = invoice("INV-10", "1100", "110");
        inv.tax_id = Some("TAX-9".to_string());
        let result = assess(&inv, Some(&p), &history());
        assert_eq!(result.count_severity(FlagSeverity::High), 1);
        assert_eq!(result.count_severity(FlagSeverity::Critical), 0);
    }

    #[test]
    fn monthly_invoice_with_same_content_is_not_duplicate() {
        let mut p = profile();
        p.historical_amounts = vec![dec("1100"), dec("1100")];
        let line = || vec![LineItem::new("Monthly support subscription", dec("1"), dec("1100"))];

        let mut may = invoice("ACME-SUPPLIES-2024-INV-000101", "1100", "1100");
        may.line_items = line();
        may.invoice_date = NaiveDate::from_ymd_opt(2024, 5, 1);
        let mut june = may.clone();
        june.invoice_number = "ACME-SUPPLIES-2024-INV-000102".to_string();
        june.invoice_date = NaiveDate::from_ymd_opt(2024, 6, 1);

        let index = RecentInvoiceIndex::new(vec![HistoricalInvoice::from_invoice(
            "doc-may",
            Some("V1".to_string()),
            &may,
        )]);
        let result = assess(&june, Some(&p), &index);
        assert!(!result.is_duplicate, "{:?}", result.duplicate);
    }

    #[test]
    fn renumbered_resubmission_is_similarity_duplicate() {
        let p = profile();
        let original = invoice("INV-10", "1100", "110");
        let mut resubmitted = original.clone();
        resubmitted.invoice_number = "INV-10-B".to_string();
        let index = RecentInvoiceIndex::new(vec![HistoricalInvoice::from_invoice(
            "doc-old",
            Some("V1".to_string()),
            &original,
        )]);
        let result = assess(&resubmitted, Some(&p), &index);
        let verdict = result.duplicate.as_ref().expect("similarity duplicate");
        assert_eq!(verdict.tier, DuplicateTier::Similarity);
        assert_eq!(verdict.matched_document_id, "doc-old");
    }

    fn flat_history(price: &str) -> RecentInvoiceIndex {
        RecentInvoiceIndex::new(
            (0..3)
                .map(|i| {
                    let mut inv = invoice(&format!("F-{i}"), "1000", price);
                    inv.invoice_date = NaiveDate::from_ymd_opt(2024, 1 + i as u32, 10);
                    HistoricalInvoice::from_invoice(format!("doc-f{i}"), Some("V1".to_string()), &inv)
                })
                .collect(),
        )
    }

    #[test]
    fn any_rise_over_flat_prices_is_spike() {
        let p = profile();
        let result = assess(&invoice("INV-10", "1015", "101.5"), Some(&p), &flat_history("100"));
        let spike = result
            .flags
            .iter()
            .find(|f| f.flag_type == RiskFlagType::PriceSpike)
            .expect("price spike flag");
        assert_eq!(spike.severity, FlagSeverity::High);

        let same = assess(&invoice("INV-11", "1000", "100"), Some(&p), &flat_history("100"));
        assert!(same.flags.iter().all(|f| f.flag_type != RiskFlagType::PriceSpike));
    }

    #[test]
    fn stddev_floor_absorbs_small_rises() {
        let config = RiskConfig {
            price_stddev_floor_ratio: 0.01,
            ..RiskConfig::default()
        };
        let p = profile();
        let recent = flat_history("100");
        let inv = invoice("INV-10", "1015", "101.5");
        let result = RiskEngine::new(config).assess(&RiskContext {
            document_id: "doc-new",
            invoice: &inv,
            vendor_id: Some("V1"),
            vendor_profile: Some(&p),
            recent: &recent,
            matched_order: None,
            as_of: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        });
        assert!(result.flags.iter().all(|f| f.flag_type != RiskFlagType::PriceSpike));
    }

    #[test]
    fn price_above_two_sigma_is_spike() {
        let p = profile();
        let result = assess(&invoice("INV-10", "2000", "200"), Some(&p), &history());
        let spike = result
            .flags
            .iter()
            .find(|f| f.flag_type == RiskFlagType::PriceSpike)
            .expect("price spike flag");
        assert_eq!(spike.severity, FlagSeverity::High);
        assert_eq!(result.components.price, 1.0);
    }

    #[test]
    fn total_over_three_times_average_is_amount_anomaly() {
        let p = profile();
        let mut inv = invoice("INV-10", "4000", "110");
        inv.line_items.clear();
        let result = assess(&inv, Some(&p), &history());
        assert!(result
            .flags
            .iter()
            .any(|f| f.flag_type == RiskFlagType::AmountAnomaly && f.severity == FlagSeverity::High));
        assert_eq!(result.components.amount, 1.0);
    }

    #[test]
    fn large_round_total_is_flagged_low() {
        let mut p = profile();
        p.historical_amounts = vec![dec("20000"), dec("25000")];
        let mut inv = invoice("INV-10", "20000", "110");
        inv.line_items.clear();
        let result = assess(&inv, Some(&p), &history());
        let flag = result
            .flags
            .iter()
            .find(|f| f.flag_type == RiskFlagType::AmountAnomaly)
            .unwrap();
        assert_eq!(flag.severity, FlagSeverity::Low);
    }

    #[test]
    fn future_date_and_early_invoice_are_patterns() {
        let p = profile();
        let mut inv = invoice("INV-10", "1100", "110");
        inv.invoice_date = NaiveDate::from_ymd_opt(2024, 8, 1);
        let order = PurchaseOrder {
            order_id: "PO1".to_string(),
            order_number: "PO-1".to_string(),
            vendor_id: Some("V1".to_string()),
            vendor_name: "Acme Supplies".to_string(),
            order_date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            currency: "USD".to_string(),
            total: dec("1100"),
            line_items: vec![],
            status: OrderStatus::Open,
        };
        let engine = RiskEngine::new(RiskConfig::default());
        let recent = history();
        let result = engine.assess(&RiskContext {
            document_id: "doc-new",
            invoice: &inv,
            vendor_id: Some("V1"),
            vendor_profile: Some(&p),
            recent: &recent,
            matched_order: Some(&order),
            as_of: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        });
        let patterns = result
            .flags
            .iter()
            .filter(|f| f.flag_type == RiskFlagType::SuspiciousPattern)
            .count();
        assert_eq!(patterns, 2);
    }

    #[test]
    fn score_is_weighted_and_clamped() {
        let p = profile();
        let inv = invoice("INV-10", "1100", "110");
        let mut entries = history().entries().to_vec();
        entries.push(HistoricalInvoice::from_invoice("doc-old", Some("V1".to_string()), &inv));
        let result = assess(&inv, Some(&p), &RecentInvoiceIndex::new(entries));
        let w = RiskConfig::default().weights;
        let c = result.components;
        let expected = w.duplicate * c.duplicate + w.vendor * c.vendor + w.price * c.price + w.amount * c.amount;
        assert!((result.score - expected.clamp(0.0, 1.0)).abs() < 1e-9);
        assert!(result.score <= 1.0);
    }
}
