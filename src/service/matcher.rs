use crate::config::MatchingConfig;
use crate::error::MatchError;
use crate::models::{
    Discrepancy, DiscrepancyKind, DiscrepancySeverity, ExtractedInvoice, LineItem, MatchResult,
    MatchTier, PurchaseOrder,
};
use crate::service::fingerprint::{closeness, normalize, string_similarity, to_f64};
use indexmap::IndexSet;
use rayon::prelude::*;

/// 匹配引擎：为发票在候选采购订单中找出最优订单并列出差异
pub struct MatchingEngine {
    config: MatchingConfig,
}

/// 明细配对 (发票行下标, 订单行下标, 描述相似度)
type LinePair = (usize, usize, f64);

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// 匹配入口。候选为空时返回 none 档，不报错
    pub fn match_invoice(
        &self,
        invoice: &ExtractedInvoice,
        vendor_id: Option<&str>,
        orders: &[PurchaseOrder],
    ) -> MatchResult {
        // 1. 候选过滤 (按订单ID去重、保序)
        let mut seen: IndexSet<&str> = IndexSet::new();
        let candidates: Vec<&PurchaseOrder> = orders
            .iter()
            .filter(|o| o.status.is_matchable())
            .filter(|o| self.vendor_matches(invoice, vendor_id, o))
            .filter(|o| seen.insert(o.order_id.as_str()))
            .collect();

        if candidates.is_empty() {
            tracing::debug!("[Matching] invoice {}: no candidate orders", invoice.invoice_number);
            return MatchResult::unmatched(0, Vec::new());
        }

        // 2. 并行评分，按候选顺序收集以保证确定性
        let scored: Vec<(&PurchaseOrder, Result<f64, MatchError>)> = candidates
            .par_iter()
            .map(|o| (*o, self.score_candidate(invoice, vendor_id, o)))
            .collect();

        // 3. 选最优：分数最高，同分取最近订单日期
        let mut errors = Vec::new();
        let mut best: Option<(&PurchaseOrder, f64)> = None;
        for (order, result) in scored {
            let score = match result {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("[Matching] invoice {}: candidate skipped: {}", invoice.invoice_number, e);
                    errors.push(e.to_string());
                    continue;
                }
            };

            let is_better = match &best {
                None => true,
                Some((best_order, best_score)) => {
                    score > *best_score
                        || (score == *best_score && order.order_date > best_order.order_date)
                }
            };
            if is_better {
                best = Some((order, score));
            }
        }

        let considered = candidates.len();
        let Some((order, score)) = best else {
            return MatchResult::unmatched(considered, errors);
        };

        let tier = MatchTier::from_score(score, &self.config.thresholds);
        if tier == MatchTier::None {
            tracing::info!(
                "[Matching] invoice {}: best candidate {} scored {:.3}, below floor",
                invoice.invoice_number, order.order_number, score
            );
            return MatchResult::unmatched(considered, errors);
        }

        // 4. 差异推导
        let discrepancies = self.derive_discrepancies(invoice, order);

        tracing::info!(
            "[Matching] invoice {}: matched order {} score {:.3} tier {} ({} discrepancies, {} candidates)",
            invoice.invoice_number, order.order_number, score, tier.as_str(), discrepancies.len(), considered
        );

        MatchResult {
            order_id: Some(order.order_id.clone()),
            order_number: Some(order.order_number.clone()),
            score,
            tier,
            discrepancies,
            candidates_considered: considered,
            errors,
        }
    }

    fn vendor_matches(&self, invoice: &ExtractedInvoice, vendor_id: Option<&str>, order: &PurchaseOrder) -> bool {
        if let (Some(a), Some(b)) = (vendor_id, order.vendor_id.as_deref()) {
            if a == b {
                return true;
            }
        }
        string_similarity(&invoice.vendor_name, &order.vendor_name)
            >= self.config.vendor_similarity_threshold
    }

    /// 单个候选评分 [0,1]
    pub fn score_candidate(
        &self,
        invoice: &ExtractedInvoice,
        vendor_id: Option<&str>,
        order: &PurchaseOrder,
    ) -> Result<f64, MatchError> {
        if !invoice.currency.eq_ignore_ascii_case(&order.currency) {
            return Err(MatchError::CurrencyMismatch {
                order_id: order.order_id.clone(),
                expected: invoice.currency.clone(),
                found: order.currency.clone(),
            });
        }
        let order_total = to_f64(&order.total)
            .filter(|t| *t > 0.0)
            .ok_or_else(|| MatchError::InvalidTotal {
                order_id: order.order_id.clone(),
            })?;
        let invoice_total = to_f64(&invoice.total).unwrap_or(0.0);

        // 订单号精确命中
        if let Some(po) = &invoice.po_number {
            if normalize(po) == normalize(&order.order_number) {
                return Ok(1.0);
            }
        }

        let weights = &self.config.weights;
        let vendor_score = match (vendor_id, order.vendor_id.as_deref()) {
            (Some(a), Some(b)) if a == b => 1.0,
            _ => string_similarity(&invoice.vendor_name, &order.vendor_name),
        };
        let amount_score = closeness(invoice_total, order_total, self.config.amount_tolerance);

        let mut weighted = weights.vendor * vendor_score + weights.amount * amount_score;
        let mut weight_sum = weights.vendor + weights.amount;

        // 双方都无明细时不计入明细分量
        if !invoice.line_items.is_empty() || !order.line_items.is_empty() {
            let line_score = self.line_similarity(&invoice.line_items, &order.line_items, &order.order_id)?;
            weighted += weights.lines * line_score;
            weight_sum += weights.lines;
        }

        if weight_sum <= 0.0 {
            return Ok(0.0);
        }
        Ok((weighted / weight_sum).clamp(0.0, 1.0))
    }

    /// 明细相似度：贪心配对后 描述相似度 × 数量接近度 × 单价接近度 的均值
    fn line_similarity(
        &self,
        invoice_lines: &[LineItem],
        order_lines: &[LineItem],
        order_id: &str,
    ) -> Result<f64, MatchError> {
        let pairs = pair_lines(invoice_lines, order_lines, self.config.line_pairing_floor);
        if pairs.is_empty() {
            return Ok(0.0);
        }

        let mut total = 0.0;
        for &(i, j, desc_sim) in &pairs {
            let (inv, ord) = (&invoice_lines[i], &order_lines[j]);
            let (iq, ip) = line_values(inv, order_id)?;
            let (oq, op) = line_values(ord, order_id)?;
            total += desc_sim * closeness(iq, oq, 0.0) * closeness(ip, op, self.config.amount_tolerance);
        }
        Ok(total / pairs.len() as f64)
    }

    /// 整单与逐行比较，得到差异列表
    pub fn derive_discrepancies(&self, invoice: &ExtractedInvoice, order: &PurchaseOrder) -> Vec<Discrepancy> {
        let tolerance = self.config.amount_tolerance;
        let mut out = Vec::new();

        // 整单金额
        let inv_total = to_f64(&invoice.total).unwrap_or(0.0);
        let ord_total = to_f64(&order.total).unwrap_or(0.0);
        let delta = inv_total - ord_total;
        if delta != 0.0 {
            let severity = if exceeds(delta, ord_total, tolerance) {
                DiscrepancySeverity::Critical
            } else {
                DiscrepancySeverity::Informational
            };
            out.push(Discrepancy {
                kind: DiscrepancyKind::AmountMismatch,
                severity,
                delta,
                item: None,
                description: format!(
                    "invoice total {inv_total:.2} vs order total {ord_total:.2} ({:+.2}%)",
                    pct(delta, ord_total)
                ),
            });
        }

        // 逐行
        let mut pairs = pair_lines(&invoice.line_items, &order.line_items, self.config.line_pairing_floor);
        pairs.sort_by_key(|p| p.0);
        let mut paired_inv = vec![false; invoice.line_items.len()];
        let mut paired_ord = vec![false; order.line_items.len()];

        for (i, j, _) in pairs {
            paired_inv[i] = true;
            paired_ord[j] = true;
            let inv = &invoice.line_items[i];
            let ord = &order.line_items[j];

            let iq = to_f64(&inv.quantity).unwrap_or(0.0);
            let oq = to_f64(&ord.quantity).unwrap_or(0.0);
            let ip = to_f64(&inv.unit_price).unwrap_or(0.0);
            let op = to_f64(&ord.unit_price).unwrap_or(0.0);
            let amount_delta = iq * ip - oq * op;
            let amount_critical = exceeds(amount_delta, oq * op, tolerance);

            if iq != oq {
                out.push(Discrepancy {
                    kind: DiscrepancyKind::QuantityMismatch,
                    severity: if amount_critical {
                        DiscrepancySeverity::Critical
                    } else {
                        DiscrepancySeverity::Warning
                    },
                    delta: iq - oq,
                    item: Some(inv.description.clone()),
                    description: format!("quantity {iq} invoiced vs {oq} ordered"),
                });
            } else if ip != op {
                let (kind, severity) = if amount_critical {
                    (DiscrepancyKind::ToleranceExceeded, DiscrepancySeverity::Critical)
                } else {
                    (DiscrepancyKind::AmountMismatch, DiscrepancySeverity::Informational)
                };
                out.push(Discrepancy {
                    kind,
                    severity,
                    delta: ip - op,
                    item: Some(inv.description.clone()),
                    description: format!("unit price {ip:.2} invoiced vs {op:.2} ordered"),
                });
            }
        }

        for (i, inv) in invoice.line_items.iter().enumerate() {
            if !paired_inv[i] {
                out.push(Discrepancy {
                    kind: DiscrepancyKind::ExtraLineItem,
                    severity: DiscrepancySeverity::Warning,
                    delta: to_f64(&inv.amount()).unwrap_or(0.0),
                    item: Some(inv.description.clone()),
                    description: format!("'{}' is not on the purchase order", inv.description),
                });
            }
        }
        for (j, ord) in order.line_items.iter().enumerate() {
            if !paired_ord[j] {
                out.push(Discrepancy {
                    kind: DiscrepancyKind::MissingLineItem,
                    severity: DiscrepancySeverity::Warning,
                    delta: -to_f64(&ord.amount()).unwrap_or(0.0),
                    item: Some(ord.description.clone()),
                    description: format!("ordered '{}' is missing from the invoice", ord.description),
                });
            }
        }

        out
    }
}

fn line_values(line: &LineItem, order_id: &str) -> Result<(f64, f64), MatchError> {
    match (to_f64(&line.quantity), to_f64(&line.unit_price)) {
        (Some(q), Some(p)) => Ok((q, p)),
        _ => Err(MatchError::InvalidLine {
            order_id: order_id.to_string(),
            line: line.description.clone(),
        }),
    }
}

fn exceeds(delta: f64, base: f64, tolerance: f64) -> bool {
    if base == 0.0 {
        return delta != 0.0;
    }
    (delta / base).abs() > tolerance
}

fn pct(delta: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        delta / base * 100.0
    }
}

/// 贪心配对：按描述相似度降序依次取未使用的行
fn pair_lines(invoice_lines: &[LineItem], order_lines: &[LineItem], floor: f64) -> Vec<LinePair> {
    let mut all: Vec<LinePair> = Vec::new();
    for (i, inv) in invoice_lines.iter().enumerate() {
        for (j, ord) in order_lines.iter().enumerate() {
            let sim = string_similarity(&inv.description, &ord.description);
            if sim >= floor {
                all.push((i, j, sim));
            }
        }
    }
    all.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut used_inv = vec![false; invoice_lines.len()];
    let mut used_ord = vec![false; order_lines.len()];
    let mut pairs = Vec::new();
    for (i, j, sim) in all {
        if used_inv[i] || used_ord[j] {
            continue;
        }
        used_inv[i] = true;
        used_ord[j] = true;
        pairs.push((i, j, sim));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn invoice(total: &str, lines: Vec<LineItem>) -> ExtractedInvoice {
        ExtractedInvoice {
            invoice_number: "INV-100".to_string(),
            vendor_name: "Acme Supplies".to_string(),
            po_number: None,
            invoice_date: NaiveDate::from_ymd_opt(2024, 5, 2),
            currency: "USD".to_string(),
            total: dec(total),
            line_items: lines,
            bank_account: None,
            tax_id: None,
            payment_terms_days: None,
        }
    }

    fn order(id: &str, total: &str, lines: Vec<LineItem>) -> PurchaseOrder {
        PurchaseOrder {
            order_id: id.to_string(),
            order_number: format!("PO-{id}"),
            vendor_id: Some("V1".to_string()),
            vendor_name: "Acme Supplies".to_string(),
            order_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            currency: "USD".to_string(),
            total: dec(total),
            line_items: lines,
            status: OrderStatus::Open,
        }
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(MatchingConfig::default())
    }

    #[test]
    fn empty_candidates_yield_none_tier() {
        let result = engine().match_invoice(&invoice("100", vec![]), Some("V1"), &[]);
        assert_eq!(result.tier, MatchTier::None);
        assert!(result.order_id.is_none());
        assert!(result.discrepancies.is_empty());
    }

    #[test]
    fn po_number_match_scores_one() {
        let mut inv = invoice("1100", vec![]);
        inv.po_number = Some("po-a".to_string());
        let result = engine().match_invoice(&inv, Some("V1"), &[order("A", "1100", vec![])]);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.tier, MatchTier::Exact);
        assert_eq!(result.order_id.as_deref(), Some("A"));
        assert!(result.discrepancies.is_empty());
    }

    #[test]
    fn identical_content_without_po_is_exact() {
        let lines = vec![LineItem::new("Printer paper", dec("10"), dec("110"))];
        let result = engine().match_invoice(
            &invoice("1100", lines.clone()),
            Some("V1"),
            &[order("A", "1100", lines)],
        );
        assert!(result.score >= 0.95, "score {}", result.score);
        assert_eq!(result.tier, MatchTier::Exact);
    }

    #[test]
    fn unrelated_vendor_is_filtered_out() {
        let mut other = order("B", "1100", vec![]);
        other.vendor_id = Some("V9".to_string());
        other.vendor_name = "Globex Corporation".to_string();
        let result = engine().match_invoice(&invoice("1100", vec![]), Some("V1"), &[other]);
        assert_eq!(result.candidates_considered, 0);
        assert_eq!(result.tier, MatchTier::None);
    }

    #[test]
    fn closed_orders_are_not_candidates() {
        let mut closed = order("A", "1100", vec![]);
        closed.status = OrderStatus::Fulfilled;
        let result = engine().match_invoice(&invoice("1100", vec![]), Some("V1"), &[closed]);
        assert_eq!(result.candidates_considered, 0);
    }

    #[test]
    fn ties_prefer_most_recent_order() {
        let older = order("OLD", "500", vec![]);
        let mut newer = order("NEW", "500", vec![]);
        newer.order_date = NaiveDate::from_ymd_opt(2024, 4, 20).unwrap();
        let result = engine().match_invoice(&invoice("500", vec![]), Some("V1"), &[older, newer]);
        assert_eq!(result.order_id.as_deref(), Some("NEW"));
    }

    #[test]
    fn failing_candidate_is_skipped_and_recorded() {
        let mut euro = order("EUR", "1000", vec![]);
        euro.currency = "EUR".to_string();
        let good = order("A", "1000", vec![]);
        let result = engine().match_invoice(&invoice("1000", vec![]), Some("V1"), &[euro, good]);
        assert_eq!(result.order_id.as_deref(), Some("A"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("EUR"));
    }

    #[test]
    fn total_over_tolerance_is_one_critical_discrepancy() {
        let result = engine().match_invoice(
            &invoice("1200", vec![]),
            Some("V1"),
            &[order("A", "1000", vec![])],
        );
        assert_ne!(result.tier, MatchTier::None);
        let critical: Vec<_> = result
            .discrepancies
            .iter()
            .filter(|d| d.severity == DiscrepancySeverity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].kind, DiscrepancyKind::AmountMismatch);
        assert!((critical[0].delta - 200.0).abs() < 1e-9);
    }

    #[test]
    fn small_total_difference_is_informational() {
        let eng = engine();
        let found = eng.derive_discrepancies(&invoice("1010", vec![]), &order("A", "1000", vec![]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, DiscrepancySeverity::Informational);
    }

    #[test]
    fn severity_never_decreases_with_deviation() {
        let eng = engine();
        let ord = order("A", "1000", vec![]);
        let mut last = None;
        for total in ["1000", "1005", "1019", "1021", "1100", "1500", "3000"] {
            let worst = eng
                .derive_discrepancies(&invoice(total, vec![]), &ord)
                .iter()
                .map(|d| d.severity)
                .max();
            assert!(worst >= last, "severity dropped at {total}");
            last = worst;
        }
    }

    #[test]
    fn quantity_mismatch_is_warning_when_amount_holds() {
        let eng = engine();
        let inv = invoice("100", vec![LineItem::new("Toner", dec("10.1"), dec("9.9"))]);
        let ord = order("A", "100", vec![LineItem::new("Toner", dec("10"), dec("10"))]);
        let found = eng.derive_discrepancies(&inv, &ord);
        let qty = found
            .iter()
            .find(|d| d.kind == DiscrepancyKind::QuantityMismatch)
            .unwrap();
        assert_eq!(qty.severity, DiscrepancySeverity::Warning);
    }

    #[test]
    fn quantity_mismatch_is_critical_when_amount_breaks() {
        let eng = engine();
        let inv = invoice("150", vec![LineItem::new("Toner", dec("15"), dec("10"))]);
        let ord = order("A", "100", vec![LineItem::new("Toner", dec("10"), dec("10"))]);
        let found = eng.derive_discrepancies(&inv, &ord);
        let qty = found
            .iter()
            .find(|d| d.kind == DiscrepancyKind::QuantityMismatch)
            .unwrap();
        assert_eq!(qty.severity, DiscrepancySeverity::Critical);
    }

    #[test]
    fn one_sided_lines_are_missing_or_extra() {
        let eng = engine();
        let inv = invoice(
            "150",
            vec![
                LineItem::new("Toner", dec("10"), dec("10")),
                LineItem::new("Express shipping", dec("1"), dec("50")),
            ],
        );
        let ord = order(
            "A",
            "130",
            vec![
                LineItem::new("Toner", dec("10"), dec("10")),
                LineItem::new("Stapler", dec("3"), dec("10")),
            ],
        );
        let found = eng.derive_discrepancies(&inv, &ord);
        assert!(found
            .iter()
            .any(|d| d.kind == DiscrepancyKind::ExtraLineItem && d.item.as_deref() == Some("Express shipping")));
        assert!(found
            .iter()
            .any(|d| d.kind == DiscrepancyKind::MissingLineItem && d.item.as_deref() == Some("Stapler")));
    }

    #[test]
    fn score_below_floor_returns_no_candidate() {
        let result = engine().match_invoice(
            &invoice("100", vec![LineItem::new("Consulting", dec("1"), dec("100"))]),
            Some("V1"),
            &[order("A", "5000", vec![LineItem::new("Steel beams", dec("50"), dec("100"))])],
        );
        assert_eq!(result.tier, MatchTier::None);
        assert!(result.order_id.is_none());
        assert!(result.discrepancies.is_empty());
        assert_eq!(result.candidates_considered, 1);
    }
}
