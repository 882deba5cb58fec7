//! 字符串相似度、内容哈希与特征向量。
//!
//! 匹配引擎和风险引擎共用这里的纯函数。

use bigdecimal::{BigDecimal, ToPrimitive};
use sha2::{Digest, Sha256};

use crate::models::ExtractedInvoice;

/// 特征向量维度
pub const FEATURE_DIM: usize = 128;

/// 小写 + 合并空白
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 编辑距离 (按字符)
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 规范化后的编辑距离相似度 [0,1]
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// 数值接近度：相对差在容差内为 1.0，超出后线性衰减
pub fn closeness(a: f64, b: f64, tolerance: f64) -> f64 {
    let base = a.abs().max(b.abs());
    if base == 0.0 {
        return 1.0;
    }
    let ratio = (a - b).abs() / base;
    if ratio <= tolerance {
        1.0
    } else {
        (1.0 - (ratio - tolerance)).max(0.0)
    }
}

pub fn to_f64(value: &BigDecimal) -> Option<f64> {
    value.to_f64().filter(|v| v.is_finite())
}

/// 发票内容的 SHA-256 (小写十六进制)
pub fn content_hash(invoice: &ExtractedInvoice) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(&invoice.vendor_name).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(&invoice.invoice_number).as_bytes());
    hasher.update(b"|");
    if let Some(date) = invoice.invoice_date {
        hasher.update(date.to_string().as_bytes());
    }
    hasher.update(b"|");
    hasher.update(invoice.currency.to_uppercase().as_bytes());
    hasher.update(b"|");
    hasher.update(invoice.total.normalized().to_string().as_bytes());
    for item in &invoice.line_items {
        hasher.update(b"|");
        hasher.update(normalize(&item.description).as_bytes());
        hasher.update(b";");
        hasher.update(item.quantity.normalized().to_string().as_bytes());
        hasher.update(b";");
        hasher.update(item.unit_price.normalized().to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn bucket(feature: &str) -> usize {
    let digest = Sha256::digest(feature.as_bytes());
    let n = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    (n % FEATURE_DIM as u64) as usize
}

/// 哈希特征袋：供应商词、明细描述词、明细 (描述, 数量, 单价)、金额、日期。
///
/// 发票号不参与：同一供应商的周期性发票编号前缀相同，号码相近不代表内容重复。
/// 号码相同的情况由近似重复档负责。
pub fn feature_vector(invoice: &ExtractedInvoice) -> Vec<f64> {
    let mut v = vec![0.0; FEATURE_DIM];
    let mut add = |feature: String, weight: f64| v[bucket(&feature)] += weight;

    for token in normalize(&invoice.vendor_name).split(' ') {
        add(format!("vendor:{token}"), 1.0);
    }
    for item in &invoice.line_items {
        let desc = normalize(&item.description);
        for token in desc.split(' ') {
            add(format!("desc:{token}"), 1.0);
        }
        add(
            format!(
                "line:{desc}:{}:{}",
                item.quantity.normalized(),
                item.unit_price.normalized()
            ),
            2.0,
        );
    }
    if let Some(total) = to_f64(&invoice.total) {
        add(format!("total:{}", total.round() as i64), 3.0);
    }
    if let Some(date) = invoice.invoice_date {
        add(format!("date:{date}"), 3.0);
    }
    v
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;
    use std::str::FromStr;

    fn invoice(number: &str, total: &str) -> ExtractedInvoice {
        ExtractedInvoice {
            invoice_number: number.to_string(),
            vendor_name: "Acme Supplies".to_string(),
            po_number: None,
            invoice_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
            currency: "USD".to_string(),
            total: BigDecimal::from_str(total).unwrap(),
            line_items: vec![LineItem::new(
                "Printer paper",
                BigDecimal::from(10),
                BigDecimal::from_str("11.00").unwrap(),
            )],
            bank_account: None,
            tax_id: None,
            payment_terms_days: None,
        }
    }

    #[test]
    fn similarity_ignores_case_and_whitespace() {
        assert_eq!(string_similarity("ACME  Supplies", "acme supplies"), 1.0);
        assert!(string_similarity("Acme Supplies", "Acme Suplies") > 0.9);
        assert!(string_similarity("Acme Supplies", "Globex Corp") < 0.5);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn closeness_within_tolerance_is_full() {
        assert_eq!(closeness(1000.0, 1015.0, 0.02), 1.0);
        assert!(closeness(1000.0, 1200.0, 0.02) < 1.0);
        assert_eq!(closeness(0.0, 0.0, 0.02), 1.0);
    }

    #[test]
    fn content_hash_ignores_scale_and_case() {
        let a = invoice("INV-1", "110.00");
        let mut b = invoice("inv-1", "110");
        b.vendor_name = "ACME supplies".to_string();
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&invoice("INV-2", "110")));
    }

    #[test]
    fn identical_invoices_have_unit_cosine() {
        let a = feature_vector(&invoice("INV-1001", "110.00"));
        let b = feature_vector(&invoice("INV-1001", "110.00"));
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);

        let c = feature_vector(&invoice("INV-2077", "540.00"));
        assert!(cosine_similarity(&a, &c) < 0.95);
    }

    #[test]
    fn invoice_number_does_not_drive_similarity() {
        let may = invoice("ACME-SUPPLIES-2024-INV-000101", "1100.00");
        let mut june = invoice("ACME-SUPPLIES-2024-INV-000102", "1100.00");
        june.invoice_date = chrono::NaiveDate::from_ymd_opt(2024, 4, 1);
        let sim = cosine_similarity(&feature_vector(&may), &feature_vector(&june));
        assert!(sim < 0.95, "cosine {sim}");

        // 同一张发票换了号码重新提交仍然相似
        let retyped = invoice("A-77", "1100.00");
        let sim = cosine_similarity(&feature_vector(&may), &feature_vector(&retyped));
        assert!((sim - 1.0).abs() < 1e-9);
    }
}
