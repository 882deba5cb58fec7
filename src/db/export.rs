use std::io::Write;

use crate::models::WorkflowState;

const HEADER: [&str; 11] = [
    "document_id",
    "vendor_id",
    "status",
    "decision",
    "requires_manual_review",
    "match_score",
    "match_tier",
    "risk_score",
    "risk_level",
    "reason",
    "finished_at",
];

fn option_to_csv<T: ToString>(val: Option<T>) -> String {
    val.map(|v| v.to_string()).unwrap_or_default()
}

/// 导出终态决策为 CSV
pub fn write_decisions_csv<W: Write>(states: &[WorkflowState], out: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(HEADER)?;

    for state in states {
        let matched = state.match_result();
        let risk = state.risk_assessment();
        let decision = state.decision.as_ref();
        writer.write_record(&[
            state.document_id.clone(),
            state.vendor_id.clone().unwrap_or_default(),
            state.status.as_str().to_string(),
            option_to_csv(decision.map(|d| d.kind.as_str())),
            option_to_csv(decision.map(|d| d.requires_manual_review)),
            option_to_csv(matched.map(|m| format!("{:.4}", m.score))),
            option_to_csv(matched.map(|m| m.tier.as_str())),
            option_to_csv(risk.map(|r| format!("{:.4}", r.score))),
            option_to_csv(risk.map(|r| r.level.as_str())),
            option_to_csv(decision.map(|d| d.reason.clone())),
            option_to_csv(state.metadata.finished_at.map(|t| t.to_rfc3339())),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
